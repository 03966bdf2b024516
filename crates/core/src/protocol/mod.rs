//! Line protocol spoken by control clients.
//!
//! Commands are ASCII lines terminated by `\r\n`. A TCP stream may split or
//! merge lines arbitrarily, so every connection owns a [`LineBuffer`] that
//! stitches fragments back together before [`decode`] turns them into a
//! [`Command`].

use std::fmt;

const TERMINATOR: &[u8; 2] = b"\r\n";
const TALK: &[u8] = b"talk";
const STATE: &[u8] = b"state";

/// Reason a line was rejected. None of these terminate a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed command `{}`", String::from_utf8_lossy(.raw))]
    Malformed { raw: Vec<u8> },
    #[error("unknown command `{}`", String::from_utf8_lossy(.raw))]
    UnknownCommand { raw: Vec<u8> },
    #[error("state index {index} out of range, {available} state(s) configured")]
    OutOfRange { index: usize, available: usize },
    #[error("line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },
}

/// Decoded control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Speech is occurring; open the mouth of the current sprite.
    Talk,
    /// Switch to the avatar state at the given index.
    SetState(usize),
}

impl Command {
    /// Wire representation including the terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = self.to_string().into_bytes();
        line.extend_from_slice(TERMINATOR);
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Talk => f.write_str("talk"),
            Command::SetState(index) => write!(f, "state:{index}"),
        }
    }
}

/// Turns a single line (terminator already removed) into a command.
///
/// `talk` is matched exactly and case-sensitively. `state:<n>` accepts
/// surrounding whitespace around `n`. Everything else is reported back as a
/// [`ProtocolError`] instead of panicking.
pub fn decode(line: &[u8]) -> Result<Command, ProtocolError> {
    if line == TALK {
        return Ok(Command::Talk);
    }

    let Some(split) = line.iter().position(|byte| *byte == b':') else {
        return Err(ProtocolError::UnknownCommand { raw: line.to_vec() });
    };
    let (name, body) = (&line[..split], &line[split + 1..]);
    if name != STATE {
        return Err(ProtocolError::UnknownCommand { raw: line.to_vec() });
    }

    std::str::from_utf8(body)
        .ok()
        .and_then(|text| text.trim().parse::<usize>().ok())
        .map(Command::SetState)
        .ok_or_else(|| ProtocolError::Malformed { raw: line.to_vec() })
}

/// Per-connection accumulator extracting CRLF-terminated lines.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
    limit: Option<usize>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer that refuses to hold more than `limit` bytes of an
    /// unterminated line.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    /// Appends `data` and returns every line it completed, in arrival order.
    /// Bytes after the last terminator stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        if data.is_empty() {
            return lines;
        }

        // A terminator may straddle the previous remainder and `data`.
        let scan_from = self.pending.len().saturating_sub(1);
        self.pending.extend_from_slice(data);

        let mut start = 0;
        let mut cursor = scan_from;
        while let Some(offset) = find_terminator(&self.pending[cursor..]) {
            let end = cursor + offset;
            lines.push(self.pending[start..end].to_vec());
            start = end + TERMINATOR.len();
            cursor = start;
        }
        self.pending.drain(..start);
        lines
    }

    /// Enforces the optional cap on the unterminated remainder. When it is
    /// exceeded the remainder is discarded and the caller decides what to do
    /// with the connection.
    pub fn check_limit(&mut self) -> Result<(), ProtocolError> {
        match self.limit {
            Some(limit) if self.pending.len() > limit => {
                self.pending.clear();
                Err(ProtocolError::LineTooLong { limit })
            }
            _ => Ok(()),
        }
    }

    /// Bytes of the unterminated line held so far.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}
