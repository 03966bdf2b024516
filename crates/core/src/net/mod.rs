//! Non-blocking listener multiplexing every control connection on the engine
//! thread.
//!
//! A single [`ConnectionMultiplexer::poll`] per tick waits at most the given
//! timeout, accepts pending clients and reads every readable socket into its
//! [`LineBuffer`]. Each socket gets at most [`MAX_READS_PER_POLL`] reads per
//! poll; a socket with data left over is serviced again on the next poll
//! without waiting for fresh readiness. Lines come back in the order sockets
//! were serviced and, within one socket, in stream order.

use std::{
    collections::{HashMap, HashSet},
    io::{self, Read, Write},
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};

use crate::{
    protocol::{Command, LineBuffer, ProtocolError},
    PngTuberError, Result,
};

pub type ConnectionId = usize;

const LISTENER: Token = Token(0);
const READ_CHUNK: usize = 1024;
/// Reads (or accepts) one socket may consume in a single poll.
pub const MAX_READS_PER_POLL: usize = 4;
const EVENT_CAPACITY: usize = 128;

/// A connected control client and its partial line.
#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: LineBuffer,
}

/// What one poll produced.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Complete lines, terminator removed.
    pub lines: Vec<(ConnectionId, Vec<u8>)>,
    /// Connections dropped because they broke the line length cap.
    pub rejected: Vec<(ConnectionId, ProtocolError)>,
    pub opened: usize,
    pub closed: usize,
}

pub struct ConnectionMultiplexer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    /// Sockets that still had data when their read budget ran out.
    backlog: HashSet<Token>,
    next_token: usize,
    max_line_bytes: Option<usize>,
}

impl ConnectionMultiplexer {
    /// Binds the listener to the first address `address` resolves to.
    pub fn bind(address: &str, max_line_bytes: Option<usize>) -> Result<Self> {
        let mut last_error = None;
        for addr in address.to_socket_addrs()? {
            match TcpListener::bind(addr) {
                Ok(listener) => return Self::from_listener(listener, max_line_bytes),
                Err(err) => last_error = Some(err),
            }
        }
        Err(match last_error {
            Some(err) => err.into(),
            None => PngTuberError::msg(format!("`{address}` did not resolve to any address")),
        })
    }

    fn from_listener(mut listener: TcpListener, max_line_bytes: Option<usize>) -> Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        tracing::info!(address = %listener.local_addr()?, "listening for commands");
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            connections: HashMap::new(),
            backlog: HashSet::new(),
            next_token: LISTENER.0 + 1,
            max_line_bytes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Waits up to `timeout` for readiness and services every ready socket
    /// plus the backlog left by earlier polls. With a backlog pending the
    /// poll does not wait at all.
    ///
    /// Transport failures on a client only remove that client. An error is
    /// returned only when the poll call itself fails.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<PollOutcome> {
        let mut outcome = PollOutcome::default();
        let timeout = if self.backlog.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => self.events.clear(),
            Err(err) => return Err(err),
        }

        let mut ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        let mut carried: Vec<Token> = self
            .backlog
            .iter()
            .copied()
            .filter(|token| !ready.contains(token))
            .collect();
        carried.sort();
        ready.extend(carried);
        for token in ready {
            if token == LISTENER {
                self.accept_pending(&mut outcome);
            } else {
                self.read_ready(token, &mut outcome);
            }
        }
        Ok(outcome)
    }

    fn accept_pending(&mut self, outcome: &mut PollOutcome) {
        self.backlog.remove(&LISTENER);
        for _ in 0..MAX_READS_PER_POLL {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(%err, "failed to accept connection");
                    return;
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;
            if let Err(err) = self
                .poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
            {
                tracing::warn!(%peer, %err, "failed to register connection");
                continue;
            }

            tracing::info!(connection = token.0, %peer, "got connection");
            self.connections.insert(
                token,
                Connection {
                    stream,
                    peer,
                    buffer: LineBuffer::with_limit(self.max_line_bytes),
                },
            );
            outcome.opened += 1;
        }
        self.backlog.insert(LISTENER);
    }

    fn read_ready(&mut self, token: Token, outcome: &mut PollOutcome) {
        let Some(connection) = self.connections.get_mut(&token) else {
            return;
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut reads = 0;
        let close = loop {
            if reads == MAX_READS_PER_POLL {
                self.backlog.insert(token);
                return;
            }
            match connection.stream.read(&mut chunk) {
                Ok(0) => break true,
                Ok(read) => {
                    reads += 1;
                    for line in connection.buffer.feed(&chunk[..read]) {
                        outcome.lines.push((token.0, line));
                    }
                    if let Err(err) = connection.buffer.check_limit() {
                        tracing::warn!(connection = token.0, %err, "dropping connection");
                        outcome.rejected.push((token.0, err));
                        break true;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break false,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(connection = token.0, %err, "read failed");
                    break true;
                }
            }
        };

        self.backlog.remove(&token);
        if close {
            self.remove(token);
            outcome.closed += 1;
        }
    }

    fn remove(&mut self, token: Token) {
        self.backlog.remove(&token);
        if let Some(mut connection) = self.connections.remove(&token) {
            if let Err(err) = self.poll.registry().deregister(&mut connection.stream) {
                tracing::debug!(connection = token.0, %err, "deregister failed");
            }
            tracing::info!(
                connection = token.0,
                peer = %connection.peer,
                discarded = connection.buffer.pending().len(),
                "closed connection"
            );
        }
    }
}

impl std::fmt::Debug for ConnectionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMultiplexer")
            .field("listener", &self.listener)
            .field("connections", &self.connections.len())
            .field("max_line_bytes", &self.max_line_bytes)
            .finish()
    }
}

/// Single-shot sender: connects, writes one command and disconnects.
pub fn send(address: &str, command: Command) -> Result<()> {
    let mut stream = std::net::TcpStream::connect(address)?;
    stream.write_all(&command.encode())?;
    stream.flush()?;
    tracing::info!(%address, %command, "sent command");
    Ok(())
}
