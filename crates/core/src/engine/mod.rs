//! Ties the pieces together once per frame: poll sockets, decode and dispatch
//! commands, advance the active state, apply pending resizes, draw.
//!
//! Everything runs on the caller's thread. The active state index and the
//! connection set are owned by [`Engine`], so no locking is involved.

use std::time::Duration;

use crate::{
    config::{parse_color, AppConfig},
    net::{ConnectionMultiplexer, PollOutcome},
    protocol::{decode, Command, ProtocolError},
    render::{Composition, Renderer},
    scene::AvatarState,
    timeline::FrameClock,
    PngTuberError, Result,
};

/// Upper bound on how long a tick waits for socket readiness.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Summary of a single tick, mostly useful for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub commands: usize,
    pub rejected: usize,
    pub opened: usize,
    pub closed: usize,
    pub resized: bool,
    pub drawn: bool,
}

#[derive(Debug)]
pub struct Engine {
    states: Vec<AvatarState>,
    active: usize,
    viewport: (u32, u32),
    resize_pending: bool,
    background: [u8; 4],
    clock: FrameClock,
    last_tick: Duration,
    network: Option<ConnectionMultiplexer>,
    poll_timeout: Duration,
}

impl Engine {
    /// Creates an engine over `states` with state 0 active. At least one
    /// state is required.
    pub fn new(states: Vec<AvatarState>, viewport: (u32, u32), background: [u8; 4]) -> Result<Self> {
        if states.is_empty() {
            return Err(PngTuberError::msg("no avatar states configured"));
        }
        Ok(Self {
            states,
            active: 0,
            viewport,
            resize_pending: false,
            background,
            clock: FrameClock::start(),
            last_tick: Duration::ZERO,
            network: None,
            poll_timeout: POLL_TIMEOUT,
        })
    }

    /// Loads every state and binds the command listener.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let viewport = (config.app.width, config.app.height);
        let states = AvatarState::load_all(config, viewport)?;
        let background = parse_color(&config.app.background_color)?;
        let engine = Self::new(states, viewport, background)?;
        let network = ConnectionMultiplexer::bind(&config.app.address(), config.app.max_line_bytes)?;
        Ok(engine.with_network(network))
    }

    pub fn with_network(mut self, network: ConnectionMultiplexer) -> Self {
        self.network = Some(network);
        self
    }

    /// Replaces the time source; the next tick measures from the new clock.
    pub fn with_clock(mut self, clock: FrameClock) -> Self {
        self.last_tick = clock.now();
        self.clock = clock;
        self
    }

    pub fn clock_mut(&mut self) -> &mut FrameClock {
        &mut self.clock
    }

    pub fn network(&self) -> Option<&ConnectionMultiplexer> {
        self.network.as_ref()
    }

    pub fn states(&self) -> &[AvatarState] {
        &self.states
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_state(&self) -> &AvatarState {
        &self.states[self.active]
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Switches the active state and schedules a resize to the viewport.
    /// Out-of-range indices leave the selection untouched.
    pub fn select_state(&mut self, index: usize) -> std::result::Result<(), ProtocolError> {
        if index >= self.states.len() {
            return Err(ProtocolError::OutOfRange {
                index,
                available: self.states.len(),
            });
        }
        if index != self.active {
            tracing::info!(index, state = %self.states[index].name(), "switching state");
        }
        self.active = index;
        self.resize_pending = true;
        Ok(())
    }

    /// Forwards speech to the expressive sprite of the active state.
    pub fn talk(&mut self) {
        self.states[self.active].talk();
    }

    pub fn dispatch(&mut self, command: Command) -> std::result::Result<(), ProtocolError> {
        match command {
            Command::Talk => {
                self.talk();
                Ok(())
            }
            Command::SetState(index) => self.select_state(index),
        }
    }

    /// Decodes and dispatches one protocol line.
    pub fn handle_line(&mut self, line: &[u8]) -> std::result::Result<Command, ProtocolError> {
        let command = decode(line)?;
        self.dispatch(command)?;
        Ok(command)
    }

    /// Records a new window size; the active state is resized this tick.
    pub fn resize_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        self.resize_pending = true;
    }

    /// The active state's drawables for the current frame.
    pub fn compose(&self) -> Composition<'_> {
        Composition::of_state(self.active_state(), self.background, self.viewport)
    }

    /// Runs one frame. Nothing in here aborts the loop: a failed poll skips
    /// this tick's network work and a failed draw is logged.
    pub fn tick(&mut self, renderer: &mut impl Renderer) -> TickReport {
        let mut report = TickReport::default();

        let timeout = self.poll_timeout;
        let outcome = match self.network.as_mut().map(|network| network.poll(timeout)) {
            Some(Ok(outcome)) => outcome,
            Some(Err(err)) => {
                tracing::warn!(%err, "socket poll failed");
                PollOutcome::default()
            }
            None => PollOutcome::default(),
        };
        report.opened = outcome.opened;
        report.closed = outcome.closed;
        report.rejected = outcome.rejected.len();

        for (connection, line) in outcome.lines {
            match self.handle_line(&line) {
                Ok(command) => {
                    tracing::debug!(connection, %command, "applied command");
                    report.commands += 1;
                }
                Err(err) => {
                    tracing::warn!(connection, %err, "dropping command");
                    report.rejected += 1;
                }
            }
        }

        let now = self.clock.now();
        let delta = now.saturating_sub(self.last_tick);
        self.last_tick = now;
        self.states[self.active].advance(delta);

        if self.resize_pending {
            self.resize_pending = false;
            let viewport = self.viewport;
            let rendered = self.states[self.active].resize(viewport);
            tracing::debug!(?viewport, rendered, "applied resize");
            report.resized = true;
        }

        match renderer.draw(&self.compose()) {
            Ok(()) => report.drawn = true,
            Err(err) => tracing::warn!(%err, "failed to draw frame"),
        }
        report
    }
}
