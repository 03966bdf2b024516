use std::time::{Duration, Instant};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::LoopPause;

/// Monotonic time source shared by every timer in the engine.
///
/// Timestamps are durations since the clock was created. The manual variant
/// only moves when [`FrameClock::advance`] is called, which keeps blink, talk
/// and loop timing deterministic under test.
#[derive(Debug, Clone)]
pub enum FrameClock {
    Realtime(Instant),
    Manual(Duration),
}

impl FrameClock {
    pub fn start() -> Self {
        Self::Realtime(Instant::now())
    }

    pub fn manual() -> Self {
        Self::Manual(Duration::ZERO)
    }

    pub fn now(&self) -> Duration {
        match self {
            FrameClock::Realtime(started) => started.elapsed(),
            FrameClock::Manual(now) => *now,
        }
    }

    /// Moves a manual clock forward. Wall-clock time cannot be steered, so
    /// this is a no-op for [`FrameClock::Realtime`].
    pub fn advance(&mut self, delta: Duration) {
        if let FrameClock::Manual(now) = self {
            *now += delta;
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Draws a uniformly distributed duration from an inclusive millisecond range.
pub fn random_millis(rng: &mut StdRng, lo: u64, hi: u64) -> Duration {
    Duration::from_millis(rng.gen_range(lo..=hi))
}

/// Decides when a finished playthrough of a looping layer may restart.
///
/// Holds the configured pause, the pause currently in effect and the moment
/// the last playthrough ended. Range pauses are sampled once at construction
/// and again every time a pause completes, so consecutive waits generally
/// differ.
#[derive(Debug)]
pub struct LoopScheduler {
    pause: Option<LoopPause>,
    current: Duration,
    ended_at: Option<Duration>,
    rng: StdRng,
}

impl LoopScheduler {
    pub fn new(pause: Option<LoopPause>) -> Self {
        Self::with_rng(pause, StdRng::from_entropy())
    }

    pub fn with_seed(pause: Option<LoopPause>, seed: u64) -> Self {
        Self::with_rng(pause, StdRng::seed_from_u64(seed))
    }

    fn with_rng(pause: Option<LoopPause>, mut rng: StdRng) -> Self {
        let current = Self::sample(pause, &mut rng);
        Self {
            pause,
            current,
            ended_at: None,
            rng,
        }
    }

    fn sample(pause: Option<LoopPause>, rng: &mut StdRng) -> Duration {
        match pause {
            None => Duration::ZERO,
            Some(LoopPause::Fixed(ms)) => Duration::from_millis(ms),
            Some(LoopPause::Range(lo, hi)) => random_millis(rng, lo, hi),
        }
    }

    /// Pause that applies to the playthrough that ended last (or will end next).
    pub fn current_pause(&self) -> Duration {
        self.current
    }

    pub fn is_waiting(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Called every frame while the playthrough is over. `ended_at` is when
    /// the final frame finished; it is latched on the first call. Returns
    /// `true` when the layer should restart now, in which case the next pause
    /// has already been drawn.
    pub fn should_restart(&mut self, ended_at: Duration, now: Duration) -> bool {
        let ended_at = *self.ended_at.get_or_insert(ended_at);
        if now.saturating_sub(ended_at) < self.current {
            return false;
        }

        self.ended_at = None;
        if let Some(LoopPause::Range(..)) = self.pause {
            self.current = Self::sample(self.pause, &mut self.rng);
            tracing::debug!(pause_ms = self.current.as_millis() as u64, "new loop pause");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn manual_clock_advances_only_on_request() {
        let mut clock = FrameClock::manual();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(ms(16));
        clock.advance(ms(4));
        assert_eq!(clock.now(), ms(20));
    }

    #[test]
    fn realtime_clock_is_monotonic() {
        let clock = FrameClock::start();
        let first = clock.now();
        assert!(clock.now() >= first);
    }

    #[test]
    fn restarts_immediately_without_pause() {
        let mut scheduler = LoopScheduler::new(None);
        assert!(scheduler.should_restart(ms(1000), ms(1000)));
        assert!(!scheduler.is_waiting());
    }

    #[test]
    fn waits_for_fixed_pause_after_loop_end() {
        let mut scheduler = LoopScheduler::new(Some(LoopPause::Fixed(300)));
        assert!(!scheduler.should_restart(ms(1000), ms(1000)));
        assert!(scheduler.is_waiting());
        // The end stamp is latched, later reports do not move it.
        assert!(!scheduler.should_restart(ms(1200), ms(1299)));
        assert!(scheduler.should_restart(ms(1299), ms(1300)));
        assert_eq!(scheduler.current_pause(), ms(300));
    }

    #[test]
    fn range_pause_is_redrawn_after_each_wait() {
        let mut scheduler = LoopScheduler::with_seed(Some(LoopPause::Range(100, 5000)), 7);
        let mut seen = Vec::new();
        let mut now = Duration::ZERO;

        for _ in 0..8 {
            let pause = scheduler.current_pause();
            assert!(pause >= ms(100) && pause <= ms(5000));
            seen.push(pause);

            let ended = now;
            assert!(pause.is_zero() || !scheduler.should_restart(ended, now));
            now = ended + pause;
            assert!(scheduler.should_restart(ended, now));
        }

        seen.dedup();
        assert!(seen.len() > 1, "pauses should vary: {seen:?}");
    }

    #[test]
    fn degenerate_range_is_fixed() {
        let scheduler = LoopScheduler::with_seed(Some(LoopPause::Range(40, 40)), 1);
        assert_eq!(scheduler.current_pause(), ms(40));
    }
}
