//! The expressive sprite: eye and mouth variants driven by blink and talk
//! timers.
//!
//! Eyes alternate between [`Eyes::Open`] for a random 4-6 s and
//! [`Eyes::Closed`] for 250 ms. Independently, [`PngTuberState::talk`] opens
//! the mouth until no further call arrives for 250 ms. The displayed image is
//! picked from the four variants by (eyes, mouth); a missing variant leaves
//! the previous image on screen.

use std::time::Duration;

use rand::{rngs::StdRng, SeedableRng};

use crate::{
    assets::{ImageSource, Sprite},
    timeline::random_millis,
};

const BLINK_INTERVAL_MIN_MS: u64 = 4000;
const BLINK_INTERVAL_MAX_MS: u64 = 6000;
const BLINK_DURATION: Duration = Duration::from_millis(250);
const TALK_COOLDOWN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eyes {
    Open,
    Closed,
}

/// Index into the variant table for an (eyes, talking) combination.
fn variant_index(eyes: Eyes, talking: bool) -> usize {
    match (eyes, talking) {
        (Eyes::Open, false) => 0,
        (Eyes::Closed, false) => 1,
        (Eyes::Open, true) => 2,
        (Eyes::Closed, true) => 3,
    }
}

#[derive(Debug)]
pub struct PngTuberState {
    /// Ordered eyes-open/mouth-closed, eyes-closed/mouth-closed,
    /// eyes-open/mouth-open, eyes-closed/mouth-open.
    variants: [Option<Sprite>; 4],
    displayed: Option<usize>,
    eyes: Eyes,
    /// When the eyes last changed.
    anchor: Duration,
    next_blink: Duration,
    talking: bool,
    talk_started: Duration,
    needs_refresh: bool,
    last_request: (u32, u32),
    rng: StdRng,
}

impl PngTuberState {
    /// Builds the sprite from up to four decoded variants and scales them to
    /// fit `size`.
    pub fn new(sources: [Option<ImageSource>; 4], size: (u32, u32)) -> Self {
        Self::with_rng(sources, size, StdRng::from_entropy())
    }

    pub fn with_seed(sources: [Option<ImageSource>; 4], size: (u32, u32), seed: u64) -> Self {
        Self::with_rng(sources, size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sources: [Option<ImageSource>; 4], size: (u32, u32), mut rng: StdRng) -> Self {
        let variants = sources.map(|source| {
            source.map(|source| {
                let mut sprite = Sprite::new(source, -1);
                sprite.fit(size);
                sprite
            })
        });
        let displayed = variants.iter().position(Option::is_some);
        let next_blink = random_millis(&mut rng, BLINK_INTERVAL_MIN_MS, BLINK_INTERVAL_MAX_MS);

        Self {
            variants,
            displayed,
            eyes: Eyes::Open,
            anchor: Duration::ZERO,
            next_blink,
            talking: false,
            talk_started: Duration::ZERO,
            needs_refresh: false,
            last_request: size,
            rng,
        }
    }

    pub fn eyes(&self) -> Eyes {
        self.eyes
    }

    pub fn is_talking(&self) -> bool {
        self.talking
    }

    /// Time the eyes stay open before the next blink.
    pub fn next_blink(&self) -> Duration {
        self.next_blink
    }

    /// Variant currently on screen, if any variant exists at all.
    pub fn displayed_variant(&self) -> Option<usize> {
        self.displayed
    }

    pub fn image(&self) -> Option<&image::RgbaImage> {
        let index = self.displayed?;
        self.variants[index].as_ref().map(Sprite::image)
    }

    /// Marks speech at `now`. Repeated calls only extend the cooldown.
    pub fn talk(&mut self, now: Duration) {
        if !self.talking {
            tracing::debug!("talking");
            self.needs_refresh = true;
        }
        self.talking = true;
        self.talk_started = now;
    }

    /// Advances both timers to `now` and picks the image to show.
    pub fn update(&mut self, now: Duration) {
        if self.talking && now.saturating_sub(self.talk_started) >= TALK_COOLDOWN {
            tracing::debug!("stop talking");
            self.talking = false;
            self.needs_refresh = true;
        }

        let since_change = now.saturating_sub(self.anchor);
        match self.eyes {
            Eyes::Open if since_change >= self.next_blink => {
                self.eyes = Eyes::Closed;
                self.anchor = now;
                self.needs_refresh = true;
                tracing::debug!("eyes closed");
            }
            Eyes::Closed if since_change >= BLINK_DURATION => {
                self.eyes = Eyes::Open;
                self.anchor = now;
                self.next_blink =
                    random_millis(&mut self.rng, BLINK_INTERVAL_MIN_MS, BLINK_INTERVAL_MAX_MS);
                self.needs_refresh = true;
                tracing::debug!(next_blink_ms = self.next_blink.as_millis() as u64, "eyes opened");
            }
            _ => {}
        }

        for sprite in self.variants.iter_mut().flatten() {
            sprite.advance(now);
        }

        if self.needs_refresh {
            self.needs_refresh = false;
            let wanted = variant_index(self.eyes, self.talking);
            if self.variants[wanted].is_some() {
                self.displayed = Some(wanted);
            }
        }
    }

    /// Rescales every variant to fit `size`. Returns `false` when the request
    /// matches the previous one and nothing was done.
    pub fn resize(&mut self, size: (u32, u32)) -> bool {
        if self.last_request == size {
            tracing::debug!(?size, "ignoring resize request, size did not change");
            return false;
        }
        self.last_request = size;
        for sprite in self.variants.iter_mut().flatten() {
            sprite.fit(size);
        }
        true
    }
}
