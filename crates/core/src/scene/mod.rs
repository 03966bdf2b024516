use std::{path::Path, time::Duration};

use image::RgbaImage;

use crate::{
    assets::{self, ImageSource, Sprite},
    config::{AppConfig, LayerConfig, LoopPause, StateConfig},
    timeline::LoopScheduler,
    tuber::PngTuberState,
    Result,
};

/// Result of a resize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Pixels were re-rendered at the given size.
    Applied((u32, u32)),
    /// The request matched the previous one; nothing was recomputed.
    Unchanged,
}

/// A still or looping image composited behind or in front of the sprite.
#[derive(Debug)]
pub struct Layer {
    name: String,
    sprite: Sprite,
    last_request: (u32, u32),
    scheduler: LoopScheduler,
}

impl Layer {
    pub fn new(
        name: impl Into<String>,
        source: ImageSource,
        loops: i32,
        pause: Option<LoopPause>,
        size: (u32, u32),
    ) -> Self {
        Self::with_scheduler(name, source, loops, LoopScheduler::new(pause), size)
    }

    pub fn with_scheduler(
        name: impl Into<String>,
        source: ImageSource,
        loops: i32,
        scheduler: LoopScheduler,
        size: (u32, u32),
    ) -> Self {
        let mut sprite = Sprite::new(source, loops);
        sprite.fit(size);
        Self {
            name: name.into(),
            sprite,
            last_request: size,
            scheduler,
        }
    }

    /// Loads the layer's image from disk and scales it to `size`.
    pub fn load(name: &str, config: &LayerConfig, size: (u32, u32)) -> Result<Self> {
        let source = assets::load_relative(&config.base_dir, &config.image)?;
        tracing::info!(layer = name, image = %config.image, "adding layer");
        Ok(Self::new(
            name,
            source,
            config.effective_loops(),
            config.loop_pause,
            size,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &RgbaImage {
        self.sprite.image()
    }

    pub fn sprite(&self) -> &Sprite {
        &self.sprite
    }

    pub fn scheduler(&self) -> &LoopScheduler {
        &self.scheduler
    }

    /// Fits the layer inside `size` unless that exact size was the last
    /// request.
    pub fn resize(&mut self, size: (u32, u32)) -> ResizeOutcome {
        if self.last_request == size {
            tracing::debug!(layer = %self.name, ?size, "ignoring resize request, size did not change");
            return ResizeOutcome::Unchanged;
        }
        self.last_request = size;
        ResizeOutcome::Applied(self.sprite.fit(size))
    }

    /// Plays the animation and restarts it once the configured pause after
    /// a finished playthrough has elapsed.
    pub fn update(&mut self, now: Duration) {
        if let Some(ended_at) = self.sprite.advance(now) {
            if self.scheduler.should_restart(ended_at, now) {
                self.sprite.restart(now);
                self.sprite.advance(now);
            }
        }
    }
}

/// One selectable scene: back layers, the expressive sprite, front layers.
///
/// Every state keeps its own local clock that only moves while the state is
/// active, so blink, talk and loop timers freeze while another state is
/// selected.
#[derive(Debug)]
pub struct AvatarState {
    name: String,
    back: Vec<Layer>,
    tuber: PngTuberState,
    front: Vec<Layer>,
    local_time: Duration,
}

/// Loads the four variant images, decoding a file shared by several slots
/// only once.
fn load_variants(
    files: [Option<&str>; 4],
    mut load: impl FnMut(&str) -> Result<ImageSource>,
) -> Result<[Option<ImageSource>; 4]> {
    let mut sources: [Option<ImageSource>; 4] = Default::default();
    for (index, file) in files.iter().enumerate() {
        let Some(file) = file else { continue };
        let earlier = files[..index]
            .iter()
            .position(|other| *other == Some(*file))
            .and_then(|slot| sources[slot].clone());
        sources[index] = Some(match earlier {
            Some(source) => source,
            None => load(file)?,
        });
    }
    Ok(sources)
}

impl AvatarState {
    pub fn new(
        name: impl Into<String>,
        back: Vec<Layer>,
        tuber: PngTuberState,
        front: Vec<Layer>,
    ) -> Self {
        Self {
            name: name.into(),
            back,
            tuber,
            front,
            local_time: Duration::ZERO,
        }
    }

    /// Builds a state from configuration, loading every referenced image.
    pub fn load(config: &AppConfig, state: &StateConfig, size: (u32, u32)) -> Result<Self> {
        tracing::info!(state = %state.name, "loading state");
        let load_layers = |names: &[String]| -> Result<Vec<Layer>> {
            names
                .iter()
                .map(|name| Layer::load(name, config.layer(name)?, size))
                .collect()
        };

        let back = load_layers(&state.layers_back)?;
        let base_dir = Path::new(&state.base_dir);
        let sources = load_variants(state.variant_files(), |file| {
            assets::load_relative(base_dir, file)
        })?;
        let tuber = PngTuberState::new(sources, size);
        let front = load_layers(&state.layers)?;

        Ok(Self::new(state.name.clone(), back, tuber, front))
    }

    /// Loads every configured state in declaration order.
    pub fn load_all(config: &AppConfig, size: (u32, u32)) -> Result<Vec<Self>> {
        config
            .states
            .iter()
            .map(|state| Self::load(config, state, size))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn back_layers(&self) -> &[Layer] {
        &self.back
    }

    pub fn front_layers(&self) -> &[Layer] {
        &self.front
    }

    pub fn tuber(&self) -> &PngTuberState {
        &self.tuber
    }

    /// Time this state has spent active.
    pub fn local_time(&self) -> Duration {
        self.local_time
    }

    pub fn talk(&mut self) {
        self.tuber.talk(self.local_time);
    }

    /// Moves the local clock by `delta` and advances every timer.
    pub fn advance(&mut self, delta: Duration) {
        self.local_time += delta;
        let now = self.local_time;
        for layer in self.back.iter_mut().chain(self.front.iter_mut()) {
            layer.update(now);
        }
        self.tuber.update(now);
    }

    /// Resizes every layer and the sprite. Returns how many parts were
    /// actually re-rendered.
    pub fn resize(&mut self, size: (u32, u32)) -> usize {
        let layers = self
            .back
            .iter_mut()
            .chain(self.front.iter_mut())
            .map(|layer| layer.resize(size))
            .filter(|outcome| matches!(outcome, ResizeOutcome::Applied(_)))
            .count();
        layers + usize::from(self.tuber.resize(size))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assets::tests::{frames, solid};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    pub(crate) fn still_layer(name: &str, width: u32, height: u32, size: (u32, u32)) -> Layer {
        Layer::new(
            name,
            ImageSource::Static(solid(width, height, 1)),
            -1,
            None,
            size,
        )
    }

    pub(crate) fn simple_state(name: &str, size: (u32, u32)) -> AvatarState {
        let tuber = PngTuberState::with_seed(
            [
                Some(ImageSource::Static(solid(80, 60, 10))),
                Some(ImageSource::Static(solid(80, 60, 20))),
                Some(ImageSource::Static(solid(80, 60, 30))),
                Some(ImageSource::Static(solid(80, 60, 40))),
            ],
            size,
            11,
        );
        AvatarState::new(
            name,
            vec![still_layer("back", 80, 60, size)],
            tuber,
            vec![still_layer("front", 80, 40, size)],
        )
    }

    #[test]
    fn resizes_to_uniform_scale() {
        let mut layer = still_layer("sky", 800, 600, (800, 600));
        assert_eq!(layer.resize((400, 300)), ResizeOutcome::Applied((400, 300)));
        assert_eq!(layer.image().dimensions(), (400, 300));
    }

    #[test]
    fn smaller_ratio_wins_on_resize() {
        let mut layer = still_layer("banner", 800, 400, (800, 400));
        assert_eq!(layer.resize((400, 300)), ResizeOutcome::Applied((400, 200)));
        assert_eq!(layer.image().dimensions(), (400, 200));
    }

    #[test]
    fn repeated_resize_is_a_no_op() {
        let mut layer = still_layer("sky", 800, 600, (800, 600));
        assert_eq!(layer.resize((800, 600)), ResizeOutcome::Unchanged);
        layer.resize((400, 300));
        let before = layer.image().as_ptr();
        assert_eq!(layer.resize((400, 300)), ResizeOutcome::Unchanged);
        assert_eq!(layer.image().as_ptr(), before);
    }

    #[test]
    fn construction_fits_initial_size() {
        let layer = still_layer("sky", 800, 400, (400, 300));
        assert_eq!(layer.image().dimensions(), (400, 200));
    }

    fn looping_layer(pause: Option<LoopPause>) -> Layer {
        let loops = if pause.is_some() { 0 } else { -1 };
        Layer::with_scheduler(
            "sparkle",
            ImageSource::Animated(frames(&[100, 100])),
            loops,
            LoopScheduler::with_seed(pause, 3),
            (8, 4),
        )
    }

    fn frame_of(layer: &Layer) -> usize {
        match layer.sprite() {
            Sprite::Looping(animation) => animation.current_frame(),
            Sprite::Static { .. } => unreachable!("layer should be animated"),
        }
    }

    #[test]
    fn loops_forever_without_pause() {
        let mut layer = looping_layer(None);
        layer.update(ms(150));
        assert_eq!(frame_of(&layer), 1);
        layer.update(ms(1050));
        assert_eq!(frame_of(&layer), 0);
    }

    #[test]
    fn fixed_pause_holds_last_frame() {
        let mut layer = looping_layer(Some(LoopPause::Fixed(500)));
        layer.update(ms(150));
        assert_eq!(frame_of(&layer), 1);

        // Playthrough ended at 200 ms; hold until 700 ms.
        layer.update(ms(300));
        assert_eq!(frame_of(&layer), 1);
        assert!(layer.scheduler().is_waiting());
        layer.update(ms(699));
        assert_eq!(frame_of(&layer), 1);

        layer.update(ms(700));
        assert_eq!(frame_of(&layer), 0);
        assert!(!layer.scheduler().is_waiting());

        layer.update(ms(850));
        assert_eq!(frame_of(&layer), 1);
    }

    #[test]
    fn range_pause_stays_within_bounds() {
        let mut layer = looping_layer(Some(LoopPause::Range(100, 300)));
        let mut now = Duration::ZERO;
        let mut restarts = 0;
        let mut waiting = false;

        while now < ms(5000) {
            layer.update(now);
            let pause = layer.scheduler().current_pause();
            assert!(pause >= ms(100) && pause <= ms(300));
            if waiting && !layer.scheduler().is_waiting() {
                restarts += 1;
            }
            waiting = layer.scheduler().is_waiting();
            now += ms(10);
        }

        // Each cycle is 200 ms of playback plus at most 300 ms of pause.
        assert!(restarts >= 9, "only {restarts} restarts");
    }

    #[test]
    fn inactive_time_does_not_advance_timers() {
        let mut state = simple_state("idle", (80, 60));
        state.advance(ms(1000));
        assert_eq!(state.local_time(), ms(1000));
        state.talk();
        state.advance(ms(0));
        assert!(state.tuber().is_talking());

        // Whatever wall time passes while inactive, only advance() moves us.
        state.advance(ms(249));
        assert!(state.tuber().is_talking());
        state.advance(ms(1));
        assert!(!state.tuber().is_talking());
    }

    #[test]
    fn state_resize_counts_rendered_parts() {
        let mut state = simple_state("idle", (80, 60));
        assert_eq!(state.resize((80, 60)), 0);
        assert_eq!(state.resize((40, 30)), 3);
        assert_eq!(state.back_layers()[0].image().dimensions(), (40, 30));
        assert_eq!(state.front_layers()[0].image().dimensions(), (40, 20));
        assert_eq!(state.resize((40, 30)), 0);
    }

    #[test]
    fn loads_state_from_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().display().to_string();
        solid(100, 50, 1).save(dir.path().join("open.png")).unwrap();
        solid(100, 50, 2).save(dir.path().join("closed.png")).unwrap();
        solid(20, 20, 3).save(dir.path().join("hat.png")).unwrap();

        let json = serde_json::json!({
            "states": [{
                "name": "idle",
                "base_dir": base,
                "eo_mc": "open.png",
                "ec_mc": "closed.png",
                "layers": ["hat"]
            }],
            "layers": { "hat": { "base_dir": base, "image": "hat.png" } }
        });
        let config = AppConfig::from_json(&json.to_string()).unwrap();

        let states = AvatarState::load_all(&config, (200, 100)).unwrap();
        assert_eq!(states.len(), 1);
        let state = &states[0];
        assert_eq!(state.name(), "idle");
        assert!(state.back_layers().is_empty());
        assert_eq!(state.front_layers()[0].name(), "hat");
        assert_eq!(state.front_layers()[0].image().dimensions(), (100, 100));
        assert_eq!(
            state.tuber().image().map(|image| image.dimensions()),
            Some((200, 100))
        );
    }

    #[test]
    fn unknown_layer_fails_the_load() {
        let config = AppConfig::from_json(
            r#"{ "states": [{ "name": "idle", "layers": ["ghost"] }] }"#,
        )
        .unwrap();
        let err = AvatarState::load_all(&config, (10, 10)).unwrap_err();
        assert!(format!("{err}").contains("ghost"));
    }

    #[test]
    fn shared_variant_file_is_decoded_once() {
        let mut decoded = Vec::new();
        let sources = load_variants([Some("face.png"); 4], |file| {
            decoded.push(file.to_owned());
            Ok(ImageSource::Static(solid(4, 4, 7)))
        })
        .unwrap();
        assert_eq!(decoded, vec!["face.png".to_owned()]);
        assert!(sources.iter().all(Option::is_some));

        decoded.clear();
        load_variants(
            [Some("open.png"), Some("shut.png"), Some("open.png"), None],
            |file| {
                decoded.push(file.to_owned());
                Ok(ImageSource::Static(solid(4, 4, 7)))
            },
        )
        .unwrap();
        assert_eq!(decoded, vec!["open.png".to_owned(), "shut.png".to_owned()]);
    }

    #[test]
    fn missing_image_fails_the_load() {
        let config = AppConfig::from_json(
            r#"{ "states": [{ "name": "idle", "base_dir": "nowhere", "image": "face.png" }] }"#,
        )
        .unwrap();
        assert!(AvatarState::load_all(&config, (10, 10)).is_err());
    }
}
