//! Image resources: decoding, aspect-preserving scaling and frame playback.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use image::{
    codecs::{gif::GifDecoder, png::PngDecoder},
    imageops::{self, FilterType},
    AnimationDecoder, DynamicImage, Frames, RgbaImage,
};

use crate::{PngTuberError, Result};

/// Extensions decoded frame by frame.
const ANIMATED_EXTENSIONS: [&str; 2] = ["gif", "apng"];
/// Delay used for frames that declare none.
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// One decoded frame of an animated image.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub image: RgbaImage,
    pub delay: Duration,
}

/// Unscaled pixels as decoded from disk.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Static(RgbaImage),
    Animated(Vec<AnimationFrame>),
}

impl ImageSource {
    /// Builds an animated source, collapsing single-frame animations.
    pub fn animated(mut frames: Vec<AnimationFrame>) -> Result<Self> {
        match frames.len() {
            0 => Err(PngTuberError::msg("animation contains no frames")),
            1 => Ok(Self::Static(frames.remove(0).image)),
            _ => Ok(Self::Animated(frames)),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ImageSource::Static(image) => image.dimensions(),
            ImageSource::Animated(frames) => frames[0].image.dimensions(),
        }
    }
}

/// Resolves `file` relative to `base_dir` and decodes it.
pub fn load_relative(base_dir: impl AsRef<Path>, file: &str) -> Result<ImageSource> {
    load_image(base_dir.as_ref().join(file))
}

/// Decodes an image file. `.gif` and `.apng` files keep all their frames,
/// everything else is read as a still image.
pub fn load_image(path: impl Into<PathBuf>) -> Result<ImageSource> {
    let path = path.into();
    let source = decode(&path).map_err(|err| {
        PngTuberError::msg(format!("failed to load image `{}`: {err}", path.display()))
    })?;
    let (width, height) = source.dimensions();
    tracing::info!(path = %path.display(), width, height, "loaded image");
    Ok(source)
}

fn decode(path: &Path) -> Result<ImageSource> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| ANIMATED_EXTENSIONS.contains(&ext.as_str()));

    match extension.as_deref() {
        Some("gif") => {
            let decoder = GifDecoder::new(BufReader::new(File::open(path)?))?;
            collect_frames(decoder.into_frames())
        }
        Some(_) => {
            let decoder = PngDecoder::new(BufReader::new(File::open(path)?))?;
            if decoder.is_apng()? {
                collect_frames(decoder.apng()?.into_frames())
            } else {
                Ok(ImageSource::Static(
                    DynamicImage::from_decoder(decoder)?.to_rgba8(),
                ))
            }
        }
        None => Ok(ImageSource::Static(image::open(path)?.to_rgba8())),
    }
}

fn collect_frames(frames: Frames<'_>) -> Result<ImageSource> {
    let frames = frames
        .collect_frames()?
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let millis = if denom == 0 { 0 } else { numer / denom };
            let delay = if millis == 0 {
                DEFAULT_FRAME_DELAY
            } else {
                Duration::from_millis(u64::from(millis))
            };
            AnimationFrame {
                image: frame.into_buffer(),
                delay,
            }
        })
        .collect();
    ImageSource::animated(frames)
}

/// Largest size with the original aspect ratio that fits inside `target`.
///
/// The ratio is `min(target_w / w, target_h / h)`; both sides are rounded and
/// never drop below one pixel.
pub fn fit_within(original: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (width, height) = (f64::from(original.0.max(1)), f64::from(original.1.max(1)));
    let ratio = (f64::from(target.0) / width).min(f64::from(target.1) / height);
    let scale = |side: f64| ((side * ratio).round() as u32).max(1);
    (scale(width), scale(height))
}

pub fn scale(image: &RgbaImage, (width, height): (u32, u32)) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Playback state of an animated image.
#[derive(Debug, Clone)]
pub struct Animation {
    frames: Vec<AnimationFrame>,
    scaled: Vec<RgbaImage>,
    /// Extra passes per playthrough; negative plays forever.
    loops: i32,
    started_at: Duration,
    current: usize,
}

impl Animation {
    fn new(frames: Vec<AnimationFrame>, loops: i32) -> Self {
        let scaled = frames.iter().map(|frame| frame.image.clone()).collect();
        Self {
            frames,
            scaled,
            loops,
            started_at: Duration::ZERO,
            current: 0,
        }
    }

    /// Duration of a single pass over every frame.
    pub fn pass_duration(&self) -> Duration {
        self.frames.iter().map(|frame| frame.delay).sum()
    }

    /// Duration of a whole playthrough, `None` when it never ends.
    pub fn playthrough(&self) -> Option<Duration> {
        let passes = u32::try_from(self.loops).ok()?.saturating_add(1);
        Some(self.pass_duration() * passes)
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    /// Shows the frame for `now`. Once the playthrough is over the last frame
    /// stays up and the moment it ended is returned.
    pub fn advance(&mut self, now: Duration) -> Option<Duration> {
        let elapsed = now.saturating_sub(self.started_at);
        if let Some(playthrough) = self.playthrough() {
            if elapsed >= playthrough {
                self.current = self.frames.len() - 1;
                return Some(self.started_at + playthrough);
            }
        }

        let pass = self.pass_duration().as_nanos().max(1);
        let mut offset = elapsed.as_nanos() % pass;
        self.current = self.frames.len() - 1;
        for (index, frame) in self.frames.iter().enumerate() {
            let delay = frame.delay.as_nanos();
            if offset < delay {
                self.current = index;
                break;
            }
            offset -= delay;
        }
        None
    }

    pub fn restart(&mut self, now: Duration) {
        self.started_at = now;
        self.current = 0;
    }
}

/// A still or looping image together with its current scaled rendition.
#[derive(Debug, Clone)]
pub enum Sprite {
    Static {
        original: RgbaImage,
        scaled: RgbaImage,
    },
    Looping(Animation),
}

impl Sprite {
    /// Wraps a decoded source. `loops` only matters for animations.
    pub fn new(source: ImageSource, loops: i32) -> Self {
        match source {
            ImageSource::Static(original) => Sprite::Static {
                scaled: original.clone(),
                original,
            },
            ImageSource::Animated(frames) => Sprite::Looping(Animation::new(frames, loops)),
        }
    }

    pub fn original_size(&self) -> (u32, u32) {
        match self {
            Sprite::Static { original, .. } => original.dimensions(),
            Sprite::Looping(animation) => animation.frames[0].image.dimensions(),
        }
    }

    /// Re-renders every frame from the original pixels at `size`.
    pub fn rescale(&mut self, size: (u32, u32)) {
        match self {
            Sprite::Static { original, scaled } => *scaled = scale(original, size),
            Sprite::Looping(animation) => {
                animation.scaled = animation
                    .frames
                    .iter()
                    .map(|frame| scale(&frame.image, size))
                    .collect();
            }
        }
    }

    /// Fits the sprite inside `target` keeping its aspect ratio.
    pub fn fit(&mut self, target: (u32, u32)) -> (u32, u32) {
        let size = fit_within(self.original_size(), target);
        self.rescale(size);
        size
    }

    /// Image to draw this frame.
    pub fn image(&self) -> &RgbaImage {
        match self {
            Sprite::Static { scaled, .. } => scaled,
            Sprite::Looping(animation) => &animation.scaled[animation.current],
        }
    }

    /// Advances playback; see [`Animation::advance`]. Still images never end.
    pub fn advance(&mut self, now: Duration) -> Option<Duration> {
        match self {
            Sprite::Static { .. } => None,
            Sprite::Looping(animation) => animation.advance(now),
        }
    }

    pub fn restart(&mut self, now: Duration) {
        if let Sprite::Looping(animation) = self {
            animation.restart(now);
        }
    }
}
