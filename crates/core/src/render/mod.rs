use std::path::Path;

use image::{imageops, Rgba, RgbaImage};

use crate::{scene::AvatarState, Result};

/// A single image to draw and where its top-left corner goes.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem<'a> {
    pub image: &'a RgbaImage,
    pub position: (i64, i64),
}

/// Everything the window has to show for one frame, back to front.
#[derive(Debug, Clone)]
pub struct Composition<'a> {
    pub background: [u8; 4],
    pub viewport: (u32, u32),
    pub items: Vec<DrawItem<'a>>,
}

impl<'a> Composition<'a> {
    /// Collects the back layers, the expressive sprite and the front layers
    /// of `state` in drawing order.
    pub fn of_state(state: &'a AvatarState, background: [u8; 4], viewport: (u32, u32)) -> Self {
        let at_origin = |image: &'a RgbaImage| DrawItem {
            image,
            position: (0, 0),
        };
        let items = state
            .back_layers()
            .iter()
            .map(|layer| at_origin(layer.image()))
            .chain(state.tuber().image().map(at_origin))
            .chain(state.front_layers().iter().map(|layer| at_origin(layer.image())))
            .collect();

        Self {
            background,
            viewport,
            items,
        }
    }
}

/// Rendering backend abstraction. The engine hands it one [`Composition`]
/// per tick.
pub trait Renderer {
    fn draw(&mut self, frame: &Composition<'_>) -> Result<()>;
}

/// Software backend that blends every frame onto an RGBA canvas.
#[derive(Debug, Default)]
pub struct Compositor {
    canvas: RgbaImage,
    frames_drawn: u64,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently composed frame.
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.canvas.save(path.as_ref())?;
        Ok(())
    }
}

impl Renderer for Compositor {
    fn draw(&mut self, frame: &Composition<'_>) -> Result<()> {
        let (width, height) = frame.viewport;
        let background = Rgba(frame.background);
        if self.canvas.dimensions() != (width, height) {
            self.canvas = RgbaImage::from_pixel(width, height, background);
        } else {
            self.canvas.pixels_mut().for_each(|pixel| *pixel = background);
        }

        for item in &frame.items {
            imageops::overlay(&mut self.canvas, item.image, item.position.0, item.position.1);
        }
        self.frames_drawn += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::tests::simple_state;

    #[test]
    fn orders_items_back_to_front() {
        let state = simple_state("idle", (80, 60));
        let frame = Composition::of_state(&state, [0, 0, 0, 255], (80, 60));

        assert_eq!(frame.items.len(), 3);
        assert!(std::ptr::eq(frame.items[0].image, state.back_layers()[0].image()));
        assert!(std::ptr::eq(
            frame.items[1].image,
            state.tuber().image().unwrap()
        ));
        assert!(std::ptr::eq(frame.items[2].image, state.front_layers()[0].image()));
    }

    #[test]
    fn composites_over_background() {
        let state = simple_state("idle", (80, 60));
        let frame = Composition::of_state(&state, [255, 0, 255, 255], (100, 60));
        let mut compositor = Compositor::new();
        compositor.draw(&frame).unwrap();

        assert_eq!(compositor.canvas().dimensions(), (100, 60));
        // The front layer (80x40, value 1) covers the top-left corner.
        assert_eq!(compositor.canvas().get_pixel(0, 0), &Rgba([1, 1, 1, 255]));
        // The sprite (value 10) shows below the front layer.
        assert_eq!(compositor.canvas().get_pixel(0, 50), &Rgba([10, 10, 10, 255]));
        // Nothing covers the right edge.
        assert_eq!(compositor.canvas().get_pixel(90, 0), &Rgba([255, 0, 255, 255]));
        assert_eq!(compositor.frames_drawn(), 1);
    }

    #[test]
    fn saves_last_frame() {
        let state = simple_state("idle", (80, 60));
        let frame = Composition::of_state(&state, [0, 0, 0, 255], (80, 60));
        let mut compositor = Compositor::new();
        compositor.draw(&frame).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        compositor.save(&path).unwrap();
        assert_eq!(image::open(&path).unwrap().to_rgba8().dimensions(), (80, 60));
    }
}
