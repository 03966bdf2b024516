//! Core library for the PNGTuber avatar.
//!
//! The engine listens for line-based commands from control clients
//! (microphone meters, state pickers, one-shot senders) and reacts by
//! switching between configured avatar states and animating the expressive
//! sprite. Each module owns one concern: the wire protocol, the socket
//! multiplexer, image assets, layers and states, the blink/talk timers,
//! composition and the per-frame engine loop.

pub mod assets;
pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod protocol;
pub mod render;
pub mod scene;
pub mod timeline;
pub mod tuber;

pub use assets::{ImageSource, Sprite};
pub use config::{AppConfig, LayerConfig, LoopPause, StateConfig, WindowConfig};
pub use engine::{Engine, TickReport};
pub use error::{PngTuberError, Result};
pub use net::ConnectionMultiplexer;
pub use protocol::{Command, LineBuffer, ProtocolError};
pub use render::{Composition, Compositor, Renderer};
pub use scene::{AvatarState, Layer, ResizeOutcome};
pub use timeline::{FrameClock, LoopScheduler};
pub use tuber::{Eyes, PngTuberState};
