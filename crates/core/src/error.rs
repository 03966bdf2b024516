use crate::protocol::ProtocolError;

/// Result alias that carries the custom [`PngTuberError`] type.
pub type Result<T> = std::result::Result<T, PngTuberError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PngTuberError {
    /// Free-form failure raised while wiring the engine together, e.g. a
    /// configuration that names a layer which does not exist.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Image decoding or encoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// A line received from a control client was rejected.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl PngTuberError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for PngTuberError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PngTuberError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
