/// Result alias that carries the custom [`PartyError`] type.
pub type Result<T> = std::result::Result<T, PartyError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PartyError {
    /// Free-form failure that does not warrant a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// The caller handed over data the operation cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The audio output could not be created, either because the host has
    /// no device or because playback was blocked.
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("fft: {0}")]
    Fft(#[from] realfft::FftError),
}

impl PartyError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for PartyError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PartyError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
