/// Result alias that carries the custom [`TempoError`] type.
pub type Result<T> = std::result::Result<T, TempoError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum TempoError {
    /// A tracker or module was configured with values it cannot work with,
    /// such as an empty or inverted BPM range. Construction fails and no
    /// instance is handed out.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A sub-band index past the configured band count was queried.
    #[error("sub-band index {index} out of range (have {len} bands)")]
    OutOfRange { index: usize, len: usize },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl TempoError {
    /// Creates a configuration error from the provided message.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Reasons a frame handed to [`crate::TempoTracker::process`] is ignored.
///
/// These never escape as an `Err`: the tracker still decays its vote table
/// and reports the reason through [`crate::FrameOutcome::Skipped`].
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum MalformedFrame {
    #[error("frame buffer is empty")]
    EmptyBuffer,
    #[error("timestamp {0} is negative or not finite")]
    InvalidTimestamp(f32),
    #[error("timestamp went backwards from {previous} to {current}")]
    NonMonotonicTimestamp { previous: f32, current: f32 },
    #[error("frame contains non-finite samples")]
    NonFiniteSamples,
}
