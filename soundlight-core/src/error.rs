//! Error types for the analysis pipeline and its boundaries
use thiserror::Error;

/// Errors raised while turning a captured block into LED colours.
///
/// Everything except `InvalidParameter` and `Capture` is a per-cycle
/// failure: the cycle is dropped and the next one proceeds normally.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Bad construction argument (filter width, block size, ...)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A filter was asked to weight a negative amplitude
    #[error("Negative amplitude {value} for frequency {frequency} is not allowed")]
    InvalidAmplitude { value: f32, frequency: f32 },

    /// All band energies summed to (nearly) zero
    #[error("Filter responses sum to {sum}, cannot normalise colour vector")]
    DegenerateSpectrum { sum: f32 },

    /// Amplitude and frequency vectors disagree in length
    #[error("List of frequencies does not have the same length as list of amplitudes: {frequencies} != {amplitudes}")]
    FrameShapeMismatch { amplitudes: usize, frequencies: usize },

    /// Live frame frequency axis differs from the calibrated noise baseline
    #[error("Frequency axis of frame ({found} bins) does not match noise baseline ({expected} bins)")]
    AxisMismatch { expected: usize, found: usize },

    /// A colour vector handed to expansion does not sum to one
    #[error("Sum of filter responses needs to be 1, got {sum}")]
    NotNormalized { sum: f32 },

    /// Capture boundary failure
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
}

impl AnalysisError {
    /// Whether the pipeline may skip the current cycle and carry on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AnalysisError::InvalidParameter(_) | AnalysisError::Capture(_)
        )
    }
}

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors reported by a capture source.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The source has no more samples (end of a file)
    #[error("End of audio stream")]
    EndOfStream,

    /// The device stream was closed underneath us
    #[error("Audio device disconnected")]
    Disconnected,

    /// Device setup or stream failure
    #[error("Audio device error: {0}")]
    Device(String),

    /// WAV decoding failure
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Errors delivering colours to the outside world.
#[derive(Error, Debug)]
pub enum EmitError {
    /// Topic id is not present in the topic table
    #[error("Topic {0} can not be found in the topic table")]
    UnknownTopic(String),

    /// Writer failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Message serialisation failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Receiving side has gone away
    #[error("Output consumer disconnected")]
    Disconnected,
}

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Errors handling inbound control messages.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown outlet ID: {0}")]
    UnknownOutlet(String),

    #[error("Topic error: {0}")]
    Topic(#[from] EmitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
