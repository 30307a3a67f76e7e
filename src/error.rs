use thiserror::Error;

/// Main error type for the reframe library
#[derive(Error, Debug)]
pub enum ReframeError {
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline stage disconnected: {stage}")]
    Disconnected { stage: &'static str },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Errors raised while probing the input container
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe tool could not be started: {tool} ({reason})")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Probe failed for {path}: {reason}")]
    Failed { path: String, reason: String },

    #[error("Probe timed out for {path}")]
    Timeout { path: String },

    #[error("No video stream in {path}")]
    NoVideoStream { path: String },

    #[error("Invalid metadata for {path}: {details}")]
    InvalidMetadata { path: String, details: String },
}

/// Frame source (decoder process) errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to start decoder: {reason}")]
    SpawnFailed { reason: String },

    #[error("Failed to read the first frame: {reason}")]
    FirstReadFailed { reason: String },

    #[error("Decoder produced no frames for {path}")]
    NoFrames { path: String },
}

/// Frame transform errors
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("No transform model is loaded")]
    NotLoaded,

    #[error("Transform '{transform}' failed: {reason}")]
    BatchFailed { transform: String, reason: String },

    #[error("Transform '{transform}' failed on single-item fallback #{index}: {reason}")]
    FallbackFailed {
        transform: String,
        index: usize,
        reason: String,
    },

    #[error("Transform '{transform}' fallback exceeded {seconds:.1}s")]
    FallbackTimeout { transform: String, seconds: f64 },

    #[error("Transform returned {actual} frames, expected {expected}")]
    OutputCountMismatch { expected: usize, actual: usize },

    #[error("Transform returned a frame of {actual} bytes, expected {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid transform parameters: {details}")]
    InvalidParameters { details: String },

    #[error("Transform '{transform}' panicked: {reason}")]
    Panicked { transform: String, reason: String },

    #[error("Transform worker aborted: {reason}")]
    WorkerAborted { reason: String },
}

/// Frame sink (encoder process) errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to start encoder {encoder}: {reason}")]
    SpawnFailed { encoder: String, reason: String },

    #[error("Failed to write frame to encoder: {reason}")]
    WriteFailed { reason: String },

    #[error("Encoder stopped consuming frames for {waited_ms} ms")]
    Stalled { waited_ms: u64 },

    #[error("Encoder {encoder} exited with status {code:?}")]
    NonZeroExit { encoder: String, code: Option<i32> },

    #[error("Encoder did not exit within {seconds}s")]
    ExitTimeout { seconds: u64 },
}

/// Audio side-channel errors (never fatal for a job)
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio extraction failed: {reason}")]
    ExtractionFailed { reason: String },

    #[error("Audio remux failed: {reason}")]
    RemuxFailed { reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// How an error affects the job that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the current file's job
    Fatal,
    /// The job continues with reduced quality or features
    Degraded,
    /// User-initiated stop, reported separately from failures
    Cancelled,
}

/// Convenience type alias for Results using ReframeError
pub type Result<T> = std::result::Result<T, ReframeError>;

impl ReframeError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Classify this error for the coordinator
    pub fn severity(&self) -> Severity {
        match self {
            Self::Cancelled => Severity::Cancelled,
            Self::Audio(_) => Severity::Degraded,
            _ => Severity::Fatal,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for errors that only report a downstream stage going away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Probe(ProbeError::ToolUnavailable { tool, .. }) => {
                format!("Could not run '{}'. Please check that FFmpeg is installed and on PATH.", tool)
            }
            Self::Probe(ProbeError::NoVideoStream { path }) => {
                format!("'{}' does not contain a video stream.", path)
            }
            Self::Transform(TransformError::NotLoaded) => {
                "No model is loaded. Load a model before starting a job.".to_string()
            }
            Self::Encode(EncodeError::NonZeroExit { encoder, .. }) => {
                format!("The encoder '{}' failed. Try a lower resolution or disable hardware encoding.", encoder)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            Self::Cancelled => "Processing was cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}
