//! Typed error hierarchy for upres.
//!
//! Every variant maps to a stable integer code via [`UpresError::error_code`]
//! so the CLI can exit with it and tooling can match on it without parsing
//! messages.

/// All errors originating from upres crates.
#[derive(Debug, thiserror::Error)]
pub enum UpresError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Unsupported scale factor {0}; expected 2 or 4")]
    UnsupportedScale(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parameter document error: {0}")]
    Document(#[from] serde_json::Error),

    // ── Inference / model ────────────────────────────────────────────
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Inference runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Model output shape error: {0}")]
    ModelOutputShape(String),

    // ── Frames ───────────────────────────────────────────────────────
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Unsupported channel count {0}; expected 3")]
    ChannelCount(usize),

    #[error("Buffer length mismatch: need {need} bytes, have {have}")]
    BufferLength { need: usize, have: usize },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    // ── Stream ───────────────────────────────────────────────────────
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Stream channel closed unexpectedly")]
    ChannelClosed,

    #[error("Panic recovered in {stage}: {message}")]
    PanicRecovered {
        stage: &'static str,
        message: String,
    },

    // ── I/O ──────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Invariants ───────────────────────────────────────────────────
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl UpresError {
    /// Stable integer error code.
    ///
    /// Codes are grouped by category:
    /// - 1xx: configuration
    /// - 2xx: inference / model
    /// - 3xx: frame contracts
    /// - 4xx: stream
    /// - 5xx: I/O
    /// - 6xx: invariants
    pub fn error_code(&self) -> u32 {
        match self {
            Self::UnsupportedScale(_) => 100,
            Self::Config(_) => 101,
            Self::Document(_) => 102,
            Self::Inference(_) => 200,
            Self::ModelLoad(_) => 201,
            Self::RuntimeUnavailable(_) => 202,
            Self::ModelOutputShape(_) => 203,
            Self::EmptyFrame => 300,
            Self::ChannelCount(_) => 301,
            Self::BufferLength { .. } => 302,
            Self::DimensionMismatch(_) => 303,
            Self::Stream(_) => 400,
            Self::ChannelClosed => 401,
            Self::PanicRecovered { .. } => 402,
            Self::Io(_) => 500,
            Self::InvariantViolation(_) => 600,
        }
    }

    /// Whether the super-resolution unit absorbs this error by falling back
    /// to interpolation for the affected frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Inference(_)
                | Self::ModelOutputShape(_)
                | Self::DimensionMismatch(_)
                | Self::PanicRecovered { .. }
        )
    }

    /// Whether this error belongs to the per-call input category.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyFrame | Self::ChannelCount(_) | Self::BufferLength { .. }
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, UpresError>;
