//! Error types shared across Camcord crates.

/// Top-level error type for Camcord operations.
#[derive(Debug, thiserror::Error)]
pub enum CamcordError {
    #[error("Camera unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("Session configuration failed (generation {generation}): {message}")]
    SessionConfigurationFailed { generation: u64, message: String },

    #[error("Encoder unavailable for {mime}: {message}")]
    EncoderUnavailable { mime: String, message: String },

    #[error("Encoder fault (code {code}): {message}")]
    EncoderFault { code: i32, message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Illegal operation: {message}")]
    IllegalOperation { message: String },

    #[error("Container error: {message}")]
    Container { message: String },

    #[error("Platform error: {message}")]
    Platform { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CamcordError.
pub type CamcordResult<T> = Result<T, CamcordError>;

/// Coarse classification of a [`CamcordError`], used by the UI layer to pick
/// how a fault is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    DeviceUnavailable,
    SessionConfigurationFailed,
    EncoderUnavailable,
    EncoderFault,
    InvalidArgument,
    IllegalOperation,
    Container,
    Platform,
    Internal,
}

impl FaultKind {
    /// Unavailable hardware blocks the UI; everything else is transient.
    pub fn is_blocking(self) -> bool {
        matches!(self, FaultKind::DeviceUnavailable)
    }
}

impl CamcordError {
    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: msg.into(),
        }
    }

    pub fn session_configuration_failed(generation: u64, msg: impl Into<String>) -> Self {
        Self::SessionConfigurationFailed {
            generation,
            message: msg.into(),
        }
    }

    pub fn encoder_unavailable(mime: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::EncoderUnavailable {
            mime: mime.into(),
            message: msg.into(),
        }
    }

    pub fn encoder_fault(code: i32, msg: impl Into<String>) -> Self {
        Self::EncoderFault {
            code,
            message: msg.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    pub fn illegal_operation(msg: impl Into<String>) -> Self {
        Self::IllegalOperation {
            message: msg.into(),
        }
    }

    pub fn container(msg: impl Into<String>) -> Self {
        Self::Container {
            message: msg.into(),
        }
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Self::DeviceUnavailable { .. } => FaultKind::DeviceUnavailable,
            Self::SessionConfigurationFailed { .. } => FaultKind::SessionConfigurationFailed,
            Self::EncoderUnavailable { .. } => FaultKind::EncoderUnavailable,
            Self::EncoderFault { .. } => FaultKind::EncoderFault,
            Self::InvalidArgument { .. } => FaultKind::InvalidArgument,
            Self::IllegalOperation { .. } => FaultKind::IllegalOperation,
            Self::Container { .. } => FaultKind::Container,
            Self::Platform { .. } => FaultKind::Platform,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => FaultKind::Internal,
        }
    }
}
