use shared::error::ErrorCode;
use thiserror::Error;

/// Transport and protocol failures raised by the gateway client.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("API Error: {status} {status_text}")]
    Status {
        status: u16,
        status_text: String,
        detail: Option<String>,
    },
    #[error("Upload failed: {status} {status_text}")]
    UploadRejected {
        status: u16,
        status_text: String,
        detail: Option<String>,
    },
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
    #[error("invalid response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::UploadRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.status().map(ErrorCode::from_status)
    }

    /// Service-provided `detail` text, when the error body carried one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } | Self::UploadRejected { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
