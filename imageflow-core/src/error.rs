use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageFlowError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{target} transcode failed: {message}")]
    TranscodeFailed { target: &'static str, message: String },

    #[error("metadata index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ImageFlowError {
    /// True when the error means "the thing does not exist", as opposed to
    /// a transport or backend failure. Read paths use this to decide
    /// between variant fallback and surfacing a 5xx.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ImageFlowError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ImageFlowError>;
