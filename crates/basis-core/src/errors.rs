use std::path::PathBuf;

/// Core error type.
///
/// Adapter crates map their transport errors into this type so the control
/// plane can decide between a user-facing reply and a logged diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure to deliver a reply or attachment to the command channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The transport rejected the upload because it exceeds its size limit.
    #[error("payload too large")]
    PayloadTooLarge,

    #[error("{0}")]
    Failed(String),
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::External(format!("zip error: {e}"))
    }
}
