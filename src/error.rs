use thiserror::Error;
use tokio::sync::mpsc;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    ParseMissingSelector(String),

    #[error("Invalid text pattern: {0}")]
    InvalidPattern(String),

    #[error("Couldn't fetch listing page {page}: {reason}")]
    PageFetch { page: usize, reason: String },

    #[error("Couldn't fetch document {document_id}: {reason}")]
    DocumentFetch { document_id: String, reason: String },

    #[error("Blob store error for {key}: {reason}")]
    BlobStore { key: String, reason: String },

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
    #[error("Couldn't send a record through a channel.")]
    RuntimeSendError,
    #[error("The worker pool was closed while records were pending.")]
    RuntimePoolClosed,

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_value: mpsc::error::SendError<T>) -> Self {
        Error::RuntimeSendError
    }
}

impl From<tokio::sync::AcquireError> for Error {
    fn from(_value: tokio::sync::AcquireError) -> Self {
        Error::RuntimePoolClosed
    }
}
