use crate::access::AuthRole;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("index failure: {0}")]
    Index(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),

    #[error("answer synthesis failed: {0}")]
    Synthesis(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("metadata serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("blob backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
#[error("access denied for role {role:?} (user={user_id:?}, chat={chat_id:?})")]
pub struct AccessDenied {
    pub role: AuthRole,
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
}
