//! Startup configuration read from the environment.
//!
//! Only the process entry point reads these; pipelines receive the
//! collaborators they build.

use crate::access::{AccessPolicy, AllowList};
use crate::blob::{BlobStore, LocalBlobStore, MemoryBlobStore};
use crate::error::StorageError;
use crate::ocr::{DisabledOcr, DocumentIntelligenceOcr, HttpOcr, OcrEngine};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_DOCUMENT_DIR: &str = "./data/documents";

/// Trimmed, non-empty value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parses a service base URL. The path always ends in `/`, so endpoint paths
/// join under it instead of replacing its last segment.
pub fn service_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;
    if url.cannot_be_a_base() {
        return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackendConfig {
    Local { root: PathBuf },
    Memory,
}

impl BlobBackendConfig {
    /// `BLOB_BACKEND` = `local` (default) or `memory`; `DOCUMENT_DIR` is the
    /// local root.
    pub fn from_env() -> Self {
        Self::from_values(env_value("BLOB_BACKEND").as_deref(), env_value("DOCUMENT_DIR"))
    }

    fn from_values(backend: Option<&str>, root: Option<String>) -> Self {
        match backend.map(str::to_ascii_lowercase).as_deref() {
            Some("memory") => Self::Memory,
            Some("local") | None => Self::Local {
                root: PathBuf::from(root.unwrap_or_else(|| DEFAULT_DOCUMENT_DIR.to_string())),
            },
            Some(other) => {
                warn!(backend = other, "unknown blob backend, using local storage");
                Self::Local {
                    root: PathBuf::from(root.unwrap_or_else(|| DEFAULT_DOCUMENT_DIR.to_string())),
                }
            }
        }
    }

    pub async fn build(&self) -> Result<Arc<dyn BlobStore>, StorageError> {
        Ok(match self {
            Self::Local { root } => {
                info!(root = %root.display(), "using local blob storage");
                Arc::new(LocalBlobStore::open(root.clone()).await?)
            }
            Self::Memory => {
                info!("using in-memory blob storage");
                Arc::new(MemoryBlobStore::new())
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrConfig {
    DocumentIntelligence { endpoint: String, key: String },
    Http { endpoint: String, api_key: Option<String> },
    Disabled,
}

impl OcrConfig {
    /// Azure Document Intelligence wins over the generic endpoint when both
    /// are configured.
    pub fn from_env() -> Self {
        if let (Some(endpoint), Some(key)) = (
            env_value("AZURE_DOC_INTEL_ENDPOINT"),
            env_value("AZURE_DOC_INTEL_KEY"),
        ) {
            return Self::DocumentIntelligence { endpoint, key };
        }

        match env_value("OCR_ENDPOINT") {
            Some(endpoint) => Self::Http {
                endpoint,
                api_key: env_value("OCR_API_KEY"),
            },
            None => Self::Disabled,
        }
    }

    pub fn build(&self) -> Arc<dyn OcrEngine> {
        match self {
            Self::DocumentIntelligence { endpoint, key } => {
                Arc::new(DocumentIntelligenceOcr::new(endpoint.clone(), key.clone()))
            }
            Self::Http { endpoint, api_key } => Arc::new(HttpOcr::new(endpoint.clone(), api_key.clone())),
            Self::Disabled => {
                warn!("OCR credentials not configured, scanned PDFs will report no text");
                Arc::new(DisabledOcr)
            }
        }
    }
}

fn parse_ids(name: &str, raw: Option<&str>) -> HashSet<i64> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(variable = name, value = item, "ignoring non-numeric id");
                None
            }
        })
        .collect()
}

impl AccessPolicy {
    pub fn from_env() -> Self {
        let list = |users: &str, groups: &str| AllowList {
            users: parse_ids(users, env_value(users).as_deref()),
            groups: parse_ids(groups, env_value(groups).as_deref()),
        };
        Self {
            query: list("QUERY_ALLOWED_USERS", "QUERY_ALLOWED_GROUPS"),
            ingest: list("INGEST_ALLOWED_USERS", "INGEST_ALLOWED_GROUPS"),
        }
    }
}
