use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DisplayFromStr};

/// Untyped metadata as it comes back from a content index.
pub type Metadata = Map<String, Value>;

/// Deterministic chunk id, a pure function of `(filename, chunk_index)`.
pub fn chunk_id(filename: &str, chunk_index: u64) -> String {
    format!("{filename}_part_{chunk_index}")
}

/// Metadata attached to every chunk of an ingested file.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub filename: String,
    pub chunk_index: u64,
    pub created_at: String,
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// Present only for chunks produced from OCR text; persisted as `"true"`.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<bool>,
}

impl ChunkMetadata {
    pub fn to_map(&self) -> Metadata {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Metadata shared by all chunks of one file, before `chunk_index` is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseMetadata {
    pub filename: String,
    pub created_at: String,
    pub page_count: u32,
    pub file_hash: Option<String>,
    pub ocr: bool,
}

impl BaseMetadata {
    pub fn for_chunk(&self, chunk_index: u64) -> ChunkMetadata {
        ChunkMetadata {
            filename: self.filename.clone(),
            chunk_index,
            created_at: self.created_at.clone(),
            page_count: self.page_count,
            file_hash: self.file_hash.clone(),
            ocr: self.ocr.then_some(true),
        }
    }
}

/// A chunk ready to be written to the content index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk as read back from the content index.
///
/// Metadata stays untyped: records written by other tools may miss keys, and
/// readers must degrade instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl StoredChunk {
    pub fn filename(&self) -> Option<&str> {
        self.metadata.get("filename").and_then(Value::as_str)
    }

    pub fn file_hash(&self) -> Option<&str> {
        self.metadata.get("file_hash").and_then(Value::as_str)
    }

    /// Accepts integer or numeric-string values.
    pub fn chunk_index(&self) -> Option<u64> {
        match self.metadata.get("chunk_index")? {
            Value::Number(number) => number.as_u64().or_else(|| {
                number
                    .as_f64()
                    .filter(|value| *value >= 0.0 && value.fract() == 0.0)
                    .map(|value| value as u64)
            }),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<ChunkRecord> for StoredChunk {
    fn from(record: ChunkRecord) -> Self {
        Self {
            metadata: record.metadata.to_map(),
            id: record.id,
            text: record.text,
        }
    }
}

/// Equality filter over metadata keys; an empty filter matches every chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub equals: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            equals: vec![(key.into(), value.into())],
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Terminal state of one document ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestOutcome {
    Success { chunks: usize, ocr: bool },
    DuplicateSameName { filename: String },
    DuplicateDiffName { existing_filename: String },
    NoText,
    Error { message: String },
}

impl IngestOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "SUCCESS",
            Self::DuplicateSameName { .. } => "DUPLICATE_SAME_NAME",
            Self::DuplicateDiffName { .. } => "DUPLICATE_DIFF_NAME",
            Self::NoText => "NO_TEXT",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Short status line for end users; never carries raw error text.
    pub fn user_message(&self, filename: &str) -> String {
        match self {
            Self::Success { .. } => format!("Successfully processed and indexed: {filename}"),
            Self::DuplicateSameName { .. } => format!("File '{filename}' already exists"),
            Self::DuplicateDiffName { existing_filename } => {
                format!("File content already exists as '{existing_filename}'")
            }
            Self::NoText => format!("Could not extract text from: {filename}"),
            Self::Error { .. } => format!("Failed to process: {filename}"),
        }
    }
}

/// Answer produced from retrieved chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Summary of what the content index holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileListing {
    pub total_chunks: usize,
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2_000,
            overlap: 200,
        }
    }
}
