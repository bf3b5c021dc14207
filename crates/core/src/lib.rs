pub mod access;
pub mod answer;
pub mod blob;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod ocr;
pub mod parser;
pub mod retrieval;
pub mod sources;
pub mod stores;
pub mod traits;
pub mod watch;

pub use access::{guarded, AccessPolicy, AllowList, AuthRole, Requester};
pub use answer::{AnswerSynthesizer, ChatCompletionsSynthesizer};
pub use blob::{BlobMetadata, BlobStore, LocalBlobStore, MemoryBlobStore};
pub use chunking::{build_chunk_records, chunk_text};
pub use config::{service_url, BlobBackendConfig, OcrConfig, DEFAULT_DOCUMENT_DIR};
pub use embeddings::{Embedder, HashingEmbedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{AccessDenied, IngestError, SearchError, StorageError};
pub use extractor::{LopdfExtractor, PdfExtractor, PdfSource};
pub use ingest::{
    content_hash, discover_pdf_files, ingest_folder, FileOutcome, IngestionPipeline, IngestionReport,
};
pub use models::{
    chunk_id, Answer, ChunkMetadata, ChunkRecord, ChunkingOptions, FileListing, IngestOutcome,
    MetadataFilter, StoredChunk,
};
pub use ocr::{DisabledOcr, DocumentIntelligenceOcr, HttpOcr, OcrEngine};
pub use parser::{parse_pdf, ParseInput};
pub use retrieval::{Retriever, DEFAULT_TOP_K};
pub use sources::{fetch_sources, list_documents, SourceDocument, StoredDocument};
pub use stores::{ChromaStore, MemoryIndex};
pub use traits::ContentIndex;
pub use watch::FolderWatcher;
