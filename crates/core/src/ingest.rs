use crate::blob::{BlobMetadata, BlobStore};
use crate::chunking::{build_chunk_records, chunk_with_options};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{BaseMetadata, ChunkRecord, ChunkingOptions, IngestOutcome, MetadataFilter};
use crate::ocr::OcrEngine;
use crate::parser::{now_timestamp, parse_pdf, ParseInput};
use crate::traits::ContentIndex;
use crate::IngestError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// SHA-256 hex digest, stored as `file_hash` and used as the dedup key.
///
/// Indexes populated by tools that hashed with MD5 hold digests this never
/// produces, so content ingested by them is not recognized as a duplicate.
pub fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    Ok(content_hash(&fs::read(path)?))
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Runs one document through dedup, storage, parsing, OCR fallback and
/// indexing. Collaborators are injected; the pipeline holds no other state.
pub struct IngestionPipeline<I, B, O>
where
    I: ContentIndex,
    B: BlobStore,
    O: OcrEngine,
{
    index: I,
    blobs: B,
    ocr: O,
    extractor: Arc<dyn PdfExtractor>,
    options: ChunkingOptions,
}

impl<I, B, O> IngestionPipeline<I, B, O>
where
    I: ContentIndex,
    B: BlobStore,
    O: OcrEngine,
{
    pub fn new(index: I, blobs: B, ocr: O) -> Self {
        Self {
            index,
            blobs,
            ocr,
            extractor: Arc::new(LopdfExtractor),
            options: ChunkingOptions::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_chunking(mut self, options: ChunkingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Always ends in a terminal outcome; failures become
    /// [`IngestOutcome::Error`]. Side effects already performed (a saved
    /// blob, for instance) are not rolled back.
    pub async fn process_document(&self, filename: &str, content: &[u8]) -> IngestOutcome {
        match self.try_process(filename, content).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(filename = %filename, error = %error, "error processing document");
                IngestOutcome::Error {
                    message: error.to_string(),
                }
            }
        }
    }

    async fn try_process(&self, filename: &str, content: &[u8]) -> Result<IngestOutcome, IngestError> {
        if filename.trim().is_empty() {
            return Err(IngestError::InvalidArgument("filename is empty".to_string()));
        }

        let file_hash = content_hash(content);
        info!(filename = %filename, file_hash = %file_hash, "calculated content hash");

        if let Some(existing) = self.existing_filename(&file_hash).await? {
            info!(filename = %filename, existing = %existing, "duplicate content detected");
            return Ok(if existing == filename {
                IngestOutcome::DuplicateSameName { filename: existing }
            } else {
                IngestOutcome::DuplicateDiffName {
                    existing_filename: existing,
                }
            });
        }

        self.blobs
            .save(content, filename, Some(PDF_CONTENT_TYPE))
            .await?;

        let mut records = self.parse(filename, content, &file_hash).await?;
        let mut via_ocr = false;

        if records.is_empty() {
            info!(filename = %filename, "text extraction found nothing, trying OCR");
            match self.ocr_records(filename, content, &file_hash).await {
                Some(ocr_records) => {
                    records = ocr_records;
                    via_ocr = true;
                }
                None => {
                    warn!(filename = %filename, "no text extracted (OCR failed or empty)");
                    return Ok(IngestOutcome::NoText);
                }
            }
        }

        self.index.upsert_chunks(&records).await?;
        info!(filename = %filename, chunks = records.len(), ocr = via_ocr, "indexed document");

        Ok(IngestOutcome::Success {
            chunks: records.len(),
            ocr: via_ocr,
        })
    }

    async fn existing_filename(&self, file_hash: &str) -> Result<Option<String>, IngestError> {
        let matches = self
            .index
            .get_by_metadata(&MetadataFilter::eq("file_hash", file_hash), Some(1))
            .await?;
        Ok(matches
            .into_iter()
            .find_map(|chunk| chunk.filename().map(str::to_string)))
    }

    /// PDF parsing is CPU-bound; it runs on the blocking pool.
    async fn parse(
        &self,
        filename: &str,
        content: &[u8],
        file_hash: &str,
    ) -> Result<Vec<ChunkRecord>, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let filename = filename.to_string();
        let content = content.to_vec();
        let file_hash = file_hash.to_string();
        let options = self.options;

        tokio::task::spawn_blocking(move || {
            parse_pdf(
                extractor.as_ref(),
                ParseInput::Bytes {
                    filename: &filename,
                    content: &content,
                },
                Some(&file_hash),
                options,
            )
        })
        .await
        .map_err(|error| IngestError::PdfParse(format!("parser task failed: {error}")))
    }

    async fn ocr_records(&self, filename: &str, content: &[u8], file_hash: &str) -> Option<Vec<ChunkRecord>> {
        let text = self.ocr.extract_text(content).await;
        // Whitespace-only OCR output counts as no text; no sidecar is written.
        if text.trim().is_empty() {
            return None;
        }

        if let Err(error) = self.save_ocr_sidecar(filename, &text).await {
            error!(filename = %filename, error = %error, "failed to save OCR results");
        }

        let base = BaseMetadata {
            filename: filename.to_string(),
            created_at: now_timestamp(),
            page_count: 0,
            file_hash: Some(file_hash.to_string()),
            ocr: true,
        };
        let records = build_chunk_records(&chunk_with_options(&text, self.options), &base);
        (!records.is_empty()).then_some(records)
    }

    async fn save_ocr_sidecar(&self, filename: &str, text: &str) -> Result<(), IngestError> {
        self.blobs
            .save(text.as_bytes(), &format!("{filename}.txt"), Some(TEXT_CONTENT_TYPE))
            .await?;

        let mut flag = BlobMetadata::new();
        flag.insert("ocr".to_string(), "true".to_string());
        self.blobs.update_metadata(filename, flag).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub outcome: IngestOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub files: Vec<FileOutcome>,
}

impl IngestionReport {
    pub fn succeeded(&self) -> usize {
        self.files
            .iter()
            .filter(|file| matches!(file.outcome, IngestOutcome::Success { .. }))
            .count()
    }
}

/// Feeds every PDF under `folder` through the pipeline, one at a time.
pub async fn ingest_folder<I, B, O>(
    pipeline: &IngestionPipeline<I, B, O>,
    folder: &Path,
) -> Result<IngestionReport, IngestError>
where
    I: ContentIndex,
    B: BlobStore,
    O: OcrEngine,
{
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut report = IngestionReport::default();
    for path in files {
        let outcome = match path.file_name().and_then(|name| name.to_str()) {
            Some(filename) => match tokio::fs::read(&path).await {
                Ok(content) => pipeline.process_document(filename, &content).await,
                Err(error) => IngestOutcome::Error {
                    message: error.to_string(),
                },
            },
            None => IngestOutcome::Error {
                message: IngestError::MissingFileName(path.display().to_string()).to_string(),
            },
        };
        info!(path = %path.display(), status = outcome.status(), "processed file");
        report.files.push(FileOutcome { path, outcome });
    }

    Ok(report)
}
