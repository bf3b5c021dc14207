use crate::chunking::{build_chunk_records, chunk_with_options};
use crate::error::IngestError;
use crate::extractor::{PdfExtractor, PdfSource};
use crate::models::{BaseMetadata, ChunkRecord, ChunkingOptions};
use chrono::{DateTime, Local};
use std::path::Path;
use tracing::{debug, warn};

/// Input of [`parse_pdf`]: a file on disk or bytes already in memory.
#[derive(Debug, Clone, Copy)]
pub enum ParseInput<'a> {
    File(&'a Path),
    Bytes { filename: &'a str, content: &'a [u8] },
}

/// Extracts, chunks and wraps a PDF into chunk records.
///
/// Returns an empty list when extraction fails or finds no text; callers treat
/// that as "try OCR", not as a hard failure.
pub fn parse_pdf(
    extractor: &dyn PdfExtractor,
    input: ParseInput<'_>,
    file_hash: Option<&str>,
    options: ChunkingOptions,
) -> Vec<ChunkRecord> {
    match try_parse_pdf(extractor, input, file_hash, options) {
        Ok(records) => records,
        Err(error) => {
            warn!(error = %error, "pdf text extraction failed");
            Vec::new()
        }
    }
}

fn try_parse_pdf(
    extractor: &dyn PdfExtractor,
    input: ParseInput<'_>,
    file_hash: Option<&str>,
    options: ChunkingOptions,
) -> Result<Vec<ChunkRecord>, IngestError> {
    let (filename, source, created_at) = match input {
        ParseInput::File(path) => {
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
            (filename.to_string(), PdfSource::Path(path), file_timestamp(path))
        }
        ParseInput::Bytes { filename, content } => {
            (filename.to_string(), PdfSource::Bytes(content), now_timestamp())
        }
    };

    let document = extractor.extract(source)?;
    let text = document.full_text();
    debug!(filename = %filename, pages = document.page_count, chars = text.len(), "extracted pdf text");

    let base = BaseMetadata {
        filename,
        created_at,
        page_count: document.page_count,
        file_hash: file_hash.map(str::to_string),
        ocr: false,
    };

    Ok(build_chunk_records(&chunk_with_options(&text, options), &base))
}

pub(crate) fn now_timestamp() -> String {
    Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn file_timestamp(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.created().or_else(|_| metadata.modified()))
        .map(|time| {
            DateTime::<Local>::from(time)
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string()
        })
        .unwrap_or_else(|_| now_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractedDocument, LopdfExtractor, PageText};

    struct FixedExtractor {
        pages: Vec<&'static str>,
    }

    impl PdfExtractor for FixedExtractor {
        fn extract(&self, _source: PdfSource<'_>) -> Result<ExtractedDocument, IngestError> {
            Ok(ExtractedDocument {
                page_count: self.pages.len() as u32,
                pages: self
                    .pages
                    .iter()
                    .enumerate()
                    .map(|(index, text)| PageText {
                        number: index as u32 + 1,
                        text: (*text).to_string(),
                    })
                    .collect(),
            })
        }
    }

    #[test]
    fn bytes_input_builds_records_with_hash() {
        let extractor = FixedExtractor {
            pages: vec!["alpha beta", "gamma delta"],
        };
        let records = parse_pdf(
            &extractor,
            ParseInput::Bytes {
                filename: "minutes.pdf",
                content: b"ignored",
            },
            Some("hash-1"),
            ChunkingOptions::default(),
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "minutes.pdf_part_0");
        assert_eq!(records[0].text, "alpha beta\ngamma delta");
        assert_eq!(records[0].metadata.page_count, 2);
        assert_eq!(records[0].metadata.file_hash.as_deref(), Some("hash-1"));
        assert_eq!(records[0].metadata.ocr, None);
    }

    #[test]
    fn blank_pages_yield_empty_list() {
        let extractor = FixedExtractor {
            pages: vec!["  ", "\n"],
        };
        let records = parse_pdf(
            &extractor,
            ParseInput::Bytes {
                filename: "scan.pdf",
                content: b"ignored",
            },
            None,
            ChunkingOptions::default(),
        );
        assert!(records.is_empty());
    }

    #[test]
    fn unreadable_file_yields_empty_list() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let records = parse_pdf(
            &LopdfExtractor,
            ParseInput::File(&path),
            None,
            ChunkingOptions::default(),
        );
        assert!(records.is_empty());
        Ok(())
    }

    #[test]
    fn file_input_uses_base_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"placeholder")?;
        let extractor = FixedExtractor {
            pages: vec!["body text"],
        };

        let records = parse_pdf(
            &extractor,
            ParseInput::File(&path),
            None,
            ChunkingOptions::default(),
        );
        assert_eq!(records[0].metadata.filename, "report.pdf");
        assert_eq!(records[0].id, "report.pdf_part_0");
        Ok(())
    }
}
