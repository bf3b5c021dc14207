use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub page_count: u32,
    pub pages: Vec<PageText>,
}

impl ExtractedDocument {
    /// Page texts joined with a newline, in page order.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Where the PDF bytes come from.
#[derive(Debug, Clone, Copy)]
pub enum PdfSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

pub trait PdfExtractor: Send + Sync {
    fn extract(&self, source: PdfSource<'_>) -> Result<ExtractedDocument, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, source: PdfSource<'_>) -> Result<ExtractedDocument, IngestError> {
        let document = match source {
            PdfSource::Path(path) => Document::load(path),
            PdfSource::Bytes(bytes) => Document::load_mem(bytes),
        }
        .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let mut pages = Vec::with_capacity(page_numbers.len());
        for page_no in &page_numbers {
            let text = document
                .extract_text(&[*page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.push(PageText {
                number: *page_no,
                text,
            });
        }

        Ok(ExtractedDocument {
            page_count: page_numbers.len() as u32,
            pages,
        })
    }
}
