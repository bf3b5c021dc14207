//! OCR collaborators used when direct PDF text extraction finds nothing.
//!
//! Every implementation reports failure as empty text: the ingestion
//! pipeline only needs to know whether OCR produced anything.

use crate::error::IngestError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Extracted text, or an empty string when nothing could be read.
    async fn extract_text(&self, content: &[u8]) -> String;
}

#[async_trait]
impl<T: OcrEngine + ?Sized> OcrEngine for std::sync::Arc<T> {
    async fn extract_text(&self, content: &[u8]) -> String {
        (**self).extract_text(content).await
    }
}

/// Used when no OCR service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn extract_text(&self, _content: &[u8]) -> String {
        warn!("OCR requested but no OCR service is configured");
        String::new()
    }
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    pdf_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Option<Vec<OcrPage>>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Generic JSON OCR endpoint: posts the PDF as base64 and reads back either
/// `text` or a list of `pages`.
#[derive(Debug, Clone)]
pub struct HttpOcr {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcr {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    async fn request(&self, content: &[u8]) -> Result<String, IngestError> {
        let mut request = self.client.post(&self.endpoint).json(&OcrRequest {
            pdf_base64: STANDARD.encode(content),
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: OcrResponse = response.json().await?;
        Ok(response_text(&payload))
    }
}

fn response_text(payload: &OcrResponse) -> String {
    if let Some(pages) = &payload.pages {
        let joined = pages
            .iter()
            .filter_map(|page| page.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !joined.is_empty() {
            return joined;
        }
    }

    payload
        .text
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn extract_text(&self, content: &[u8]) -> String {
        match self.request(content).await {
            Ok(text) => text,
            Err(error) => {
                error!(error = %error, "OCR request failed");
                String::new()
            }
        }
    }
}

const ANALYZE_API_VERSION: &str = "2023-07-31";
const LAYOUT_MODEL: &str = "prebuilt-layout";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    pages: Vec<AnalyzePage>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzePage {
    #[serde(default)]
    lines: Vec<AnalyzeLine>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeLine {
    content: String,
}

/// Azure AI Document Intelligence, layout model.
#[derive(Debug, Clone)]
pub struct DocumentIntelligenceOcr {
    client: Client,
    endpoint: String,
    key: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl DocumentIntelligenceOcr {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            key: key.into(),
            poll_interval: Duration::from_secs(1),
            max_polls: 120,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn analyze(&self, content: &[u8]) -> Result<String, IngestError> {
        let response = self
            .client
            .post(format!(
                "{}/formrecognizer/documentModels/{LAYOUT_MODEL}:analyze?api-version={ANALYZE_API_VERSION}",
                self.endpoint
            ))
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("content-type", "application/pdf")
            .body(content.to_vec())
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(IngestError::OcrFailed(format!(
                "analysis submission returned {}",
                response.status()
            )));
        }

        let operation_url = response
            .headers()
            .get("operation-location")
            .or_else(|| response.headers().get(LOCATION))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| IngestError::OcrFailed("missing operation-location header".to_string()))?;

        info!("layout analysis submitted, polling for result");
        for _ in 0..self.max_polls {
            let operation: AnalyzeOperation = self
                .client
                .get(&operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match operation.status.as_str() {
                "succeeded" => {
                    let text = analyze_text(operation.analyze_result.unwrap_or_default());
                    info!(chars = text.chars().count(), "layout analysis completed");
                    return Ok(text);
                }
                "failed" => {
                    return Err(IngestError::OcrFailed("layout analysis failed".to_string()));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }

        Err(IngestError::OcrFailed(format!(
            "layout analysis still running after {} polls",
            self.max_polls
        )))
    }
}

fn analyze_text(result: AnalyzeResult) -> String {
    match result.content {
        Some(content) if !content.is_empty() => content,
        _ => result
            .pages
            .into_iter()
            .flat_map(|page| page.lines)
            .map(|line| line.content)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[async_trait]
impl OcrEngine for DocumentIntelligenceOcr {
    async fn extract_text(&self, content: &[u8]) -> String {
        match self.analyze(content).await {
            Ok(text) => text,
            Err(error) => {
                error!(error = %error, "document intelligence analysis failed");
                String::new()
            }
        }
    }
}
