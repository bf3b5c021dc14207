//! Grounded answer synthesis over retrieved chunks.

use crate::config::service_url;
use crate::models::{Answer, StoredChunk};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

pub const NO_CONTEXT_ANSWER: &str =
    "I could not find relevant information in the knowledge base to answer your question.";

const SYSTEM_PROMPT: &str = "You answer questions using only the document excerpts provided below. \
Do not invent information. If the answer is not in the excerpts, say so clearly. \
Cite the file names you rely on. Be concise. \
Reply with a JSON object of the form {\"answer\": string, \"sources\": [file names]}.\n\n\
Document excerpts:\n";

#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn answer(&self, query: &str, chunks: &[StoredChunk]) -> Result<Answer, SearchError>;
}

/// Distinct source filenames in first-seen order.
pub fn source_filenames(chunks: &[StoredChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for filename in chunks.iter().filter_map(StoredChunk::filename) {
        if !sources.iter().any(|seen| seen == filename) {
            sources.push(filename.to_string());
        }
    }
    sources
}

pub fn build_context(chunks: &[StoredChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            format!(
                "---\nSource: {}\nContent: {}\n",
                chunk.filename().unwrap_or("Unknown Source"),
                chunk.text
            )
        })
        .collect()
}

/// Parses the model's reply; a reply that is not the expected JSON object is
/// used verbatim, with sources taken from the chunks.
pub fn parse_reply(reply: &str, chunks: &[StoredChunk]) -> Answer {
    let trimmed = reply.trim();
    match serde_json::from_str::<Answer>(trimmed) {
        Ok(answer) => answer,
        Err(error) => {
            debug!(error = %error, "model reply is not JSON, using raw text");
            Answer {
                answer: trimmed.to_string(),
                sources: source_filenames(chunks),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct ChatCompletionsSynthesizer {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsSynthesizer {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, SearchError> {
        Ok(Self {
            client: Client::new(),
            base_url: service_url(base_url)?,
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 500,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl AnswerSynthesizer for ChatCompletionsSynthesizer {
    async fn answer(&self, query: &str, chunks: &[StoredChunk]) -> Result<Answer, SearchError> {
        if chunks.is_empty() {
            return Ok(Answer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let system = format!("{SYSTEM_PROMPT}{}", build_context(chunks));
        let response = self
            .client
            .post(self.base_url.join("chat/completions")?)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": query },
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
                "response_format": { "type": "json_object" },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "chat completion request failed");
            return Err(SearchError::Synthesis(format!(
                "chat completion returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SearchError::Synthesis("empty completion".to_string()))?;

        Ok(parse_reply(&reply, chunks))
    }
}
