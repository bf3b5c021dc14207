use crate::config::service_url;
use crate::embeddings::Embedder;
use crate::models::{ChunkRecord, Metadata, MetadataFilter, StoredChunk};
use crate::traits::ContentIndex;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// Chroma collection accessed over its HTTP API. Embeddings are computed on
/// this side by the injected [`Embedder`].
pub struct ChromaStore {
    client: Client,
    endpoint: Url,
    collection: String,
    embedder: Arc<dyn Embedder>,
    collection_id: OnceCell<String>,
}

impl ChromaStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            client: Client::new(),
            endpoint: service_url(endpoint)?,
            collection: collection.into(),
            embedder,
            collection_id: OnceCell::new(),
        })
    }

    /// Resolves the collection id, creating the collection on first use.
    pub async fn ensure_collection(&self) -> Result<&str, SearchError> {
        let collections_url = self.endpoint.join("api/v1/collections")?;
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(collections_url)
                    .json(&json!({ "name": self.collection, "get_or_create": true }))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(SearchError::NotReady(format!(
                        "chroma collection {} unavailable: {}",
                        self.collection,
                        response.status()
                    )));
                }

                let parsed: Value = response.json().await?;
                parsed
                    .pointer("/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| SearchError::BackendResponse {
                        backend: "chroma".to_string(),
                        details: "collection response has no id".to_string(),
                    })
            })
            .await?;
        Ok(id.as_str())
    }

    async fn call(&self, operation: &str, body: Value) -> Result<Value, SearchError> {
        let id = self.ensure_collection().await?;
        let url = self
            .endpoint
            .join(&format!("api/v1/collections/{id}/{operation}"))?;
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "chroma".to_string(),
                details: format!("{operation}: {}", response.status()),
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn where_clause(filter: &MetadataFilter) -> Option<Value> {
    let clauses: Vec<Value> = filter
        .equals
        .iter()
        .map(|(key, value)| {
            let mut clause = Map::new();
            clause.insert(key.clone(), value.clone());
            Value::Object(clause)
        })
        .collect();

    match clauses.len() {
        0 => None,
        1 => clauses.into_iter().next(),
        _ => Some(json!({ "$and": clauses })),
    }
}

/// Zips the parallel `ids`/`documents`/`metadatas` arrays of a Chroma result.
fn zip_records(ids: &Value, documents: &Value, metadatas: &Value) -> Vec<StoredChunk> {
    let ids = ids.as_array().cloned().unwrap_or_default();
    ids.iter()
        .enumerate()
        .filter_map(|(position, id)| {
            let id = id.as_str()?.to_string();
            let text = documents
                .get(position)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let metadata: Metadata = metadatas
                .get(position)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Some(StoredChunk { id, text, metadata })
        })
        .collect()
}

#[async_trait]
impl ContentIndex for ChromaStore {
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }

        let documents: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
        let embeddings = self.embedder.embed(&documents).await?;
        if embeddings.len() != records.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                records.len()
            )));
        }

        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        let metadatas: Vec<Metadata> = records.iter().map(|record| record.metadata.to_map()).collect();

        self.call(
            "upsert",
            json!({
                "ids": ids,
                "embeddings": embeddings,
                "metadatas": metadatas,
                "documents": documents,
            }),
        )
        .await?;
        debug!(count = records.len(), collection = %self.collection, "upserted chunks");
        Ok(())
    }

    async fn query_by_text(&self, text: &str, k: usize) -> Result<Vec<StoredChunk>, SearchError> {
        let query_vector = self.embedder.embed_one(text).await?;
        let parsed = self
            .call(
                "query",
                json!({
                    "query_embeddings": [query_vector],
                    "n_results": k,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;

        // One result list per query embedding; there is exactly one.
        let first = |key: &str| parsed.pointer(&format!("/{key}/0")).cloned().unwrap_or(Value::Null);
        Ok(zip_records(&first("ids"), &first("documents"), &first("metadatas")))
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let parsed = self
            .call("get", json!({ "ids": ids, "include": ["documents", "metadatas"] }))
            .await?;
        Ok(zip_records(&parsed["ids"], &parsed["documents"], &parsed["metadatas"]))
    }

    async fn get_by_metadata(
        &self,
        filter: &MetadataFilter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredChunk>, SearchError> {
        let mut body = json!({ "include": ["documents", "metadatas"] });
        if let Some(clause) = where_clause(filter) {
            body["where"] = clause;
        }
        if let Some(limit) = limit {
            body["limit"] = json!(limit);
        }

        let parsed = self.call("get", body).await?;
        Ok(zip_records(&parsed["ids"], &parsed["documents"], &parsed["metadatas"]))
    }

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<(), SearchError> {
        let clause = where_clause(filter).ok_or_else(|| {
            SearchError::Request("refusing to delete with an empty filter".to_string())
        })?;
        self.call("delete", json!({ "where": clause })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_filter_is_a_plain_where() {
        let filter = MetadataFilter::eq("file_hash", "abc");
        assert_eq!(where_clause(&filter), Some(json!({ "file_hash": "abc" })));
        assert_eq!(where_clause(&MetadataFilter::default()), None);
    }

    #[test]
    fn multiple_filters_are_anded() {
        let mut filter = MetadataFilter::eq("filename", "a.pdf");
        filter.equals.push(("chunk_index".to_string(), json!(2)));
        assert_eq!(
            where_clause(&filter),
            Some(json!({ "$and": [{ "filename": "a.pdf" }, { "chunk_index": 2 }] }))
        );
    }

    #[test]
    fn endpoint_must_be_a_url() {
        let embedder: Arc<dyn Embedder> = Arc::new(crate::embeddings::HashingEmbedder::default());
        let result = ChromaStore::new("localhost 8000", "documents", embedder);
        assert!(matches!(result, Err(SearchError::Url(_))));
    }

    #[test]
    fn zip_tolerates_missing_documents_and_metadata() {
        let records = zip_records(
            &json!(["a_part_0", "a_part_1"]),
            &json!(["first", null]),
            &json!([{ "filename": "a" }]),
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].filename(), Some("a"));
        assert_eq!(records[1].text, "");
        assert!(records[1].metadata.is_empty());
    }
}
