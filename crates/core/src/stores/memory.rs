//! In-memory [`ContentIndex`] for tests and single-process runs.
//!
//! Similarity is brute-force cosine over every stored vector.

use crate::embeddings::Embedder;
use crate::models::{ChunkRecord, MetadataFilter, StoredChunk};
use crate::traits::ContentIndex;
use crate::SearchError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

struct Entry {
    chunk: StoredChunk,
    vector: Vec<f32>,
}

pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl ContentIndex for MemoryIndex {
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<(), SearchError> {
        let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let mut entries = self.entries.write().await;
        for (record, vector) in records.iter().zip(vectors) {
            let chunk = StoredChunk::from(record.clone());
            match entries.iter_mut().find(|entry| entry.chunk.id == chunk.id) {
                Some(existing) => {
                    existing.chunk = chunk;
                    existing.vector = vector;
                }
                None => entries.push(Entry { chunk, vector }),
            }
        }
        Ok(())
    }

    async fn query_by_text(&self, text: &str, k: usize) -> Result<Vec<StoredChunk>, SearchError> {
        let query = self.embedder.embed_one(text).await?;
        let entries = self.entries.read().await;

        let mut scored: Vec<(f32, &StoredChunk)> = entries
            .iter()
            .map(|entry| (cosine_similarity(&query, &entry.vector), &entry.chunk))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>, SearchError> {
        let entries = self.entries.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| entries.iter().find(|entry| &entry.chunk.id == id))
            .map(|entry| entry.chunk.clone())
            .collect())
    }

    async fn get_by_metadata(
        &self,
        filter: &MetadataFilter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredChunk>, SearchError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|entry| filter.matches(&entry.chunk.metadata))
            .take(limit.unwrap_or(usize::MAX))
            .map(|entry| entry.chunk.clone())
            .collect())
    }

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<(), SearchError> {
        if filter.equals.is_empty() {
            return Err(SearchError::Request(
                "refusing to delete with an empty filter".to_string(),
            ));
        }
        self.entries
            .write()
            .await
            .retain(|entry| !filter.matches(&entry.chunk.metadata));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::models::BaseMetadata;

    fn record(filename: &str, index: u64, text: &str) -> ChunkRecord {
        let base = BaseMetadata {
            filename: filename.to_string(),
            created_at: "2024-01-01T00:00:00".to_string(),
            page_count: 1,
            file_hash: Some(format!("hash-{filename}")),
            ocr: false,
        };
        ChunkRecord {
            id: crate::models::chunk_id(filename, index),
            text: text.to_string(),
            metadata: base.for_chunk(index),
        }
    }

    fn index() -> MemoryIndex {
        MemoryIndex::new(Arc::new(HashingEmbedder::default()))
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() -> Result<(), SearchError> {
        let index = index();
        index.upsert_chunks(&[record("a.pdf", 0, "old text")]).await?;
        index.upsert_chunks(&[record("a.pdf", 0, "new text")]).await?;

        assert_eq!(index.len().await, 1);
        let found = index.get_by_ids(&["a.pdf_part_0".to_string()]).await?;
        assert_eq!(found[0].text, "new text");
        Ok(())
    }

    #[tokio::test]
    async fn query_ranks_closest_text_first() -> Result<(), SearchError> {
        let index = index();
        index
            .upsert_chunks(&[
                record("a.pdf", 0, "annual budget for road maintenance"),
                record("b.pdf", 0, "swimming pool opening hours in summer"),
            ])
            .await?;

        let hits = index.query_by_text("pool hours", 1).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b.pdf_part_0");
        Ok(())
    }

    #[tokio::test]
    async fn metadata_filter_and_delete() -> Result<(), SearchError> {
        let index = index();
        index
            .upsert_chunks(&[
                record("a.pdf", 0, "one"),
                record("a.pdf", 1, "two"),
                record("b.pdf", 0, "three"),
            ])
            .await?;

        let by_hash = index
            .get_by_metadata(&MetadataFilter::eq("file_hash", "hash-a.pdf"), Some(1))
            .await?;
        assert_eq!(by_hash.len(), 1);
        assert_eq!(by_hash[0].filename(), Some("a.pdf"));

        index
            .delete_by_metadata(&MetadataFilter::eq("filename", "a.pdf"))
            .await?;
        assert_eq!(index.len().await, 1);
        assert!(index.delete_by_metadata(&MetadataFilter::default()).await.is_err());
        Ok(())
    }
}
