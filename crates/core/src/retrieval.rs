use crate::models::{chunk_id, FileListing, MetadataFilter, StoredChunk};
use crate::traits::ContentIndex;
use crate::SearchError;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

pub const DEFAULT_TOP_K: usize = 20;

/// Similarity search over the content index, with each hit widened by its
/// previous and next chunk from the same file.
pub struct Retriever<I>
where
    I: ContentIndex,
{
    index: I,
}

impl<I> Retriever<I>
where
    I: ContentIndex,
{
    pub fn new(index: I) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Never fails: a failed similarity query is logged and yields no hits,
    /// and neighbor lookups degrade to the unexpanded hit.
    pub async fn search(&self, query: &str, k: usize) -> Vec<StoredChunk> {
        let hits = match self.index.query_by_text(query, k).await {
            Ok(hits) => hits,
            Err(error) => {
                error!(query = %query, error = %error, "similarity query failed");
                return Vec::new();
            }
        };
        if hits.is_empty() {
            info!(query = %query, "no results found for query");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let text = match self.expand(&hit).await {
                Ok(expanded) => expanded,
                Err(error) => {
                    warn!(id = %hit.id, error = %error, "failed to fetch neighbors");
                    hit.text.clone()
                }
            };
            results.push(StoredChunk { text, ..hit });
        }

        results
    }

    async fn expand(&self, hit: &StoredChunk) -> Result<String, SearchError> {
        let (Some(chunk_index), Some(filename)) = (hit.chunk_index(), hit.filename()) else {
            debug!(id = %hit.id, "hit lacks chunk_index or filename, not expanding");
            return Ok(hit.text.clone());
        };

        let previous_id = chunk_index
            .checked_sub(1)
            .map(|index| chunk_id(filename, index));
        let next_id = chunk_index
            .checked_add(1)
            .map(|index| chunk_id(filename, index));

        let ids: Vec<String> = previous_id.iter().chain(next_id.iter()).cloned().collect();
        let neighbors: HashMap<String, String> = self
            .index
            .get_by_ids(&ids)
            .await?
            .into_iter()
            .map(|chunk| (chunk.id, chunk.text))
            .collect();

        let mut text = hit.text.clone();
        if let Some(previous) = previous_id.and_then(|id| neighbors.get(&id)) {
            text = format!("{previous}\n{text}");
        }
        if let Some(next) = next_id.and_then(|id| neighbors.get(&id)) {
            text = format!("{text}\n{next}");
        }
        Ok(text)
    }

    /// Total chunk count and the distinct filenames they belong to.
    pub async fn list_files(&self) -> Result<FileListing, SearchError> {
        let chunks = self
            .index
            .get_by_metadata(&MetadataFilter::default(), None)
            .await?;
        let filenames: BTreeSet<String> = chunks
            .iter()
            .filter_map(|chunk| chunk.filename().map(str::to_string))
            .collect();

        Ok(FileListing {
            total_chunks: chunks.len(),
            filenames: filenames.into_iter().collect(),
        })
    }

    /// Every chunk of `filename`, ordered by `chunk_index`.
    pub async fn file_chunks(&self, filename: &str) -> Result<Vec<StoredChunk>, SearchError> {
        let mut chunks = self
            .index
            .get_by_metadata(&MetadataFilter::eq("filename", filename), None)
            .await?;
        chunks.sort_by_key(|chunk| chunk.chunk_index().unwrap_or(0));
        Ok(chunks)
    }

    pub async fn delete_file(&self, filename: &str) -> Result<(), SearchError> {
        self.index
            .delete_by_metadata(&MetadataFilter::eq("filename", filename))
            .await?;
        info!(filename = %filename, "deleted chunks for file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkRecord, Metadata};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeIndex {
        hits: Vec<StoredChunk>,
        stored: Vec<StoredChunk>,
        fail_lookups: AtomicBool,
        fail_queries: AtomicBool,
    }

    #[async_trait]
    impl ContentIndex for FakeIndex {
        async fn upsert_chunks(&self, _records: &[ChunkRecord]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn query_by_text(&self, _text: &str, k: usize) -> Result<Vec<StoredChunk>, SearchError> {
            if self.fail_queries.load(Ordering::SeqCst) {
                return Err(SearchError::NotReady("index offline".to_string()));
            }
            Ok(self.hits.iter().take(k).cloned().collect())
        }

        async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>, SearchError> {
            if self.fail_lookups.load(Ordering::SeqCst) {
                return Err(SearchError::NotReady("index offline".to_string()));
            }
            Ok(self
                .stored
                .iter()
                .filter(|chunk| ids.contains(&chunk.id))
                .cloned()
                .collect())
        }

        async fn get_by_metadata(
            &self,
            filter: &MetadataFilter,
            _limit: Option<usize>,
        ) -> Result<Vec<StoredChunk>, SearchError> {
            Ok(self
                .stored
                .iter()
                .filter(|chunk| filter.matches(&chunk.metadata))
                .cloned()
                .collect())
        }

        async fn delete_by_metadata(&self, _filter: &MetadataFilter) -> Result<(), SearchError> {
            Ok(())
        }
    }

    fn chunk(filename: &str, index: u64, text: &str) -> StoredChunk {
        let mut metadata = Metadata::new();
        metadata.insert("filename".to_string(), json!(filename));
        metadata.insert("chunk_index".to_string(), json!(index));
        StoredChunk {
            id: chunk_id(filename, index),
            text: text.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn hit_is_wrapped_by_both_neighbors() {
        let index = FakeIndex {
            hits: vec![chunk("f", 2, "hit")],
            stored: vec![chunk("f", 1, "before"), chunk("f", 2, "hit"), chunk("f", 3, "after")],
            ..Default::default()
        };

        let results = Retriever::new(index).search("question", 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "before\nhit\nafter");
        assert_eq!(results[0].id, "f_part_2");
        assert_eq!(results[0].chunk_index(), Some(2));
    }

    #[tokio::test]
    async fn missing_next_neighbor_merges_only_previous() {
        let index = FakeIndex {
            hits: vec![chunk("f", 2, "hit")],
            stored: vec![chunk("f", 1, "before"), chunk("f", 2, "hit")],
            ..Default::default()
        };

        let results = Retriever::new(index).search("question", 5).await;
        assert_eq!(results[0].text, "before\nhit");
    }

    #[tokio::test]
    async fn first_chunk_has_no_previous_neighbor() {
        let index = FakeIndex {
            hits: vec![chunk("f", 0, "start")],
            stored: vec![chunk("f", 0, "start"), chunk("f", 1, "then")],
            ..Default::default()
        };

        let results = Retriever::new(index).search("question", 5).await;
        assert_eq!(results[0].text, "start\nthen");
    }

    #[tokio::test]
    async fn neighbor_failure_keeps_unexpanded_text() {
        let index = FakeIndex {
            hits: vec![chunk("f", 2, "hit")],
            stored: vec![chunk("f", 1, "before")],
            fail_lookups: AtomicBool::new(true),
            ..Default::default()
        };

        let results = Retriever::new(index).search("question", 5).await;
        assert_eq!(results[0].text, "hit");
    }

    #[tokio::test]
    async fn hit_without_metadata_is_returned_as_is() {
        let bare = StoredChunk {
            id: "orphan".to_string(),
            text: "lonely".to_string(),
            metadata: Metadata::new(),
        };
        let index = FakeIndex {
            hits: vec![bare],
            stored: vec![chunk("f", 1, "before")],
            ..Default::default()
        };

        let results = Retriever::new(index).search("question", 5).await;
        assert_eq!(results[0].text, "lonely");
    }

    #[tokio::test]
    async fn empty_result_set_is_not_an_error() {
        let results = Retriever::new(FakeIndex::default()).search("question", 5).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn listing_and_file_chunks() -> Result<(), SearchError> {
        let index = FakeIndex {
            stored: vec![chunk("b.pdf", 1, "b1"), chunk("a.pdf", 0, "a0"), chunk("b.pdf", 0, "b0")],
            ..Default::default()
        };
        let retriever = Retriever::new(index);

        let listing = retriever.list_files().await?;
        assert_eq!(listing.total_chunks, 3);
        assert_eq!(listing.filenames, vec!["a.pdf", "b.pdf"]);

        let chunks = retriever.file_chunks("b.pdf").await?;
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["b0", "b1"]);
        Ok(())
    }

    #[tokio::test]
    async fn last_possible_index_only_looks_backwards() {
        let index = FakeIndex {
            hits: vec![chunk("f", u64::MAX, "tail")],
            stored: vec![chunk("f", u64::MAX - 1, "before")],
            ..Default::default()
        };

        let results = Retriever::new(index).search("question", 5).await;
        assert_eq!(results[0].text, "before\ntail");
    }

    #[tokio::test]
    async fn empty_query_is_passed_to_the_index() {
        let index = FakeIndex {
            hits: vec![chunk("f", 0, "start")],
            ..Default::default()
        };

        let results = Retriever::new(index).search("", 5).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn failed_similarity_query_yields_no_results() {
        let index = FakeIndex {
            hits: vec![chunk("f", 0, "start")],
            fail_queries: AtomicBool::new(true),
            ..Default::default()
        };

        assert!(Retriever::new(index).search("question", 5).await.is_empty());
    }
}
