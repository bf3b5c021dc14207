use crate::models::{ChunkRecord, MetadataFilter, StoredChunk};
use crate::SearchError;
use async_trait::async_trait;
use std::sync::Arc;

/// Vector-search capable store of chunk records.
#[async_trait]
pub trait ContentIndex: Send + Sync {
    /// Inserts records, replacing any existing record with the same id.
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<(), SearchError>;

    /// Up to `k` records ranked by similarity to `text`.
    async fn query_by_text(&self, text: &str, k: usize) -> Result<Vec<StoredChunk>, SearchError>;

    /// Exact id lookup; ids that do not exist are simply absent.
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>, SearchError>;

    async fn get_by_metadata(
        &self,
        filter: &MetadataFilter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredChunk>, SearchError>;

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<(), SearchError>;
}

#[async_trait]
impl<T: ContentIndex + ?Sized> ContentIndex for Arc<T> {
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<(), SearchError> {
        (**self).upsert_chunks(records).await
    }

    async fn query_by_text(&self, text: &str, k: usize) -> Result<Vec<StoredChunk>, SearchError> {
        (**self).query_by_text(text, k).await
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>, SearchError> {
        (**self).get_by_ids(ids).await
    }

    async fn get_by_metadata(
        &self,
        filter: &MetadataFilter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredChunk>, SearchError> {
        (**self).get_by_metadata(filter, limit).await
    }

    async fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<(), SearchError> {
        (**self).delete_by_metadata(filter).await
    }
}
