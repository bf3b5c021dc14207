//! Access to the stored originals behind an answer's sources.

use crate::blob::{BlobMetadata, BlobStore};
use crate::error::StorageError;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDocument {
    Found { filename: String, content: Vec<u8> },
    Missing { filename: String },
    Failed { filename: String, message: String },
}

impl SourceDocument {
    pub fn filename(&self) -> &str {
        match self {
            Self::Found { filename, .. }
            | Self::Missing { filename }
            | Self::Failed { filename, .. } => filename,
        }
    }
}

/// Looks up each cited filename in blob storage. A missing or unreadable
/// source is reported in place and does not stop the others.
pub async fn fetch_sources<B>(blobs: &B, filenames: &[String]) -> Vec<SourceDocument>
where
    B: BlobStore + ?Sized,
{
    let mut documents = Vec::with_capacity(filenames.len());
    for filename in filenames {
        let document = match blobs.get(filename).await {
            Ok(Some(content)) => SourceDocument::Found {
                filename: filename.clone(),
                content,
            },
            Ok(None) => {
                warn!(filename = %filename, "source file not found in storage");
                SourceDocument::Missing {
                    filename: filename.clone(),
                }
            }
            Err(storage_error) => {
                error!(filename = %filename, error = %storage_error, "failed to fetch source file");
                SourceDocument::Failed {
                    filename: filename.clone(),
                    message: storage_error.to_string(),
                }
            }
        };
        documents.push(document);
    }
    documents
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub key: String,
    pub metadata: BlobMetadata,
}

/// Every stored blob with its metadata, in key order.
pub async fn list_documents<B>(blobs: &B) -> Result<Vec<StoredDocument>, StorageError>
where
    B: BlobStore + ?Sized,
{
    let mut documents = Vec::new();
    for key in blobs.list().await? {
        let metadata = blobs.get_metadata(&key).await?;
        documents.push(StoredDocument { key, metadata });
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    #[tokio::test]
    async fn sources_are_fetched_in_order_and_missing_ones_reported() -> Result<(), StorageError> {
        let blobs = MemoryBlobStore::new();
        blobs.save(b"%PDF-a", "a.pdf", Some("application/pdf")).await?;

        let documents =
            fetch_sources(&blobs, &["gone.pdf".to_string(), "a.pdf".to_string()]).await;

        assert_eq!(
            documents,
            vec![
                SourceDocument::Missing {
                    filename: "gone.pdf".to_string()
                },
                SourceDocument::Found {
                    filename: "a.pdf".to_string(),
                    content: b"%PDF-a".to_vec()
                },
            ]
        );
        assert_eq!(documents[1].filename(), "a.pdf");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_key_is_reported_as_failed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let blobs = crate::blob::LocalBlobStore::open(dir.path()).await?;

        let documents = fetch_sources(&blobs, &["../escape.pdf".to_string()]).await;
        assert!(matches!(&documents[0], SourceDocument::Failed { filename, .. } if filename == "../escape.pdf"));
        Ok(())
    }

    #[tokio::test]
    async fn listing_includes_metadata() -> Result<(), StorageError> {
        let blobs = MemoryBlobStore::new();
        blobs.save(b"x", "b.pdf", Some("application/pdf")).await?;
        blobs.save(b"text", "b.pdf.txt", None).await?;

        let documents = list_documents(&blobs).await?;
        let keys: Vec<&str> = documents.iter().map(|doc| doc.key.as_str()).collect();
        assert_eq!(keys, vec!["b.pdf", "b.pdf.txt"]);
        assert_eq!(
            documents[0].metadata.get("content_type").map(String::as_str),
            Some("application/pdf")
        );
        assert!(documents[1].metadata.is_empty());
        Ok(())
    }
}
