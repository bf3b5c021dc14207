//! Polls a drop folder and feeds newly appeared PDFs through the ingestion
//! pipeline.

use crate::blob::BlobStore;
use crate::ingest::{FileOutcome, IngestionPipeline};
use crate::models::IngestOutcome;
use crate::ocr::OcrEngine;
use crate::traits::ContentIndex;
use crate::IngestError;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use walkdir::WalkDir;

/// PDFs directly inside `folder`; subdirectories are not watched.
fn folder_pdfs(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    files.sort_unstable();
    files
}

pub struct FolderWatcher {
    folder: PathBuf,
    poll_interval: Duration,
    settle_delay: Duration,
    seen: HashSet<PathBuf>,
}

impl FolderWatcher {
    /// Creates `folder` if needed. PDFs already present are treated as seen;
    /// only files that appear afterwards are ingested.
    pub async fn start(folder: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let folder = folder.into();
        tokio::fs::create_dir_all(&folder).await?;
        let seen = folder_pdfs(&folder).into_iter().collect();
        info!(folder = %folder.display(), "watching directory");

        Ok(Self {
            folder,
            poll_interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
            seen,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause between noticing a file and reading it, so copies can finish.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// PDFs that appeared since the previous call.
    pub fn new_files(&mut self) -> Vec<PathBuf> {
        folder_pdfs(&self.folder)
            .into_iter()
            .filter(|path| self.seen.insert(path.clone()))
            .collect()
    }

    pub async fn poll_once<I, B, O>(&mut self, pipeline: &IngestionPipeline<I, B, O>) -> Vec<FileOutcome>
    where
        I: ContentIndex,
        B: BlobStore,
        O: OcrEngine,
    {
        let files = self.new_files();
        if files.is_empty() {
            return Vec::new();
        }
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let mut outcomes = Vec::with_capacity(files.len());
        for path in files {
            info!(path = %path.display(), "new PDF detected");
            let outcome = match (
                path.file_name().and_then(|name| name.to_str()),
                tokio::fs::read(&path).await,
            ) {
                (Some(filename), Ok(content)) => pipeline.process_document(filename, &content).await,
                (None, _) => IngestOutcome::Error {
                    message: IngestError::MissingFileName(path.display().to_string()).to_string(),
                },
                (_, Err(read_error)) => {
                    error!(path = %path.display(), error = %read_error, "error reading new file");
                    IngestOutcome::Error {
                        message: read_error.to_string(),
                    }
                }
            };
            info!(path = %path.display(), status = outcome.status(), "processed new file");
            outcomes.push(FileOutcome { path, outcome });
        }
        outcomes
    }

    /// Polls until `shutdown` resolves, reporting each ingested file.
    pub async fn run<I, B, O, S, F>(
        mut self,
        pipeline: &IngestionPipeline<I, B, O>,
        shutdown: S,
        mut on_file: F,
    ) where
        I: ContentIndex,
        B: BlobStore,
        O: OcrEngine,
        S: Future<Output = ()>,
        F: FnMut(&FileOutcome),
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(folder = %self.folder.display(), "stopped watching directory");
                    return;
                }
                _ = ticker.tick() => {
                    for file in self.poll_once(pipeline).await {
                        on_file(&file);
                    }
                }
            }
        }
    }
}
