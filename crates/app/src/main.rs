use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_answer_core::models::Metadata;
use pdf_answer_core::{
    fetch_sources, guarded, ingest_folder, list_documents, AccessDenied, AccessPolicy,
    AnswerSynthesizer, AuthRole, BlobBackendConfig, BlobStore, ChatCompletionsSynthesizer,
    ChromaStore, ContentIndex, Embedder, FolderWatcher, HashingEmbedder, IngestOutcome,
    IngestionPipeline, OcrConfig, OcrEngine, OpenAiEmbedder, Requester, Retriever, SourceDocument,
    DEFAULT_DOCUMENT_DIR, DEFAULT_TOP_K,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbeddingBackend {
    Hashing,
    Openai,
}

#[derive(Parser)]
#[command(name = "pdf-answer", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Chroma base URL
    #[arg(long, env = "CHROMA_URL", default_value = "http://localhost:8000")]
    chroma_url: String,

    /// Chroma collection name
    #[arg(long, env = "COLLECTION_NAME", default_value = "documents")]
    collection: String,

    /// How chunk and query embeddings are computed
    #[arg(long, env = "EMBEDDING_BACKEND", value_enum, default_value = "hashing")]
    embedding_backend: EmbeddingBackend,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// API key for embeddings and answer synthesis
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4o-mini")]
    chat_model: String,

    /// Requesting user, checked against the allow-lists
    #[arg(long, env = "REQUEST_USER_ID", allow_hyphen_values = true)]
    user_id: Option<i64>,

    /// Requesting chat or group, checked against the allow-lists
    #[arg(long, env = "REQUEST_CHAT_ID", allow_hyphen_values = true)]
    chat_id: Option<i64>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a single PDF through dedup, storage, parsing and indexing.
    Ingest {
        #[arg(long)]
        file: String,
    },
    /// Ingest every PDF under a folder, recursively.
    Reindex {
        #[arg(long)]
        folder: String,
    },
    /// Retrieve the chunks most similar to a query, with neighbor context.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Answer a question from the indexed documents and fetch the cited files.
    Ask {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Write each cited source document into this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Ingest PDFs as they are dropped into a folder, until interrupted.
    Watch {
        #[arg(long, env = "DOCUMENT_DIR", default_value = DEFAULT_DOCUMENT_DIR)]
        folder: PathBuf,
        /// Seconds between folder scans
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// List stored source documents with their storage metadata.
    Documents,
    /// List indexed files.
    Files,
    /// Print every chunk of one file in order.
    Inspect {
        #[arg(long)]
        filename: String,
    },
    /// Delete every chunk of one file from the index.
    Delete {
        #[arg(long)]
        filename: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-answer boot"
    );

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!(error = %format!("{failure:#}"), "command failed");
            eprintln!("{}", failure_message(&failure));
            ExitCode::FAILURE
        }
    }
}

/// Short status for the user; details only go to the log.
fn failure_message(failure: &anyhow::Error) -> &'static str {
    if failure.downcast_ref::<AccessDenied>().is_some() {
        "You are not authorized to use this command."
    } else {
        "Sorry, the command failed. Check the logs for details."
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let embedder: Arc<dyn Embedder> = match cli.embedding_backend {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::default()),
        EmbeddingBackend::Openai => Arc::new(OpenAiEmbedder::new(
            &cli.openai_base_url,
            api_key(&cli)?,
            &cli.embedding_model,
        )?),
    };
    let index: Arc<dyn ContentIndex> =
        Arc::new(ChromaStore::new(&cli.chroma_url, &cli.collection, embedder)?);
    let policy = AccessPolicy::from_env();
    let requester = Requester {
        user_id: cli.user_id,
        chat_id: cli.chat_id,
    };

    match &cli.command {
        Command::Ingest { file } => {
            let path = Path::new(file);
            let content = match read_upload(path).await {
                Ok(content) => content,
                Err(rejection) => {
                    println!("{rejection}");
                    return Ok(());
                }
            };
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .context("file path has no file name")?;

            let pipeline = build_pipeline(index).await?;
            let outcome = guarded(&policy, requester, AuthRole::Ingest, || {
                pipeline.process_document(filename, &content)
            })
            .await?;

            if let IngestOutcome::Error { message } = &outcome {
                error!(filename = %filename, error = %message, "ingestion failed");
            }
            println!("{}", outcome.user_message(filename));
        }
        Command::Reindex { folder } => {
            let pipeline = build_pipeline(index).await?;
            let report = guarded(&policy, requester, AuthRole::Ingest, || {
                ingest_folder(&pipeline, Path::new(folder))
            })
            .await??;

            for file in &report.files {
                println!("[{}] {}", file.outcome.status(), file.path.display());
            }
            println!(
                "Re-indexing complete. Successfully indexed {}/{} files.",
                report.succeeded(),
                report.files.len()
            );
        }
        Command::Search { query, top_k } => {
            let retriever = Retriever::new(index);
            let results = guarded(&policy, requester, AuthRole::Query, || {
                retriever.search(query, *top_k)
            })
            .await?;

            if results.is_empty() {
                println!("No results found.");
            }
            for result in results {
                println!("--- {} ---", result.id);
                println!("metadata: {}", metadata_line(&result.metadata));
                println!("{}", result.text);
            }
        }
        Command::Ask {
            query,
            top_k,
            export_dir,
        } => {
            let synthesizer =
                ChatCompletionsSynthesizer::new(&cli.openai_base_url, api_key(&cli)?)?
                    .with_model(&cli.chat_model);
            let retriever = Retriever::new(index);

            let answer = guarded(&policy, requester, AuthRole::Query, || async {
                let chunks = retriever.search(query, *top_k).await;
                synthesizer.answer(query, &chunks).await
            })
            .await?;

            let answer = match answer {
                Ok(answer) => answer,
                Err(failure) => {
                    error!(error = %failure, "failed to answer question");
                    println!("Sorry, an error occurred while generating the answer.");
                    return Ok(());
                }
            };

            println!("{}", answer.answer);
            if answer.sources.is_empty() {
                return Ok(());
            }

            println!();
            println!("Sources:");
            let blobs = BlobBackendConfig::from_env().build().await?;
            if let Some(dir) = export_dir {
                tokio::fs::create_dir_all(dir).await?;
            }
            for document in fetch_sources(blobs.as_ref(), &answer.sources).await {
                print_source(&document, export_dir.as_deref()).await;
            }
        }
        Command::Watch { folder, interval } => {
            policy.authorize(requester, AuthRole::Ingest)?;
            let pipeline = build_pipeline(index).await?;
            let watcher = FolderWatcher::start(folder.clone())
                .await?
                .with_poll_interval(Duration::from_secs((*interval).max(1)));
            println!("Watching directory: {}", folder.display());

            let shutdown = async {
                if let Err(signal_error) = tokio::signal::ctrl_c().await {
                    error!(error = %signal_error, "failed to listen for interrupt");
                }
            };
            watcher
                .run(&pipeline, shutdown, |file| {
                    let filename = file
                        .path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| file.path.display().to_string());
                    println!("{}", file.outcome.user_message(&filename));
                })
                .await;
        }
        Command::Documents => {
            let blobs = BlobBackendConfig::from_env().build().await?;
            let documents = guarded(&policy, requester, AuthRole::Query, || {
                list_documents(blobs.as_ref())
            })
            .await??;
            if documents.is_empty() {
                println!("No documents in storage.");
            }
            for document in documents {
                let details = document
                    .metadata
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("- {} [{details}]", document.key);
            }
        }
        Command::Files => {
            let retriever = Retriever::new(index);
            let listing = guarded(&policy, requester, AuthRole::Query, || retriever.list_files())
                .await??;
            if listing.total_chunks == 0 {
                println!("No documents found in the index.");
                return Ok(());
            }
            println!("Total Chunks: {}", listing.total_chunks);
            println!("Unique Files ({}):", listing.filenames.len());
            println!("{}", "-".repeat(30));
            for filename in listing.filenames {
                println!("- {filename}");
            }
        }
        Command::Inspect { filename } => {
            let retriever = Retriever::new(index);
            let chunks = guarded(&policy, requester, AuthRole::Query, || {
                retriever.file_chunks(filename)
            })
            .await??;
            if chunks.is_empty() {
                println!("No chunks found for this file.");
                return Ok(());
            }
            println!("Found {} chunks:", chunks.len());
            for chunk in chunks {
                let position = chunk
                    .chunk_index()
                    .map_or_else(|| "N/A".to_string(), |index| index.to_string());
                println!("--- Chunk {position} ---");
                println!("Metadata: {}", metadata_line(&chunk.metadata));
                println!("Text:\n{}", chunk.text);
                println!("{}", "-".repeat(40));
            }
        }
        Command::Delete { filename } => {
            let retriever = Retriever::new(index);
            guarded(&policy, requester, AuthRole::Ingest, || {
                retriever.delete_file(filename)
            })
            .await??;
            println!("Deleted chunks for file: {filename}");
        }
    }

    Ok(())
}

fn api_key(cli: &Cli) -> anyhow::Result<String> {
    cli.openai_api_key
        .clone()
        .context("OPENAI_API_KEY is required for this command")
}

async fn build_pipeline(
    index: Arc<dyn ContentIndex>,
) -> anyhow::Result<
    IngestionPipeline<
        Arc<dyn ContentIndex>,
        Arc<dyn BlobStore>,
        Arc<dyn OcrEngine>,
    >,
> {
    let blobs = BlobBackendConfig::from_env().build().await?;
    let ocr = OcrConfig::from_env().build();
    Ok(IngestionPipeline::new(index, blobs, ocr))
}

/// Rejects anything that is not a PDF or exceeds the upload limit.
async fn read_upload(path: &Path) -> anyhow::Result<Vec<u8>> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        bail!("Please provide a PDF file: {}", path.display());
    }

    let size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?
        .len();
    if size > MAX_UPLOAD_BYTES {
        warn!(path = %path.display(), size, "upload rejected, too large");
        bail!("File is too large. Limit is 20MB.");
    }

    Ok(tokio::fs::read(path).await?)
}

/// Reports one cited source, writing it under `export_dir` when given.
async fn print_source(document: &SourceDocument, export_dir: Option<&Path>) {
    match document {
        SourceDocument::Found { filename, content } => {
            let Some(dir) = export_dir else {
                println!("- {filename} ({} bytes)", content.len());
                return;
            };
            let Some(name) = Path::new(filename).file_name() else {
                println!("Error sending file: {filename}");
                return;
            };
            let target = dir.join(name);
            match tokio::fs::write(&target, content).await {
                Ok(()) => println!("- {filename} -> {}", target.display()),
                Err(write_error) => {
                    error!(filename = %filename, error = %write_error, "failed to export source file");
                    println!("Error sending file: {filename}");
                }
            }
        }
        SourceDocument::Missing { filename } => {
            println!("Could not locate file: {filename}");
        }
        SourceDocument::Failed { filename, .. } => {
            println!("Error sending file: {filename}");
        }
    }
}

fn metadata_line(metadata: &Metadata) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| format!("{metadata:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_and_failures_get_short_messages() {
        let denied = anyhow::Error::new(AccessDenied {
            role: AuthRole::Query,
            user_id: Some(1),
            chat_id: Some(2),
        });
        assert_eq!(
            failure_message(&denied),
            "You are not authorized to use this command."
        );

        let backend = anyhow::anyhow!("connection refused by chroma at localhost:8000");
        assert!(!failure_message(&backend).contains("refused"));
    }

    #[test]
    fn commands_parse() {
        let cli = Cli::try_parse_from([
            "pdf-answer",
            "--user-id",
            "-5",
            "ask",
            "--query",
            "when is the assembly?",
            "--export-dir",
            "out",
        ])
        .unwrap();
        assert_eq!(cli.user_id, Some(-5));
        assert!(matches!(
            cli.command,
            Command::Ask { top_k: DEFAULT_TOP_K, export_dir: Some(_), .. }
        ));

        let cli = Cli::try_parse_from(["pdf-answer", "watch", "--folder", "inbox"]).unwrap();
        assert!(matches!(cli.command, Command::Watch { interval: 2, .. }));
    }
}
