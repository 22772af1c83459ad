use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use docrag_core::config::{Config, Settings};
use docrag_core::traits::{ChunkStore, Embedder};
use docrag_core::types::{MetaValue, Namespace, TimeRange};
use docrag_embed::{get_default_embedder, RetryPolicy, RetryingEmbedder};
use docrag_retrieval::{Ingestor, Retriever, SearchRequest};
use docrag_vector::{open_store, Store};

/// Pages inside a `.txt` document are separated by form feeds.
const PAGE_BREAK: char = '\u{c}';

/// Local document retrieval: ingest text documents, then query them by similarity.
#[derive(Parser, Debug)]
#[command(name = "docrag", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a `.txt` file or every `.txt` file under a directory.
    Ingest {
        path: PathBuf,
        /// Ingestion timestamp recorded as `created_at` (RFC 3339); defaults to now.
        #[arg(long)]
        created_at: Option<String>,
    },
    /// Rank stored chunks against a query.
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Exact-match metadata filter, repeatable (`filename=contract_a.pdf`).
        #[arg(short, long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
        #[arg(short, long)]
        namespace: Option<String>,
        /// Lower `created_at` bound (RFC 3339, inclusive).
        #[arg(long)]
        since: Option<String>,
        /// Upper `created_at` bound (RFC 3339, inclusive).
        #[arg(long)]
        until: Option<String>,
        /// Print the context records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List namespaces in creation order.
    Namespaces,
    /// Delete one namespace and its chunks.
    Drop { namespace: String },
    /// Delete every chunk in the store.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Config::load()?.settings().context("loading configuration")?;
    let store = Arc::new(open_store(&settings.store).await?);

    match cli.command {
        Commands::Ingest { path, created_at } => {
            let created_at = match created_at {
                Some(raw) => parse_time(&raw)?,
                None => Utc::now(),
            };
            ingest(&settings, store, &path, created_at).await?;
        }
        Commands::Search { query, limit, filters, namespace, since, until, json } => {
            let mut request = SearchRequest::new(query);
            if let Some(limit) = limit { request = request.limit(limit); }
            for raw in &filters {
                let (key, value) = raw.split_once('=').ok_or_else(|| anyhow!("filter '{raw}' is not KEY=VALUE"))?;
                request = request.filter(key.trim(), MetaValue::parse_loose(value.trim()));
            }
            if let Some(ns) = namespace { request = request.namespace(Namespace::new(ns)?); }
            if since.is_some() || until.is_some() {
                let start = since.as_deref().map(parse_time).transpose()?;
                let end = until.as_deref().map(parse_time).transpose()?;
                request = request.time_range(TimeRange::new(start, end)?);
            }

            let retriever = Retriever::new(store, build_embedder(&settings)?, settings.retrieval.clone());
            let result = retriever.search(&request).await?;
            if json {
                println!("{}", result.to_context_json()?);
            } else {
                for (rank, hit) in result.iter().enumerate() {
                    let filename = hit.metadata.get("filename").and_then(MetaValue::as_str).unwrap_or("?");
                    let page = hit.metadata.get("page").map(ToString::to_string).unwrap_or_default();
                    println!("{:>2}. [{:.4}] {} (file {}, page {})", rank + 1, hit.score, hit.id, filename, page);
                    println!("    {}", preview(&hit.text, 160));
                }
            }
        }
        Commands::Namespaces => {
            for ns in store.namespaces().await? {
                println!("{ns}");
            }
        }
        Commands::Drop { namespace } => {
            let removed = store.delete_namespace(&Namespace::new(namespace.clone())?).await?;
            println!("Deleted namespace {namespace} ({removed} chunks)");
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes every chunk; re-run with --yes to confirm");
            }
            store.reset().await?;
            println!("Store reset");
        }
    }
    Ok(())
}

fn build_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let inner = get_default_embedder(&settings.embedding)?;
    Ok(Arc::new(RetryingEmbedder::new(inner, RetryPolicy::from_settings(&settings.retry))))
}

async fn ingest(settings: &Settings, store: Arc<Store>, path: &Path, created_at: DateTime<Utc>) -> Result<()> {
    let files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("txt")))
        .collect();
    if files.is_empty() {
        bail!("no .txt documents under {}", path.display());
    }

    let ingestor = Ingestor::from_settings(store, build_embedder(settings)?, &settings.ingest, &settings.retrieval)?;
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents {msg}")?
            .progress_chars("#>-"),
    );

    let (mut documents, mut chunks) = (0usize, 0usize);
    for file in &files {
        let filename = file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        pb.set_message(filename.clone());
        let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
        let pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
        match ingestor.ingest(&filename, &pages, created_at).await {
            Ok(report) => {
                documents += 1;
                chunks += report.chunks;
                pb.println(format!("{filename}: {} chunks -> {}", report.chunks, report.namespace));
            }
            Err(docrag_core::Error::EmptyBatch) => warn!(file = %file.display(), "no text, skipped"),
            Err(err) => return Err(err).with_context(|| format!("ingesting {}", file.display())),
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    println!("Ingested {documents} documents ({chunks} chunks)");
    Ok(())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("'{raw}' is not an RFC 3339 timestamp"))
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}
