use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::Level;

use tabrag::{dataset, embedder, eval, Query, RagConfig, RagService, VectorStore};

#[derive(Parser)]
#[command(version, about = "Question answering over a tabular dataset")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Ingest a dataset snapshot (chunk → embed → upsert) – invoked by the batch scheduler
    Ingest {
        /// Path to the CSV snapshot
        snapshot: PathBuf,
    },
    /// Answer a single query against the ingested dataset
    Query {
        text: String,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        tool_name: Option<String>,
    },
    /// Replay a JSONL query file and report retrieval metrics
    Eval {
        queries: PathBuf,
        /// Write the full report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    // Configuration errors are fatal: the process must not start with them.
    let config = RagConfig::from_env()?;
    let embedder = embedder::from_config(&config)?;
    let store = Arc::new(VectorStore::open(&config).await?);
    let service = RagService::new(config, embedder, store)?;

    match Cli::parse().cmd {
        Cmd::Ingest { snapshot } => {
            let rows = dataset::load_rows(&snapshot)?;
            let report = service.ingest(&rows).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.validation_passed {
                anyhow::bail!(
                    "ingestion stored {} of {} chunks",
                    report.stored_count,
                    report.chunk_count
                );
            }
        }
        Cmd::Query {
            text,
            user_id,
            tool_name,
        } => {
            let prediction = service
                .answer_query(Query {
                    text,
                    user_id,
                    tool_name,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
        Cmd::Eval { queries, out } => {
            let queries = eval::load_queries(&queries)?;
            let report = eval::run_eval(&service, &queries).await;
            let rendered = serde_json::to_string_pretty(&report)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    tracing::info!(path = %path.display(), "wrote evaluation report");
                }
                None => println!("{}", rendered),
            }
        }
    }
    Ok(())
}
