use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::fs;
use std::path::PathBuf;

use docqa_rag::config::RagConfig;
use docqa_rag::document::UploadedFile;
use docqa_rag::rag::RagEngine;
use docqa_rag::store::DocumentStore;
use docqa_rag::RagError;

/// Question answering over your own documents (txt, pdf, csv)
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the knowledge base. Given files replace the stored documents.
    Rebuild {
        files: Vec<PathBuf>,
    },
    /// Answer a single question
    Ask {
        question: String,
    },
    /// Interactive question loop
    Chat,
    /// Show the persisted knowledge base
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = RagConfig::from_env().context("Invalid configuration")?;
    let engine = RagEngine::from_config(&config)?;

    let result = match args.command {
        Command::Rebuild { files } => rebuild(&engine, &config, &files).await,
        Command::Ask { question } => ask(&engine, &config, &question).await,
        Command::Chat => {
            restore(&engine, &config).await?;
            engine.run_query_loop().await.context("Error in query loop")
        }
        Command::Status => {
            restore(&engine, &config).await?;
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        if e.downcast_ref::<RagError>().is_some_and(RagError::is_fatal) {
            error!("Aborting: {}", e);
            std::process::exit(2);
        }
    }
    result
}

async fn rebuild(engine: &RagEngine, config: &RagConfig, paths: &[PathBuf]) -> Result<()> {
    let store = DocumentStore::open(&config.documents_dir)
        .with_context(|| format!("Cannot open {}", config.documents_dir.display()))?;

    if paths.is_empty() {
        if store.seed_demo()? {
            info!("Documents directory was empty, using the demo document");
        }
    } else {
        let mut uploads = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(path).with_context(|| format!("File not found: {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            uploads.push(UploadedFile::new(name, bytes));
        }
        store.replace_all(&uploads)?;
    }

    let files = store.load_all()?;
    if let Some(previous) = engine
        .resume_numbering(&config.index_dir)
        .with_context(|| format!("Failed to read {}", config.index_dir.display()))?
    {
        info!("Continuing after persisted generation {}", previous);
    }
    let report = engine
        .rebuild(&files)
        .await
        .context("Failed to rebuild knowledge base")?;
    engine
        .persist(&config.index_dir)
        .context("Failed to persist knowledge base")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_queryable() {
        info!("No chunks were indexed; questions are disabled until a rebuild succeeds");
    }
    Ok(())
}

async fn ask(engine: &RagEngine, config: &RagConfig, question: &str) -> Result<()> {
    restore(engine, config).await?;
    let response = engine.query(question).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn restore(engine: &RagEngine, config: &RagConfig) -> Result<()> {
    let restored = engine
        .restore(&config.index_dir)
        .await
        .with_context(|| format!("Failed to load {}", config.index_dir.display()))?;
    if !restored {
        info!("No knowledge base found in {}; run `docqa rebuild` first", config.index_dir.display());
    }
    Ok(())
}
