use crate::answer::{build_context, Answerer, ExtractiveAnswerer};
use crate::chunking::{split_into_chunks, ChunkingConfig};
use crate::config::RagConfig;
use crate::document::{Document, UploadedFile};
use crate::embeddings::{check_batch, Embedder};
use crate::error::{RagError, Result};
use crate::index::{Metric, VectorIndex};
use crate::knowledge_base::{DocumentSummary, KnowledgeBase};
use crate::retrieval::{RetrievedChunk, Retriever};
use log::{error, info, warn};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Pipeline settings that stay fixed for the lifetime of an engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub metric: Metric,
}

impl From<&RagConfig> for EngineOptions {
    fn from(config: &RagConfig) -> Self {
        EngineOptions {
            chunking: config.chunking,
            top_k: config.top_k,
            max_context_chars: config.max_context_chars,
            metric: config.metric,
        }
    }
}

/// A file that could not be ingested during a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileError {
    pub filename: String,
    pub kind: String,
    pub reason: String,
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub generation: u64,
    pub version: String,
    pub documents_indexed: usize,
    /// Parsed fine but contained no text
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub chunks_indexed: usize,
    pub errors: Vec<FileError>,
}

impl RebuildReport {
    /// Questions can be asked once at least one chunk is indexed.
    pub fn is_queryable(&self) -> bool {
        self.chunks_indexed > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer_text: String,
    pub confidence: f32,
    pub context: String,
    pub retrieved_chunks: Vec<RetrievedChunk>,
    /// Generation of the knowledge base that served the query
    pub generation: u64,
}

/// Summary of the live knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStatus {
    pub generation: u64,
    pub version: String,
    pub model: String,
    pub documents: Vec<DocumentSummary>,
    pub chunks: usize,
}

/// RAG (Retrieval-Augmented Generation) engine
///
/// Owns the live knowledge base. Queries run against an `Arc` snapshot taken
/// at their start; rebuilds construct a complete new knowledge base on the
/// side and swap it in at the end, so a query sees either the old or the new
/// generation, never a mix.
pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    answerer: Box<dyn Answerer>,
    options: EngineOptions,
    live: RwLock<Arc<KnowledgeBase>>,
    rebuild_lock: Mutex<()>,
    /// Highest generation handed out or found on disk
    last_generation: AtomicU64,
}

impl RagEngine {
    /// Create a new RAG engine with an empty knowledge base
    pub fn new(
        embedder: Arc<dyn Embedder>,
        answerer: Box<dyn Answerer>,
        options: EngineOptions,
    ) -> Self {
        let empty = KnowledgeBase::empty(embedder.model_name(), embedder.dims(), options.metric);

        RagEngine {
            embedder,
            answerer,
            options,
            live: RwLock::new(Arc::new(empty)),
            rebuild_lock: Mutex::new(()),
            last_generation: AtomicU64::new(0),
        }
    }

    /// Engine with the configured embedder and the extractive answerer.
    pub fn from_config(config: &RagConfig) -> anyhow::Result<Self> {
        let embedder = config.build_embedder()?;
        let answerer = Box::new(ExtractiveAnswerer::new(config.min_answer_score));
        Ok(RagEngine::new(embedder, answerer, EngineOptions::from(config)))
    }

    /// Snapshot of the live knowledge base.
    pub fn current(&self) -> Arc<KnowledgeBase> {
        match self.live.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn install(&self, kb: Arc<KnowledgeBase>) {
        match self.live.write() {
            Ok(mut guard) => *guard = kb,
            Err(poisoned) => *poisoned.into_inner() = kb,
        }
    }

    pub fn status(&self) -> KnowledgeBaseStatus {
        let kb = self.current();
        KnowledgeBaseStatus {
            generation: kb.generation(),
            version: kb.version().to_string(),
            model: kb.model().to_string(),
            documents: kb.documents().to_vec(),
            chunks: kb.chunk_count(),
        }
    }

    /// Rebuild the knowledge base from scratch out of `files`.
    ///
    /// Files that cannot be parsed are recorded in the report and skipped.
    /// Embedding or indexing failures abort the rebuild and leave the previous
    /// knowledge base live.
    pub async fn rebuild(&self, files: &[UploadedFile]) -> Result<RebuildReport> {
        let _guard = self.rebuild_lock.lock().await;
        let generation = self
            .last_generation
            .load(Ordering::SeqCst)
            .max(self.current().generation())
            + 1;
        info!(
            "Rebuilding knowledge base generation {} from {} files",
            generation,
            files.len()
        );

        let mut errors = Vec::new();
        let mut documents = Vec::new();
        let mut skipped = 0;

        for (n, file) in files.iter().enumerate() {
            match Document::load(format!("g{}/d{}", generation, n), file) {
                Ok(document) if document.is_empty() => {
                    warn!("Skipping {}: no text content", file.name);
                    skipped += 1;
                }
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!("Failed to load {}: {}", file.name, e);
                    errors.push(FileError {
                        filename: file.name.clone(),
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Split content into chunks
        let mut chunks = Vec::new();
        let mut summaries = Vec::with_capacity(documents.len());
        for document in &documents {
            let doc_chunks = split_into_chunks(&document.text, &document.id, &self.options.chunking);
            summaries.push(DocumentSummary {
                id: document.id.clone(),
                file_name: document.file_name.clone(),
                format: document.format,
                mime_type: document.mime_type.clone(),
                chunk_count: doc_chunks.len(),
            });
            chunks.extend(doc_chunks);
        }
        info!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            info!("Generating embeddings for {} chunks...", texts.len());
            self.embedder.embed_batch(&texts).await.map_err(|e| {
                error!("Embedding failed, keeping the current knowledge base: {}", e);
                e
            })?
        };
        check_batch(texts.len(), self.embedder.dims(), &vectors)?;

        let ids = chunks.iter().map(|c| c.id.clone()).collect();
        let index = VectorIndex::build(self.options.metric, self.embedder.dims(), vectors, ids)?;
        let kb = KnowledgeBase::new(
            generation,
            self.embedder.model_name(),
            summaries,
            chunks,
            index,
        );

        let report = RebuildReport {
            generation,
            version: kb.version().to_string(),
            documents_indexed: documents.len(),
            documents_skipped: skipped,
            documents_failed: errors.len(),
            chunks_indexed: kb.chunk_count(),
            errors,
        };

        self.install(Arc::new(kb));
        self.last_generation.fetch_max(generation, Ordering::SeqCst);
        info!(
            "Knowledge base generation {} is live ({} chunks, {} failed files)",
            generation, report.chunks_indexed, report.documents_failed
        );
        Ok(report)
    }

    /// Answer a question against the live knowledge base.
    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        let kb = self.current();
        let retrieval = Retriever::new(self.embedder.as_ref(), self.options.top_k)
            .retrieve(question, &kb)
            .await?;

        let context = build_context(&retrieval, self.options.max_context_chars);
        let answer = self.answerer.answer(question, &context);

        Ok(QueryResponse {
            answer_text: answer.text,
            confidence: answer.confidence,
            context: answer.context,
            retrieved_chunks: retrieval.chunks,
            generation: kb.generation(),
        })
    }

    /// Write the live knowledge base under `dir`.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf> {
        self.current().persist(dir)
    }

    /// Number the next rebuild after the knowledge base persisted under `dir`,
    /// so chunk ids stay unique across processes sharing that directory.
    /// Returns the persisted generation, if any.
    pub fn resume_numbering(&self, dir: &Path) -> Result<Option<u64>> {
        let persisted = KnowledgeBase::persisted_generation(dir)?;
        if let Some(generation) = persisted {
            self.last_generation.fetch_max(generation, Ordering::SeqCst);
        }
        Ok(persisted)
    }

    /// Load the knowledge base last persisted under `dir` and make it live.
    /// Returns `false` when nothing was persisted there.
    pub async fn restore(&self, dir: &Path) -> Result<bool> {
        let _guard = self.rebuild_lock.lock().await;
        let kb = match KnowledgeBase::restore(dir)? {
            Some(kb) => kb,
            None => return Ok(false),
        };

        if kb.model() != self.embedder.model_name() {
            return Err(RagError::Persist(format!(
                "knowledge base was built with model '{}' but the engine uses '{}'",
                kb.model(),
                self.embedder.model_name()
            )));
        }
        if kb.index().dims() != self.embedder.dims() {
            return Err(RagError::DimensionMismatch {
                expected: self.embedder.dims(),
                actual: kb.index().dims(),
            });
        }
        if kb.index().metric() != self.options.metric {
            return Err(RagError::Persist(format!(
                "knowledge base uses metric {:?} but the engine uses {:?}",
                kb.index().metric(),
                self.options.metric
            )));
        }

        info!(
            "Restored knowledge base {} ({} chunks)",
            kb.version(),
            kb.chunk_count()
        );
        self.install(Arc::new(kb));
        Ok(true)
    }

    /// Run the query loop on stdin until the user types `exit`
    pub async fn run_query_loop(&self) -> anyhow::Result<()> {
        info!("Ready to answer questions. Type 'exit' to quit.");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\nYour question: ");
            stdout.flush()?;

            buffer.clear();
            if stdin.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                info!("Goodbye!");
                break;
            }

            match self.query(question).await {
                Ok(response) if response.answer_text.is_empty() => {
                    println!("No confident answer found in the documents.");
                }
                Ok(response) => {
                    println!(
                        "{} (confidence {:.2})",
                        response.answer_text, response.confidence
                    );
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => println!("{}", e),
            }
        }

        Ok(())
    }
}
