use crate::answer::{DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_MIN_ANSWER_SCORE};
use crate::chunking::ChunkingConfig;
use crate::embeddings::{Embedder, HashingEmbedder};
use crate::gemini::{self, GeminiConfig, GeminiEmbedder};
use crate::index::Metric;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_HASHING_DIMS: usize = 384;

/// Which embedding model the process runs with.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedderKind {
    Hashing,
    Gemini(GeminiConfig),
}

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub documents_dir: PathBuf,
    pub index_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub metric: Metric,
    pub min_answer_score: f32,
    pub embedder: EmbedderKind,
    pub embedding_dims: usize,
    pub batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            documents_dir: PathBuf::from("documents"),
            index_dir: PathBuf::from("knowledge_base"),
            chunking: ChunkingConfig::default(),
            top_k: 3,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            metric: Metric::L2,
            min_answer_score: DEFAULT_MIN_ANSWER_SCORE,
            embedder: EmbedderKind::Hashing,
            embedding_dims: DEFAULT_HASHING_DIMS,
            batch_size: 64,
        }
    }
}

impl RagConfig {
    pub fn from_env() -> Result<Self> {
        RagConfig::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source. Unset keys keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = RagConfig::default();

        if let Some(dir) = lookup("RAG_DOCUMENTS_DIR") {
            config.documents_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("RAG_INDEX_DIR") {
            config.index_dir = PathBuf::from(dir);
        }
        if let Some(window) = parse_var(&lookup, "RAG_CHUNK_SIZE")? {
            config.chunking.window = window;
        }
        if let Some(overlap) = parse_var(&lookup, "RAG_CHUNK_OVERLAP")? {
            config.chunking.overlap = overlap;
        }
        if let Some(top_k) = parse_var(&lookup, "RAG_TOP_K")? {
            config.top_k = top_k;
        }
        if let Some(max) = parse_var(&lookup, "RAG_MAX_CONTEXT_CHARS")? {
            config.max_context_chars = max;
        }
        if let Some(metric) = lookup("RAG_METRIC") {
            config.metric = metric.parse::<Metric>().context("RAG_METRIC")?;
        }
        if let Some(score) = parse_var(&lookup, "RAG_MIN_ANSWER_SCORE")? {
            config.min_answer_score = score;
        }
        if let Some(batch) = parse_var(&lookup, "RAG_BATCH_SIZE")? {
            config.batch_size = batch;
        }

        let dims: Option<usize> = parse_var(&lookup, "RAG_EMBEDDING_DIMS")?;
        match lookup("RAG_EMBEDDER").as_deref().unwrap_or("hashing") {
            "hashing" => {
                config.embedding_dims = dims.unwrap_or(DEFAULT_HASHING_DIMS);
            }
            "gemini" => {
                let api_key = lookup("GEMINI_API_KEY")
                    .context("GEMINI_API_KEY must be set when RAG_EMBEDDER=gemini")?;
                let mut gemini = GeminiConfig::new(api_key);
                if let Some(url) = lookup("GEMINI_BASE_URL") {
                    gemini.base_url = url;
                }
                if let Some(model) = lookup("GEMINI_EMBEDDING_MODEL") {
                    gemini.model = model;
                }
                gemini.dims = dims.unwrap_or(gemini::DEFAULT_DIMS);
                gemini.batch_size = config.batch_size;
                config.embedding_dims = gemini.dims;
                config.embedder = EmbedderKind::Gemini(gemini);
            }
            other => bail!("RAG_EMBEDDER must be 'hashing' or 'gemini', got '{}'", other),
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.top_k == 0 {
            bail!("top_k must be >= 1");
        }
        if self.max_context_chars == 0 {
            bail!("max_context_chars must be > 0");
        }
        if !(0.0..=1.0).contains(&self.min_answer_score) {
            bail!(
                "min_answer_score must be within [0, 1], got {}",
                self.min_answer_score
            );
        }
        if self.embedding_dims == 0 {
            bail!("embedding dims must be > 0");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be > 0");
        }
        Ok(())
    }

    /// Instantiate the configured embedding model.
    pub fn build_embedder(&self) -> Result<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = match &self.embedder {
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(self.embedding_dims)?),
            EmbedderKind::Gemini(gemini) => Arc::new(
                GeminiEmbedder::new(gemini.clone())
                    .context("Failed to initialize Gemini embedder")?,
            ),
        };
        Ok(embedder)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => {
            let value = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid value for {}: '{}'", key, raw))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RagConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RagConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.chunking, ChunkingConfig::new(500, 50).unwrap());
        assert_eq!(config.top_k, 3);
        assert_eq!(config.metric, Metric::L2);
        assert_eq!(config.embedder, EmbedderKind::Hashing);
        assert_eq!(config.embedding_dims, DEFAULT_HASHING_DIMS);
        assert_eq!(config.documents_dir, PathBuf::from("documents"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("RAG_CHUNK_SIZE", "200"),
            ("RAG_CHUNK_OVERLAP", "20"),
            ("RAG_TOP_K", "5"),
            ("RAG_METRIC", "inner_product"),
            ("RAG_EMBEDDING_DIMS", "128"),
        ])
        .unwrap();
        assert_eq!(config.chunking.window, 200);
        assert_eq!(config.chunking.overlap, 20);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.metric, Metric::InnerProduct);
        assert_eq!(config.embedding_dims, 128);
        assert_eq!(config.build_embedder().unwrap().dims(), 128);
    }

    #[test]
    fn test_gemini_requires_key() {
        assert!(config_from(&[("RAG_EMBEDDER", "gemini")]).is_err());

        let config = config_from(&[
            ("RAG_EMBEDDER", "gemini"),
            ("GEMINI_API_KEY", "k"),
            ("RAG_BATCH_SIZE", "16"),
        ])
        .unwrap();
        match config.embedder {
            EmbedderKind::Gemini(gemini) => {
                assert_eq!(gemini.api_key, "k");
                assert_eq!(gemini.batch_size, 16);
                assert_eq!(gemini.dims, gemini::DEFAULT_DIMS);
            }
            other => panic!("unexpected embedder {:?}", other),
        }
        assert_eq!(config.embedding_dims, gemini::DEFAULT_DIMS);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(config_from(&[("RAG_CHUNK_OVERLAP", "500")]).is_err());
        assert!(config_from(&[("RAG_TOP_K", "0")]).is_err());
        assert!(config_from(&[("RAG_TOP_K", "three")]).is_err());
        assert!(config_from(&[("RAG_MIN_ANSWER_SCORE", "1.5")]).is_err());
        assert!(config_from(&[("RAG_METRIC", "cosine")]).is_err());
        assert!(config_from(&[("RAG_EMBEDDER", "bert")]).is_err());
    }
}
