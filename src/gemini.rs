use crate::embeddings::{check_batch, Embedder, Embedding};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "models/text-embedding-004";
pub const DEFAULT_DIMS: usize = 768;

/// `batchEmbedContents` accepts at most this many requests per call.
const MAX_BATCH: usize = 100;

/// Configuration for Gemini API
#[derive(Clone, Debug, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dims: usize,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        GeminiConfig {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dims: DEFAULT_DIMS,
            batch_size: MAX_BATCH,
            timeout: Duration::from_secs(30),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/{}:{}?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            method,
            self.api_key
        )
    }
}

/// Remote embedder backed by the Gemini embedding API.
#[derive(Clone)]
pub struct GeminiEmbedder {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.dims == 0 || config.batch_size == 0 {
            return Err(RagError::Config(
                "gemini dims and batch size must be > 0".to_string(),
            ));
        }
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(GeminiEmbedder { config, client })
    }

    /// Get the client configuration
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        method: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = self.config.endpoint(method);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::Embedding(format!(
                "API request failed: {} {}",
                status, error_text
            )));
        }

        Ok(response.json().await?)
    }

    fn request<'a>(&'a self, text: &'a str) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.config.model,
            content: Content {
                parts: vec![Part { text }],
            },
            output_dimensionality: Some(self.config.dims),
        }
    }

    async fn embed_group(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| self.request(text))
                .collect(),
        };

        let response: BatchEmbedResponse = self.post("batchEmbedContents", &request).await?;
        Ok(response
            .embeddings
            .into_iter()
            .map(|e| Embedding { values: e.values })
            .collect())
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dims(&self) -> usize {
        self.config.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let group_size = self.config.batch_size.min(MAX_BATCH);
        let mut embeddings = Vec::with_capacity(texts.len());

        for (i, group) in texts.chunks(group_size).enumerate() {
            debug!("Embedding batch {} ({} texts)", i + 1, group.len());
            let vectors = self.embed_group(group).await?;
            check_batch(group.len(), self.config.dims, &vectors)?;
            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = self.request(text);
        let response: EmbedResponse = self.post("embedContent", &request).await?;
        let embedding = Embedding {
            values: response.embedding.values,
        };
        check_batch(1, self.config.dims, std::slice::from_ref(&embedding))?;
        Ok(embedding)
    }
}

// Request/response structures for the Gemini API

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    /// Truncated output size; the API defaults to the model's full dimension
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbedResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}
