use crate::error::{RagError, Result};
use crate::text::content_terms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dims(&self) -> usize {
        self.values.len()
    }
}

/// Maps text to fixed-dimension vectors.
///
/// One model is used for the whole lifetime of a process, and the same text
/// always produces the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model, recorded with persisted knowledge bases.
    fn model_name(&self) -> &str;

    /// Dimension of every vector this embedder produces.
    fn dims(&self) -> usize;

    /// Embed many texts at once. Returns one vector per text, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single text (used for queries).
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        match batch.pop() {
            Some(embedding) if batch.is_empty() => Ok(embedding),
            _ => Err(RagError::Embedding(
                "embedder returned an unexpected number of vectors".to_string(),
            )),
        }
    }
}

/// Check that an embedder honoured its contract for one batch.
pub fn check_batch(expected_len: usize, dims: usize, embeddings: &[Embedding]) -> Result<()> {
    if embeddings.len() != expected_len {
        return Err(RagError::Embedding(format!(
            "expected {} vectors, got {}",
            expected_len,
            embeddings.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.dims() != dims) {
        return Err(RagError::DimensionMismatch {
            expected: dims,
            actual: bad.dims(),
        });
    }
    Ok(())
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;
const TRIGRAM_WEIGHT: f32 = 0.5;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Offline embedder based on signed feature hashing.
///
/// Each content word contributes to one bucket, and its character trigrams
/// (with `^`/`$` word boundary markers) contribute at half weight, so related
/// word forms such as "France" and "French" land close together. Vectors are
/// L2-normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    model_name: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(RagError::Config("embedding dimension must be > 0".to_string()));
        }
        Ok(HashingEmbedder {
            dims,
            model_name: format!("hashing-fnv1a-{}", dims),
        })
    }

    fn add_feature(&self, values: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dims as u64) as usize;
        // top bit picks the sign so collisions tend to cancel out
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        values[bucket] += sign * weight;
    }

    /// Embed synchronously; the vector only depends on `text`.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dims];

        for term in content_terms(text) {
            self.add_feature(&mut values, format!("w:{}", term).as_bytes(), 1.0);

            let marked: Vec<char> = format!("^{}$", term).chars().collect();
            for gram in marked.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut values, format!("t:{}", gram).as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        }

        Embedding { values }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (norm_a * norm_b)
    }

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = HashingEmbedder::new(128).unwrap();
        let a = embedder.embed("The capital of France is Paris.").await.unwrap();
        let b = embedder.embed("The capital of France is Paris.").await.unwrap();
        assert_eq!(a, b);

        let other = HashingEmbedder::new(128).unwrap();
        assert_eq!(other.embed_text("The capital of France is Paris."), a);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let texts = vec!["alpha beta".to_string(), "gamma".to_string(), String::new()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        for (text, emb) in texts.iter().zip(&batch) {
            assert_eq!(emb.dims(), 64);
            assert_eq!(*emb, embedder.embed_text(text));
        }
        check_batch(3, 64, &batch).unwrap();
    }

    #[test]
    fn test_vectors_are_unit_length() {
        let embedder = HashingEmbedder::new(256).unwrap();
        let v = embedder.embed_text("Artificial intelligence in healthcare");
        let norm = v.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let empty = embedder.embed_text("the of and");
        assert!(empty.values.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_related_text_is_closer() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let question = embedder.embed_text("What is the capital of France?");
        let fact = embedder.embed_text("The capital of France is Paris.");
        let other = embedder.embed_text("AI models analyze medical imaging such as X-rays.");
        assert!(
            cosine_similarity(&question.values, &fact.values)
                > cosine_similarity(&question.values, &other.values)
        );
    }

    #[test]
    fn test_check_batch_rejects_wrong_dims() {
        let batch = vec![Embedding {
            values: vec![0.0; 3],
        }];
        let err = check_batch(1, 4, &batch).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert!(matches!(check_batch(2, 3, &batch), Err(RagError::Embedding(_))));
    }

    #[test]
    fn test_zero_dims_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }
}
