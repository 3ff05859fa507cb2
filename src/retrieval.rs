use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::knowledge_base::KnowledgeBase;
use log::debug;
use serde::Serialize;

/// A chunk returned for a question, with a score where larger means more
/// relevant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
}

/// Retrieved chunks, most relevant first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Embeds a question and looks it up in one knowledge base snapshot.
pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    top_k: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(embedder: &'a dyn Embedder, top_k: usize) -> Self {
        Retriever { embedder, top_k }
    }

    pub async fn retrieve(&self, question: &str, kb: &KnowledgeBase) -> Result<RetrievalResult> {
        // Nothing to search; don't spend an embedding call on it.
        if kb.is_empty() {
            return Err(RagError::EmptyKnowledgeBase);
        }

        let query = self.embedder.embed(question).await?;
        let neighbors = kb.index().search(&query.values, self.top_k)?;
        let metric = kb.index().metric();

        let mut chunks = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let chunk = kb.chunk(&neighbor.chunk_id).ok_or_else(|| {
                RagError::Index(format!("chunk {} is indexed but unknown", neighbor.chunk_id))
            })?;
            chunks.push(RetrievedChunk {
                chunk_id: neighbor.chunk_id,
                text: chunk.text.clone(),
                score: metric.similarity(neighbor.distance),
            });
        }

        debug!(
            "Retrieved {} chunks from generation {}",
            chunks.len(),
            kb.generation()
        );
        Ok(RetrievalResult { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{split_into_chunks, ChunkingConfig};
    use crate::document::DocumentFormat;
    use crate::embeddings::HashingEmbedder;
    use crate::index::{Metric, VectorIndex};
    use crate::knowledge_base::DocumentSummary;

    fn knowledge_base(embedder: &HashingEmbedder, texts: &[&str]) -> KnowledgeBase {
        let mut chunks = Vec::new();
        let mut documents = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let doc_id = format!("g1/d{}", i);
            let doc_chunks = split_into_chunks(text, &doc_id, &ChunkingConfig::default());
            documents.push(DocumentSummary {
                id: doc_id,
                file_name: format!("{}.txt", i),
                format: DocumentFormat::Text,
                mime_type: "text/plain".to_string(),
                chunk_count: doc_chunks.len(),
            });
            chunks.extend(doc_chunks);
        }
        let vectors = chunks.iter().map(|c| embedder.embed_text(&c.text)).collect();
        let ids = chunks.iter().map(|c| c.id.clone()).collect();
        let index = VectorIndex::build(Metric::L2, embedder.dims(), vectors, ids).unwrap();
        KnowledgeBase::new(1, embedder.model_name(), documents, chunks, index)
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_chunk_first() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let kb = knowledge_base(
            &embedder,
            &[
                "AI models analyze medical imaging such as X-rays and MRIs.",
                "The capital of France is Paris.",
                "Quarterly revenue grew by twelve percent.",
            ],
        );

        let result = Retriever::new(&embedder, 2)
            .retrieve("What is the capital of France?", &kb)
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.chunks[0].chunk_id, "g1/d1/c0");
        assert_eq!(result.chunks[0].text, "The capital of France is Paris.");
        assert!(result.chunks[0].score >= result.chunks[1].score);
        assert!(result.chunks.iter().all(|c| c.score > 0.0 && c.score <= 1.0));
    }

    #[tokio::test]
    async fn test_top_k_larger_than_index() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let kb = knowledge_base(&embedder, &["only one document here"]);
        let result = Retriever::new(&embedder, 10)
            .retrieve("document", &kb)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_knowledge_base() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let kb = KnowledgeBase::empty(embedder.model_name(), 64, Metric::L2);
        let err = Retriever::new(&embedder, 3)
            .retrieve("anything?", &kb)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyKnowledgeBase));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_surfaces() {
        let small = HashingEmbedder::new(32).unwrap();
        let large = HashingEmbedder::new(48).unwrap();
        let kb = knowledge_base(&small, &["some indexed text"]);
        let err = Retriever::new(&large, 3)
            .retrieve("text", &kb)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
