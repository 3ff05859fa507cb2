use thiserror::Error;

/// Result alias for knowledge-base operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors raised by the knowledge-base pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// File extension is not one of txt, pdf or csv.
    #[error("unsupported file type: {file_name} (only .txt, .pdf and .csv are supported)")]
    UnsupportedFormat { file_name: String },

    /// File has a supported extension but its content could not be read.
    #[error("failed to parse {file_name}: {reason}")]
    Parse { file_name: String, reason: String },

    /// A query was issued before any chunk was indexed.
    #[error("knowledge base is empty: upload documents and rebuild before asking questions")]
    EmptyKnowledgeBase,

    /// A vector does not match the dimension the index was built with.
    #[error("vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index build failed: {0}")]
    Index(String),

    #[error("knowledge base persistence failed: {0}")]
    Persist(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Whether the error signals a model/index misconfiguration that must abort
    /// the process instead of being reported to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RagError::DimensionMismatch { .. })
    }

    /// Short machine-readable label used in rebuild reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::UnsupportedFormat { .. } => "unsupported_format",
            RagError::Parse { .. } => "parse",
            RagError::EmptyKnowledgeBase => "empty_knowledge_base",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::Embedding(_) => "embedding",
            RagError::Index(_) => "index",
            RagError::Persist(_) => "persist",
            RagError::Config(_) => "config",
            RagError::Io(_) => "io",
            RagError::Json(_) => "json",
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        RagError::Embedding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_dimension_mismatch_is_fatal() {
        assert!(RagError::DimensionMismatch {
            expected: 3,
            actual: 4
        }
        .is_fatal());
        assert!(!RagError::EmptyKnowledgeBase.is_fatal());
        assert!(!RagError::Parse {
            file_name: "a.pdf".to_string(),
            reason: "broken".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_messages_name_the_file() {
        let err = RagError::UnsupportedFormat {
            file_name: "slides.pptx".to_string(),
        };
        assert!(err.to_string().contains("slides.pptx"));
        assert_eq!(err.kind(), "unsupported_format");
    }
}
