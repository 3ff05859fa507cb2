//! Document question answering over a rebuildable knowledge base.
//!
//! Uploaded files are parsed ([`document`]), split into overlapping windows
//! ([`chunking`]), embedded ([`embeddings`], [`gemini`]) and indexed
//! ([`index`]). [`rag::RagEngine`] owns the live [`knowledge_base`] and runs
//! the query path ([`retrieval`] then [`answer`]).

pub mod answer;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod index;
pub mod knowledge_base;
pub mod rag;
pub mod retrieval;
pub mod store;
pub mod text;

pub use error::{RagError, Result};
pub use rag::{QueryResponse, RagEngine, RebuildReport};
