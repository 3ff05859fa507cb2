//! One immutable generation of documents, chunks and their vector index.

use crate::chunking::TextChunk;
use crate::document::DocumentFormat;
use crate::error::{RagError, Result};
use crate::index::{Metric, VectorIndex};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";

/// What survives of a parsed document once it has been chunked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub file_name: String,
    pub format: DocumentFormat,
    pub mime_type: String,
    pub chunk_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: String,
    generation: u64,
    model: String,
    dims: usize,
    metric: Metric,
    documents: Vec<DocumentSummary>,
}

#[derive(Deserialize)]
struct ManifestHeader {
    generation: u64,
}

/// A complete, consistent knowledge base. Never mutated after construction;
/// a rebuild produces a new one.
#[derive(Debug)]
pub struct KnowledgeBase {
    generation: u64,
    version: String,
    model: String,
    documents: Vec<DocumentSummary>,
    chunks: Vec<TextChunk>,
    lookup: HashMap<String, usize>,
    index: VectorIndex,
}

impl KnowledgeBase {
    /// The knowledge base in place before the first rebuild.
    pub fn empty(model: &str, dims: usize, metric: Metric) -> Self {
        KnowledgeBase::new(0, model, Vec::new(), Vec::new(), VectorIndex::empty(metric, dims))
    }

    pub fn new(
        generation: u64,
        model: &str,
        documents: Vec<DocumentSummary>,
        chunks: Vec<TextChunk>,
        index: VectorIndex,
    ) -> Self {
        let lookup = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        let version = compute_version(generation, model, &index, &chunks);

        KnowledgeBase {
            generation,
            version,
            model: model.to_string(),
            documents,
            chunks,
            lookup,
            index,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Content-derived identifier, used as the persistence key.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn documents(&self) -> &[DocumentSummary] {
        &self.documents
    }

    pub fn chunks(&self) -> &[TextChunk] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: &str) -> Option<&TextChunk> {
        self.lookup.get(id).map(|&i| &self.chunks[i])
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Write this knowledge base under `root/<version>/` and point
    /// `root/CURRENT` at it. The pointer is replaced by a rename, so a reader
    /// never sees a half-written version.
    pub fn persist(&self, root: &Path) -> Result<PathBuf> {
        let dir = root.join(&self.version);
        fs::create_dir_all(&dir)?;

        let manifest = Manifest {
            version: self.version.clone(),
            generation: self.generation,
            model: self.model.clone(),
            dims: self.index.dims(),
            metric: self.index.metric(),
            documents: self.documents.clone(),
        };
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
        fs::write(dir.join(CHUNKS_FILE), serde_json::to_vec_pretty(&self.chunks)?)?;
        self.index.save(&dir)?;

        let tmp = root.join(format!("{}.tmp", CURRENT_FILE));
        fs::write(&tmp, &self.version)?;
        fs::rename(&tmp, root.join(CURRENT_FILE))?;
        prune_versions(root, &self.version);

        info!(
            "Persisted knowledge base {} ({} chunks) to {}",
            self.version,
            self.chunk_count(),
            dir.display()
        );
        Ok(dir)
    }

    /// Version recorded in `root/CURRENT`, if anything was persisted.
    pub fn current_version(root: &Path) -> Result<Option<String>> {
        match fs::read_to_string(root.join(CURRENT_FILE)) {
            Ok(v) => Ok(Some(v.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Generation recorded in the manifest `root/CURRENT` points at, read
    /// without loading chunks or vectors.
    pub fn persisted_generation(root: &Path) -> Result<Option<u64>> {
        let version = match KnowledgeBase::current_version(root)? {
            Some(version) => version,
            None => return Ok(None),
        };
        let header: ManifestHeader =
            serde_json::from_slice(&fs::read(root.join(version).join(MANIFEST_FILE))?)?;
        Ok(Some(header.generation))
    }

    /// Load the version `root/CURRENT` points at. `Ok(None)` when nothing has
    /// been persisted yet.
    pub fn restore(root: &Path) -> Result<Option<Self>> {
        match KnowledgeBase::current_version(root)? {
            Some(version) => KnowledgeBase::load_version(root, &version).map(Some),
            None => Ok(None),
        }
    }

    pub fn load_version(root: &Path, version: &str) -> Result<Self> {
        let dir = root.join(version);
        let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;
        let chunks: Vec<TextChunk> = serde_json::from_slice(&fs::read(dir.join(CHUNKS_FILE))?)?;
        let index = VectorIndex::load(&dir)?;

        if index.len() != chunks.len() {
            return Err(RagError::Persist(format!(
                "index holds {} vectors but {} chunks were stored",
                index.len(),
                chunks.len()
            )));
        }
        if index.dims() != manifest.dims || index.metric() != manifest.metric {
            return Err(RagError::Persist(
                "index layout disagrees with the manifest".to_string(),
            ));
        }

        let kb = KnowledgeBase::new(
            manifest.generation,
            &manifest.model,
            manifest.documents,
            chunks,
            index,
        );
        if kb.version != manifest.version {
            return Err(RagError::Persist(format!(
                "stored content hashes to {} but the manifest says {}",
                kb.version, manifest.version
            )));
        }
        Ok(kb)
    }
}

/// Remove every version directory under `root` except `keep`. Only
/// directories holding a manifest are touched. Failures are logged, the new
/// version is already live by the time this runs.
fn prune_versions(root: &Path, keep: &str) {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {} for cleanup: {}", root.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_name() == keep || !path.join(MANIFEST_FILE).is_file() {
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => debug!("Removed superseded version {}", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

fn compute_version(generation: u64, model: &str, index: &VectorIndex, chunks: &[TextChunk]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(generation.to_le_bytes());
    hasher.update(model.as_bytes());
    hasher.update((index.dims() as u64).to_le_bytes());
    hasher.update(format!("{:?}", index.metric()).as_bytes());
    for chunk in chunks {
        hasher.update(chunk.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("g{}-{}", generation, &digest[..16])
}
