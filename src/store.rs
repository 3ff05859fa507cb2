//! The documents directory: raw uploads kept on disk so the knowledge base
//! can be rebuilt after a restart.

use crate::document::UploadedFile;
use crate::error::{RagError, Result};
use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEMO_FILE_NAME: &str = "news.txt";

pub const DEMO_CONTENT: &str = "Artificial Intelligence (AI) is transforming the healthcare industry by enhancing diagnostics, personalizing treatment plans, and improving patient outcomes. \
AI models can analyze vast amounts of medical data to detect patterns that are not easily visible to human doctors. \
In recent years, AI-powered tools have been deployed to interpret medical imaging such as X-rays and MRIs. \
These tools can often match or exceed the accuracy of radiologists in identifying anomalies like tumors or fractures. \
Moreover, AI is being used to assist in drug discovery by predicting molecular behavior and accelerating research timelines. \
Personalized medicine is another growing area, where AI analyzes patient genetics and lifestyle to suggest the most effective treatments. \
Despite the potential, challenges remain in data privacy, bias in training data, and the need for regulatory oversight. \
Nevertheless, the integration of AI into healthcare continues to grow rapidly, offering promising advancements in patient care.";

/// Raw documents keyed by file name.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DocumentStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove every stored file and write `files` in their place.
    ///
    /// Names are validated before anything is deleted, so a bad name leaves
    /// the previous set intact. Two uploads reducing to the same file name
    /// are rejected rather than one silently replacing the other.
    pub fn replace_all(&self, files: &[UploadedFile]) -> Result<Vec<PathBuf>> {
        let names = files
            .iter()
            .map(|f| storage_name(&f.name))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::with_capacity(names.len());
        for (file, name) in files.iter().zip(&names) {
            if !seen.insert(name.as_str()) {
                return Err(RagError::Config(format!(
                    "duplicate document name {:?} (from {:?})",
                    name, file.name
                )));
            }
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        debug!("Cleared {} files from {}", removed, self.root.display());

        let mut written = Vec::with_capacity(files.len());
        for (file, name) in files.iter().zip(names) {
            let path = self.root.join(name);
            fs::write(&path, &file.bytes)?;
            written.push(path);
        }

        info!(
            "Stored {} documents in {}",
            written.len(),
            self.root.display()
        );
        Ok(written)
    }

    /// Every stored file, sorted by name.
    pub fn load_all(&self) -> Result<Vec<UploadedFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(UploadedFile::new(name, fs::read(entry.path())?));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Write the demo article when the store holds no files yet. Returns
    /// whether it was written.
    pub fn seed_demo(&self) -> Result<bool> {
        let has_files = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .any(|e| e.path().is_file());
        if has_files {
            return Ok(false);
        }

        fs::write(self.root.join(DEMO_FILE_NAME), DEMO_CONTENT)?;
        info!("Created demo file: {}", DEMO_FILE_NAME);
        Ok(true)
    }
}

/// Reduce an uploaded name to a bare file name inside the store.
fn storage_name(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(RagError::Config(format!("invalid document name: {:?}", name)));
    }
    Ok(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_name() {
        assert_eq!(storage_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(storage_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(storage_name("C:\\Users\\me\\notes.txt").unwrap(), "notes.txt");
        assert!(storage_name("").is_err());
        assert!(storage_name("dir/..").is_err());
        assert!(storage_name("dir/").is_err());
    }

    #[test]
    fn test_replace_all_clears_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path().join("documents")).unwrap();

        store
            .replace_all(&[
                UploadedFile::new("old.txt", "old"),
                UploadedFile::new("keep.csv", "a,b"),
            ])
            .unwrap();
        store
            .replace_all(&[
                UploadedFile::new("b.txt", "second"),
                UploadedFile::new("a.txt", "first"),
            ])
            .unwrap();

        let files = store.load_all().unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(files[0].bytes, b"first");
    }

    #[test]
    fn test_bad_name_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        store.replace_all(&[UploadedFile::new("a.txt", "a")]).unwrap();

        assert!(store.replace_all(&[UploadedFile::new("..", "x")]).is_err());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        store.replace_all(&[UploadedFile::new("a.txt", "a")]).unwrap();

        let err = store
            .replace_all(&[
                UploadedFile::new("reports/2023/summary.txt", "old"),
                UploadedFile::new("reports/2024/summary.txt", "new"),
            ])
            .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
        assert!(err.to_string().contains("summary.txt"));

        let files = store.load_all().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
    }

    #[test]
    fn test_seed_demo_only_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        assert!(store.seed_demo().unwrap());
        assert!(!store.seed_demo().unwrap());

        let files = store.load_all().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, DEMO_FILE_NAME);
    }
}
