use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::services::packaging::is_model_file;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to scan folder: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Every directory under `root` (including `root`) that directly holds a
/// `.zip` or `.glb` file, sorted.
pub fn find_model_folders(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }

    let mut folders = BTreeSet::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() && is_model_file(entry.path()) {
            if let Some(parent) = entry.path().parent() {
                folders.insert(parent.to_path_buf());
            }
        }
    }

    tracing::debug!(root = %root.display(), found = folders.len(), "Scanned for model folders");
    Ok(folders.into_iter().collect())
}

/// [`find_model_folders`] over several roots, keeping first-seen order of roots.
pub fn find_model_folders_in(roots: &[PathBuf]) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut seen = BTreeSet::new();
    let mut folders = Vec::new();
    for root in roots {
        for folder in find_model_folders(root)? {
            if seen.insert(folder.clone()) {
                folders.push(folder);
            }
        }
    }
    Ok(folders)
}
