use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// File extensions that make up a model package.
pub const MODEL_EXTENSIONS: [&str; 2] = ["zip", "glb"];

pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| MODEL_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

/// A temporary upload archive. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct PackagedArtifact {
    path: PathBuf,
    entries: usize,
}

impl PackagedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}

impl Drop for PackagedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed upload artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove upload artifact")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("No .zip or .glb files found in {0}")]
    NoModelFiles(PathBuf),

    #[error("Failed to read model folder: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to write archive: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Packaging task failed: {0}")]
    Task(String),
}

/// Zip every model file under `folder` into a fresh archive in `staging_dir`.
///
/// Entries are stored relative to `folder` with `/` separators. Blocking;
/// call through [`package_folder_async`] from async code.
pub fn package_folder(folder: &Path, staging_dir: &Path) -> Result<PackagedArtifact, PackagingError> {
    std::fs::create_dir_all(staging_dir)?;
    let path = staging_dir.join(format!("model_{}.zip", uuid::Uuid::new_v4().simple()));

    // Created before writing so a failed write still cleans up.
    let mut artifact = PackagedArtifact {
        path: path.clone(),
        entries: 0,
    };

    let mut writer = ZipWriter::new(BufWriter::new(File::create(&path)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(folder).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() && is_model_file(entry.path()) && entry.path() != path {
            files.push(entry.into_path());
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(PackagingError::NoModelFiles(folder.to_path_buf()));
    }

    for file in &files {
        let relative = file.strip_prefix(folder).unwrap_or(file);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(name, options)?;
        let mut source = File::open(file)?;
        io::copy(&mut source, &mut writer)?;
    }

    let mut inner = writer.finish()?;
    io::Write::flush(&mut inner)?;
    artifact.entries = files.len();

    tracing::debug!(
        folder = %folder.display(),
        artifact = %path.display(),
        entries = artifact.entries,
        "Packaged model folder"
    );
    Ok(artifact)
}

/// [`package_folder`] on the blocking pool.
pub async fn package_folder_async(
    folder: PathBuf,
    staging_dir: PathBuf,
) -> Result<PackagedArtifact, PackagingError> {
    tokio::task::spawn_blocking(move || package_folder(&folder, &staging_dir))
        .await
        .map_err(|e| PackagingError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write(path: &Path, contents: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_only_model_files_with_relative_paths() {
        let src = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        write(&src.path().join("chair.glb"), b"glb");
        write(&src.path().join("textures/wood.zip"), b"zip");
        write(&src.path().join("readme.txt"), b"ignore me");
        write(&src.path().join("preview.png"), b"ignore me");

        let artifact = package_folder(src.path(), staging.path()).unwrap();
        assert_eq!(artifact.entries(), 2);

        let mut archive = zip::ZipArchive::new(File::open(artifact.path()).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["chair.glb", "textures/wood.zip"]);

        let mut contents = String::new();
        archive
            .by_name("chair.glb")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "glb");
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let src = tempfile::tempdir().unwrap();
        write(&src.path().join("model.glb"), b"glb");

        let artifact = package_folder(src.path(), src.path()).unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        // The archive lives inside the folder it packs but is not packed itself.
        assert_eq!(artifact.entries(), 1);
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_folder_fails_and_leaves_nothing_behind() {
        let src = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        write(&src.path().join("notes.txt"), b"nothing to upload");

        let err = package_folder(src.path(), staging.path()).unwrap_err();
        assert!(matches!(err, PackagingError::NoModelFiles(_)));
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        assert!(is_model_file(Path::new("a/B.GLB")));
        assert!(is_model_file(Path::new("a/b.zip")));
        assert!(!is_model_file(Path::new("a/b.obj")));
        assert!(!is_model_file(Path::new("a/zip")));
    }
}
