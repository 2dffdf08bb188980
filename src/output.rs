//! Where compressed results go, and how they get there without ever exposing
//! a half-written file at the destination.

use crate::constants::TEMP_FILE_PREFIX;
use crate::error::{CompressionError, Result};
use std::ffi::OsString;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output placement rules, read fresh for every job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPolicy {
    /// Write results here instead of next to the input.
    pub output_dir: Option<PathBuf>,
    /// Inserted before the extension: `photo.png` -> `photo.tiny.png`.
    pub suffix: Option<String>,
}

impl OutputPolicy {
    /// Overwrite each input with its compressed result.
    pub fn in_place() -> Self {
        Self::default()
    }

    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            output_dir: None,
            suffix: Some(suffix.into()),
        }
    }

    pub fn into_dir(dir: impl Into<PathBuf>, suffix: Option<String>) -> Self {
        Self {
            output_dir: Some(dir.into()),
            suffix,
        }
    }

    fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref().filter(|s| !s.is_empty())
    }

    pub fn overwrites_original(&self) -> bool {
        self.output_dir.is_none() && self.suffix().is_none()
    }
}

/// How a staged file reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Moved with a single rename; the staged file no longer exists.
    Renamed,
    /// Copied across filesystems; the staged file is still there.
    Copied,
}

fn insert_suffix(file_name: &Path, suffix: &str) -> OsString {
    let mut name = match (file_name.file_stem(), file_name.extension()) {
        (Some(stem), Some(_)) => stem.to_os_string(),
        _ => file_name.as_os_str().to_os_string(),
    };
    name.push(suffix);
    if let (Some(_), Some(ext)) = (file_name.file_stem(), file_name.extension()) {
        name.push(".");
        name.push(ext);
    }
    name
}

/// Final destination for `input` under `policy`.
///
/// With no output directory and no suffix this is `input` itself.
pub fn generate_output_path(input: &Path, policy: &OutputPolicy) -> Result<PathBuf> {
    let file_name = input
        .file_name()
        .map(Path::new)
        .ok_or_else(|| CompressionError::FileNotFound(input.to_path_buf()))?;

    let name = match policy.suffix() {
        Some(suffix) => insert_suffix(file_name, suffix),
        None => file_name.as_os_str().to_os_string(),
    };

    Ok(match &policy.output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    })
}

fn copy_via_sibling(source: &Path, destination: &Path, dir: &Path) -> io::Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(dir)?;
    let mut input = fs::File::open(source)?;
    io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    if let Ok(metadata) = fs::metadata(source) {
        let _ = staged.as_file().set_permissions(metadata.permissions());
    }

    staged.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

/// Moves `source` onto `destination`, creating parent directories as needed.
///
/// A plain rename is tried first. When that fails (typically a cross-device
/// move) the bytes are copied into a temp file beside the destination and
/// renamed from there, so the destination still flips in one step.
pub async fn place_file(source: &Path, destination: &Path) -> Result<Placement> {
    place_file_with(source, destination, |from, to| tokio::fs::rename(from, to)).await
}

async fn place_file_with<R, F>(source: &Path, destination: &Path, rename: R) -> Result<Placement>
where
    R: FnOnce(PathBuf, PathBuf) -> F,
    F: Future<Output = io::Result<()>>,
{
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|_| CompressionError::DirectoryCreationFailed(dir.clone()))?;

    match rename(source.to_path_buf(), destination.to_path_buf()).await {
        Ok(()) => Ok(Placement::Renamed),
        Err(err) => {
            debug!(
                error = %err,
                destination = %destination.display(),
                "Rename failed, falling back to copy"
            );
            let source = source.to_path_buf();
            let destination = destination.to_path_buf();
            tokio::task::spawn_blocking(move || copy_via_sibling(&source, &destination, &dir))
                .await
                .map_err(|e| CompressionError::Io(io::Error::other(e)))??;
            Ok(Placement::Copied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_place_overwrites_original() {
        let policy = OutputPolicy::in_place();
        assert!(policy.overwrites_original());
        let dest = generate_output_path(Path::new("/imgs/photo.png"), &policy).unwrap();
        assert_eq!(dest, PathBuf::from("/imgs/photo.png"));
    }

    #[test]
    fn test_suffix_in_same_directory() {
        let policy = OutputPolicy::with_suffix(".tiny");
        assert!(!policy.overwrites_original());
        let dest = generate_output_path(Path::new("/imgs/photo.png"), &policy).unwrap();
        assert_eq!(dest, PathBuf::from("/imgs/photo.tiny.png"));
    }

    #[test]
    fn test_suffix_keeps_last_extension_only() {
        let policy = OutputPolicy::with_suffix("-min");
        let dest = generate_output_path(Path::new("/imgs/archive.v2.jpeg"), &policy).unwrap();
        assert_eq!(dest, PathBuf::from("/imgs/archive.v2-min.jpeg"));
    }

    #[test]
    fn test_suffix_without_extension() {
        let policy = OutputPolicy::with_suffix(".tiny");
        let dest = generate_output_path(Path::new("/imgs/photo"), &policy).unwrap();
        assert_eq!(dest, PathBuf::from("/imgs/photo.tiny"));
    }

    #[test]
    fn test_output_directory() {
        let policy = OutputPolicy::into_dir("/out", None);
        let dest = generate_output_path(Path::new("/imgs/photo.webp"), &policy).unwrap();
        assert_eq!(dest, PathBuf::from("/out/photo.webp"));
    }

    #[test]
    fn test_output_directory_with_suffix() {
        let policy = OutputPolicy::into_dir("/out", Some(".tiny".to_string()));
        let dest = generate_output_path(Path::new("/imgs/photo.jpg"), &policy).unwrap();
        assert_eq!(dest, PathBuf::from("/out/photo.tiny.jpg"));
    }

    #[test]
    fn test_empty_suffix_means_none() {
        let policy = OutputPolicy::with_suffix("");
        assert!(policy.overwrites_original());
    }

    #[test]
    fn test_path_without_file_name() {
        let result = generate_output_path(Path::new("/"), &OutputPolicy::in_place());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_place_file_renames_and_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("staged.tmp");
        std::fs::write(&source, b"compressed").unwrap();
        let destination = temp_dir.path().join("a").join("b").join("photo.png");

        let placement = place_file(&source, &destination).await.unwrap();

        assert_eq!(placement, Placement::Renamed);
        assert!(!source.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"compressed");
    }

    #[tokio::test]
    async fn test_place_file_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("staged.tmp");
        let destination = temp_dir.path().join("photo.png");
        std::fs::write(&source, b"small").unwrap();
        std::fs::write(&destination, b"original and much larger").unwrap();

        place_file(&source, &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"small");
    }

    #[test]
    fn test_copy_via_sibling_leaves_no_staging_files() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.bin");
        std::fs::write(&source, b"payload").unwrap();
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let destination = out_dir.join("photo.png");

        copy_via_sibling(&source, &destination, &out_dir).unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"payload");
        assert!(source.exists());
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);
    }

    async fn cross_device(_: PathBuf, _: PathBuf) -> io::Result<()> {
        Err(io::Error::other("Invalid cross-device link"))
    }

    #[tokio::test]
    async fn test_failed_rename_falls_back_to_copy() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("staged.tmp");
        std::fs::write(&source, b"compressed").unwrap();
        let out_dir = temp_dir.path().join("out");
        let destination = out_dir.join("photo.png");

        let placement = place_file_with(&source, &destination, cross_device)
            .await
            .unwrap();

        assert_eq!(placement, Placement::Copied);
        assert_eq!(std::fs::read(&destination).unwrap(), b"compressed");
        assert!(source.exists());
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_copy_fallback_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("staged.tmp");
        let destination = temp_dir.path().join("photo.png");
        std::fs::write(&source, b"small").unwrap();
        std::fs::write(&destination, b"original and much larger").unwrap();

        let placement = place_file_with(&source, &destination, cross_device)
            .await
            .unwrap();

        assert_eq!(placement, Placement::Copied);
        assert_eq!(std::fs::read(&destination).unwrap(), b"small");
    }

    #[tokio::test]
    async fn test_copy_fallback_missing_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("photo.png");

        let result =
            place_file_with(&temp_dir.path().join("gone.tmp"), &destination, cross_device).await;

        assert!(result.is_err());
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
