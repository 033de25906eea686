use crate::{MirrorError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

fn split_target(path: &Path) -> Result<(&Path, String)> {
    let parent = path.parent().ok_or_else(|| {
        MirrorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Parent directory not found",
        ))
    })?;
    let name = path
        .file_name()
        .ok_or_else(|| MirrorError::Config(format!("Not a file path: {}", path.display())))?
        .to_string_lossy()
        .to_string();
    Ok((parent, name))
}

/// Atomic write operation - write to temp file then rename
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let (parent, name) = split_target(path)?;
    fs::create_dir_all(parent).await?;

    // Write to temporary file first
    let temp_path = parent.join(format!(".{}.tmp", name));

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;

    // Atomic rename
    fs::rename(temp_path, path).await?;
    Ok(())
}

/// Blocking variant used from worker threads; the temp file gets a unique
/// name so concurrent writers of the same target never share it
pub fn atomic_write_sync(path: &Path, contents: &[u8]) -> Result<()> {
    let (parent, _) = split_target(path)?;
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| MirrorError::Io(e.error))?;
    Ok(())
}

/// All `*.gem` files directly inside `dir`, sorted by file name
pub fn list_package_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            MirrorError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
            }))
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "gem") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// The current time as the filesystem in `dir` stamps it, so it compares
/// cleanly with file modification times
pub fn filesystem_now(dir: &Path) -> Result<SystemTime> {
    std::fs::create_dir_all(dir)?;
    let marker = tempfile::NamedTempFile::new_in(dir)?;
    Ok(marker.as_file().metadata()?.modified()?)
}

pub fn modified(path: &Path) -> Result<SystemTime> {
    Ok(std::fs::metadata(path)?.modified()?)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_atomic_write_creates_parents() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("gems").join("rack-1.0.0.gem");
        atomic_write(&target, b"payload").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert!(!temp.path().join("gems").join(".rack-1.0.0.gem.tmp").exists());
    }

    #[test]
    fn test_atomic_write_sync_replaces() {
        let temp = tempdir().unwrap();
        let target = temp.path().join("names.list");
        atomic_write_sync(&target, b"old").unwrap();
        atomic_write_sync(&target, b"new").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_filesystem_now_leaves_nothing_behind() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("public");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("old.gem"), b"x").unwrap();

        let now = filesystem_now(&dir).unwrap();
        assert!(modified(&dir.join("old.gem")).unwrap() <= now);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[test]
    fn test_list_package_files() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("b-1.0.gem"), b"x").unwrap();
        std::fs::write(temp.path().join("a-1.0.gem"), b"x").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(temp.path().join("nested.gem")).unwrap();

        let files = list_package_files(temp.path()).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a-1.0.gem", "b-1.0.gem"]);
        assert!(list_package_files(&temp.path().join("missing")).unwrap().is_empty());
    }
}
