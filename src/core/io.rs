use async_trait::async_trait;
use std::io;
use std::path::Path;

/// File-system seam for artifact reads and writes.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Writes `content` in full or not at all, creating parent directories.
    async fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;
    /// True iff `path` is a regular file.
    async fn exists(&self, path: &Path) -> io::Result<bool>;
    /// Deletes `path`; a missing file is not an error.
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write beside the target and rename over it.
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".part");
        let tmp_path = path.with_file_name(tmp_name);

        if let Err(e) = tokio::fs::write(&tmp_path, content).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        Ok(())
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parents_and_leaves_no_temp() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let target = dir.path().join("a").join("b").join("line.wav");

        assert!(!storage.exists(&target).await?);
        storage.write(&target, b"first").await?;
        storage.write(&target, b"second").await?;

        assert!(storage.exists(&target).await?);
        assert_eq!(storage.read(&target).await?, b"second");

        let names: Vec<String> = std::fs::read_dir(target.parent().unwrap())?
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["line.wav".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_is_not_an_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        assert!(!storage.exists(dir.path()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let target = dir.path().join("line.yaml");

        storage.remove(&target).await?;
        storage.write(&target, b"text: one").await?;
        storage.remove(&target).await?;
        assert!(!storage.exists(&target).await?);
        Ok(())
    }
}
