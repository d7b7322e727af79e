use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot create directory '{path}': {source}")]
    CreateDir { path: String, source: std::io::Error },
    #[error("cannot write '{path}': {source}")]
    Write { path: String, source: std::io::Error },
    #[error("invalid stored path '{0}'")]
    InvalidPath(String),
}

/// Durable home for normalized images. `save` returns the relative path the
/// static file collaborator serves the asset under.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError>;
    /// Best-effort removal; a missing file is not an error.
    async fn remove(&self, relative_path: &str) -> Result<(), StorageError>;
}

/// Writes files into `root`, named after the current time in nanoseconds.
/// Returned paths are `<prefix>/<file name>`.
pub struct FsImageStore {
    root: PathBuf,
    prefix: String,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let prefix = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "uploads".into());
        Self { root, prefix }
    }

    fn file_name_for(&self, relative_path: &str) -> Result<String, StorageError> {
        let name = relative_path
            .strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorageError::InvalidPath(relative_path.to_string()))?;
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(StorageError::InvalidPath(relative_path.to_string()));
        }
        Ok(name.to_string())
    }
}

/// Writes into a file `save` has just claimed. A failed write removes the
/// file so no empty name is left behind.
async fn fill_claimed<W>(mut file: W, path: &Path, bytes: &[u8]) -> Result<(), StorageError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    if let Err(source) = written {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(StorageError::Write { path: path.display().to_string(), source });
    }
    Ok(())
}

fn timestamp_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::CreateDir { path: self.root.display().to_string(), source })?;

        // Two saves within the same nanosecond must not clobber each other:
        // claim the name with create_new and step forward on collision.
        let mut stamp = timestamp_nanos();
        loop {
            let name = format!("{stamp}.{extension}");
            let path = self.root.join(&name);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(file) => {
                    fill_claimed(file, &path, bytes).await?;
                    debug!(path = %path.display(), size = bytes.len(), "image stored");
                    return Ok(format!("{}/{}", self.prefix, name));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(source) => {
                    return Err(StorageError::Write { path: path.display().to_string(), source })
                }
            }
        }
    }

    async fn remove(&self, relative_path: &str) -> Result<(), StorageError> {
        let name = self.file_name_for(relative_path)?;
        let path = self.root.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => {
                warn!(path = %path.display(), err = %source, "image removal failed");
                Err(StorageError::Write { path: path.display().to_string(), source })
            }
        }
    }
}
