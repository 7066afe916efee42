//! Filesystem-backed object store.

use super::{ObjectMeta, ObjectStore};
use crate::error::{ImageFlowError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores blobs as plain files under a root directory; the relative key is
/// the path below the root. Parent directories are created on demand with
/// `0755`, files land with `0644`.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        // Keys are relative paths; reject anything trying to climb out of
        // the root.
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(ImageFlowError::InvalidInput(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(key))
    }

    fn map_io(key: &str, err: std::io::Error) -> ImageFlowError {
        if err.kind() == ErrorKind::NotFound {
            ImageFlowError::NotFound(format!("object {key} does not exist"))
        } else {
            ImageFlowError::Io(err)
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut dir = parent.to_path_buf();
                while dir.starts_with(&self.root) && dir != self.root {
                    tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755))
                        .await?;
                    if !dir.pop() {
                        break;
                    }
                }
            }
        }
        tokio::fs::write(&path, bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        }
        debug!(key, bytes = bytes.len(), "stored local object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.map_err(|e| Self::map_io(key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        tokio::fs::remove_file(&path).await.map_err(|e| Self::map_io(key, e))?;
        debug!(key, "deleted local object");
        Ok(())
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta>> {
        Box::pin(try_stream! {
            // Start the walk at the deepest directory the prefix fully
            // names, then filter keys textually so partial filename
            // prefixes also work.
            let start = match prefix.rfind('/') {
                Some(idx) => self.root.join(&prefix[..idx]),
                None => self.root.clone(),
            };
            let mut pending = vec![start];
            while let Some(dir) = pending.pop() {
                let mut entries = match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => Err(e)?,
                };
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        pending.push(path);
                        continue;
                    }
                    let Ok(relative) = path.strip_prefix(&self.root) else {
                        continue;
                    };
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if !key.starts_with(prefix) {
                        continue;
                    }
                    let size = entry.metadata().await?.len();
                    yield ObjectMeta { key, size };
                }
            }
        })
    }
}
