use async_trait::async_trait;
use ragforge_core::{RagError, RagResult};
use reqwest::Url;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Where document bytes live.
///
/// The ingestion path never reads bytes through this trait; it only asks for
/// a URI the loader can open.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// A URI from which the object behind `key` can be read.
    async fn readable_uri(&self, key: &str) -> RagResult<String>;
}

/// Storage rooted at a local directory. Keys are relative paths below the root.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Uses `root` (created if missing) as the storage directory.
    pub fn new(root: impl AsRef<Path>) -> RagResult<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = std::path::absolute(root.as_ref())?;
        Ok(Self { root })
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> RagResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(RagError::Validation(format!("invalid storage key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    /// Writes `bytes` under `key`, creating parent directories.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> RagResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RagError::Storage(format!("cannot write '{key}': {e}")))?;
        debug!(key, bytes = bytes.len(), "Stored object");
        Ok(())
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn readable_uri(&self, key: &str) -> RagResult<String> {
        let path = self.resolve(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(RagError::NotFound(format!("storage object '{key}'")));
        }
        Url::from_file_path(&path)
            .map(|url| url.to_string())
            .map_err(|_| RagError::Storage(format!("cannot build URI for '{key}'")))
    }
}
