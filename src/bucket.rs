use std::path::PathBuf;

use crate::error::LedgerError;
use crate::store::ObjectStorage;

/// Certificate bucket backed by a local directory. Objects are served from
/// `public_base_url`, which points at that directory.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn object_path(&self, path: &str) -> Result<PathBuf, LedgerError> {
        if path.is_empty() || path.contains(['/', '\\']) || path == "." || path == ".." {
            return Err(LedgerError::Validation(format!(
                "invalid object key `{path}`"
            )));
        }
        Ok(self.root.join(path))
    }
}

impl ObjectStorage for LocalBucket {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, LedgerError> {
        let target = self.object_path(path)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&target, bytes).await?;
        tracing::debug!(object = %target.display(), size = bytes.len(), "stored certificate file");
        Ok(format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            path
        ))
    }

    async fn remove(&self, path: &str) -> Result<(), LedgerError> {
        let target = self.object_path(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
