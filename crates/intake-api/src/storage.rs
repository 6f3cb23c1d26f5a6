use std::path::PathBuf;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// Uploaded document bytes, one file per document id.
pub struct DocumentStorage {
    dir: PathBuf,
}

impl DocumentStorage {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating storage directory {}", dir.display()))?;
        info!("Document storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(id.to_string())
    }

    pub async fn write(&self, id: Uuid, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(id);
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        file.flush().await?;
        debug!("Stored document {} ({} bytes)", id, bytes.len());
        Ok(())
    }

    pub async fn read(&self, id: Uuid) -> Result<Vec<u8>> {
        let path = self.path_for(id);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }

    /// Remove a stored file, ignoring files that are already gone.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Hex SHA-256 of the uploaded bytes, recorded with each document.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
