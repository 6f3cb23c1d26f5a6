use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::draft::SavedDraft;

/// Key/value persistence for drafts. One key holds one serialized draft and
/// every save overwrites it.
pub trait DraftStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<SavedDraft>>;
    fn save(&self, key: &str, draft: &SavedDraft) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

/// Key under which a user's draft is kept.
pub fn draft_key(user_id: &str) -> String {
    format!("application-form-data-{user_id}")
}

/// Stores each key as `{dir}/{key}.json`.
pub struct FileDraftStore {
    dir: PathBuf,
}

impl FileDraftStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating draft directory {}", dir.display()))?;
        info!("Draft store directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys become file names, so keep them to a safe alphabet
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("invalid draft key: {key:?}");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl DraftStore for FileDraftStore {
    fn load(&self, key: &str) -> Result<Option<SavedDraft>> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let draft = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding draft {}", path.display()))?;
        Ok(Some(draft))
    }

    fn save(&self, key: &str, draft: &SavedDraft) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(draft)?)?;
        fs::rename(&tmp, &path)?;
        debug!("Saved draft {}", key);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::Draft;

    fn sample(step: u8) -> SavedDraft {
        let mut values = Draft::default();
        values.set("firstName", "Amina");
        SavedDraft { step, values }
    }

    #[test]
    fn save_overwrites_and_clear_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDraftStore::new(dir.path().join("drafts")).unwrap();
        let key = draft_key("0b4e7c1e-5d0a-4c5e-9f0e-000000000001");

        assert_eq!(store.load(&key).unwrap(), None);

        store.save(&key, &sample(1)).unwrap();
        store.save(&key, &sample(2)).unwrap();
        assert_eq!(store.load(&key).unwrap(), Some(sample(2)));

        store.clear(&key).unwrap();
        assert_eq!(store.load(&key).unwrap(), None);
        // Clearing twice is fine.
        store.clear(&key).unwrap();
    }

    #[test]
    fn rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDraftStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.save("../escape", &sample(1)).is_err());
        assert!(store.load("").is_err());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDraftStore::new(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        assert!(store.load("broken").is_err());
    }
}
