//! Content-addressed on-disk audio cache
//!
//! One file per `(text, voice, model)` key. Writes go to a temp file that is
//! renamed into place, so concurrent turns never observe a partial entry.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::Result;

/// Durable synthesis cache
#[derive(Debug, Clone)]
pub struct AudioCache {
    dir: PathBuf,
}

impl AudioCache {
    /// Open a cache rooted at `dir`, creating it if missing
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hex SHA-256 over length-prefixed fields
    #[must_use]
    pub fn key(text: &str, voice_id: &str, model_id: &str) -> String {
        let mut hasher = Sha256::new();
        for field in [text, voice_id, model_id] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mp3"))
    }

    /// Look up cached audio; any read failure counts as a miss
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "audio cache read failed");
                None
            }
        }
    }

    /// Store audio under `key`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written or renamed
    pub async fn put(&self, key: &str, audio: &[u8]) -> Result<()> {
        let tmp = self
            .dir
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, audio).await?;

        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove every cached entry; returns how many files were deleted
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be listed
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_unambiguous() {
        let key = AudioCache::key("Hello.", "voice", "model");
        assert_eq!(key.len(), 64);
        assert_eq!(key, AudioCache::key("Hello.", "voice", "model"));
        assert_ne!(key, AudioCache::key("Hello.", "voice", "other"));
        // Moving bytes between fields must change the key
        assert_ne!(
            AudioCache::key("ab", "c", "m"),
            AudioCache::key("a", "bc", "m")
        );
    }

    #[tokio::test]
    async fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path().join("tts")).unwrap();
        let key = AudioCache::key("Hi.", "v", "m");

        assert!(cache.get(&key).await.is_none());
        cache.put(&key, b"mp3-bytes").await.unwrap();
        assert_eq!(cache.get(&key).await.as_deref(), Some(&b"mp3-bytes"[..]));

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(cache.get(&key).await.is_none());
    }
}
