//! Sentence-to-audio dispatch with caching

use std::sync::Arc;

use async_trait::async_trait;

use super::AudioCache;
use crate::{Error, Result};

/// Text-to-speech backend
#[async_trait]
pub trait SpeechSynthesisProvider: Send + Sync {
    /// Synthesize `text` with the given voice and model, returning encoded audio
    async fn synthesize(&self, text: &str, voice_id: &str, model_id: &str) -> Result<Vec<u8>>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Turns sentences into audio, consulting the cache first
#[derive(Clone)]
pub struct SpeechDispatcher {
    provider: Arc<dyn SpeechSynthesisProvider>,
    cache: Option<AudioCache>,
    voice_id: String,
    model_id: String,
}

impl std::fmt::Debug for SpeechDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechDispatcher")
            .field("provider", &self.provider.name())
            .field("cache", &self.cache)
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .finish()
    }
}

impl SpeechDispatcher {
    #[must_use]
    pub fn new(
        provider: Arc<dyn SpeechSynthesisProvider>,
        voice_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            cache: None,
            voice_id: voice_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Enable the on-disk cache
    #[must_use]
    pub fn with_cache(mut self, cache: AudioCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Synthesize one sentence
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` if the provider fails. The cache write runs
    /// in a detached task after the audio is returned; its failures are
    /// logged only.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let entry = self
            .cache
            .as_ref()
            .map(|cache| (cache, AudioCache::key(text, &self.voice_id, &self.model_id)));

        let hit = match &entry {
            Some((cache, key)) => cache.get(key).await,
            None => None,
        };
        if let Some(audio) = hit {
            tracing::debug!(bytes = audio.len(), "tts cache hit");
            return Ok(audio);
        }

        let audio = self
            .provider
            .synthesize(text, &self.voice_id, &self.model_id)
            .await
            .map_err(|e| match e {
                Error::Synthesis(_) => e,
                other => Error::Synthesis(format!("{}: {other}", self.provider.name())),
            })?;

        if let Some((cache, key)) = entry {
            let cache = cache.clone();
            let bytes = audio.clone();
            tokio::spawn(async move {
                match cache.put(&key, &bytes).await {
                    Ok(()) => tracing::debug!(key = %key, bytes = bytes.len(), "tts cached"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "tts cache write failed"),
                }
            });
        }

        Ok(audio)
    }
}
