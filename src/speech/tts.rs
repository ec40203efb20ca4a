//! HTTP text-to-speech providers

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::SpeechSynthesisProvider;
use crate::{Error, Result};

/// Default `ElevenLabs` output encoding
pub const ELEVENLABS_OUTPUT_FORMAT: &str = "mp3_44100_128";

/// `ElevenLabs` synthesis over the REST API
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    output_format: String,
    language_code: Option<String>,
}

impl ElevenLabsTts {
    /// Create a new `ElevenLabs` client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.elevenlabs.io".to_string(),
            output_format: ELEVENLABS_OUTPUT_FORMAT.to_string(),
            language_code: None,
        })
    }

    /// Force a language (ISO 639-1) for multilingual models
    #[must_use]
    pub fn with_language(mut self, code: impl Into<String>) -> Self {
        self.language_code = Some(code.into());
        self
    }

    /// Override the API host
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SpeechSynthesisProvider for ElevenLabsTts {
    async fn synthesize(&self, text: &str, voice_id: &str, model_id: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            language_code: Option<&'a str>,
        }

        let url = format!(
            "{}/v1/text-to-speech/{voice_id}?output_format={}",
            self.base_url, self.output_format
        );

        let request = ElevenLabsRequest {
            text,
            model_id,
            language_code: self.language_code.as_deref(),
        };

        tracing::debug!(voice_id, model_id, chars = text.len(), "requesting ElevenLabs synthesis");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("ElevenLabs error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}

/// `OpenAI` speech synthesis
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: SecretString,
    speed: f32,
}

impl OpenAiTts {
    /// Create a new `OpenAI` TTS client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, speed: f32) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            speed,
        })
    }
}

#[async_trait]
impl SpeechSynthesisProvider for OpenAiTts {
    async fn synthesize(&self, text: &str, voice_id: &str, model_id: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: model_id,
            input: text,
            voice: voice_id,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
