//! TOML configuration file loading
//!
//! Supports `~/.config/companion/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CompanionConfigFile {
    /// Directory for the database and audio cache
    #[serde(default)]
    pub data_dir: Option<String>,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    #[serde(default)]
    pub stt: SttFileConfig,

    #[serde(default)]
    pub embedding: EmbeddingFileConfig,

    #[serde(default)]
    pub memory: MemoryFileConfig,

    #[serde(default)]
    pub agent: AgentFileConfig,

    #[serde(default)]
    pub tools: ToolsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Chat model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Ollama base URL (e.g. "http://localhost:11434")
    pub base_url: Option<String>,

    /// Model tag (e.g. "llama3.1")
    pub model: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "elevenlabs" or "openai"
    pub provider: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    /// ISO 639-1 language code hint for synthesis
    pub language: Option<String>,
    /// Speech speed multiplier, where supported
    pub speed: Option<f64>,
    /// `false` disables the on-disk audio cache
    pub cache: Option<bool>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
}

/// Embedding configuration
#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingFileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Long-term memory configuration
#[derive(Debug, Default, Deserialize)]
pub struct MemoryFileConfig {
    pub enabled: Option<bool>,
    pub dedupe_threshold: Option<f64>,
    pub dedupe_limit: Option<usize>,
    pub summary_cadence: Option<usize>,
    pub summary_window: Option<usize>,
    pub extraction_window: Option<usize>,
    pub importance_floor: Option<f64>,
}

/// Turn configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    pub history_window: Option<usize>,
    pub recall_limit: Option<usize>,
    pub recall_threshold: Option<f64>,
    pub prompt_cache_capacity: Option<usize>,
    pub max_tool_steps: Option<usize>,
}

/// Tools offered to the model
#[derive(Debug, Default, Deserialize)]
pub struct ToolsFileConfig {
    #[serde(default)]
    pub google_search: GoogleSearchFileConfig,
}

/// Google Custom Search tool; the API key lives in `[api_keys]`
#[derive(Debug, Default, Deserialize)]
pub struct GoogleSearchFileConfig {
    pub enabled: Option<bool>,
    pub engine_id: Option<String>,
    pub base_url: Option<String>,
    pub num: Option<u8>,
    pub lang: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
    pub google_search: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CompanionConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> CompanionConfigFile {
    config_file_path().map_or_else(CompanionConfigFile::default, |path| load_from(&path))
}

/// Load a config file from `path`, falling back to defaults
#[must_use]
pub fn load_from(path: &Path) -> CompanionConfigFile {
    if !path.exists() {
        return CompanionConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CompanionConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CompanionConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/companion/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("companion").join("config.toml"))
}
