//! Configuration management for the companion runtime
//!
//! Precedence is environment, then `config.toml`, then built-in defaults.

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::agent::{AgentSettings, DEFAULT_PROMPT_CACHE_CAPACITY};
use crate::memory::{CuratorSettings, DEFAULT_DEDUPE_LIMIT, DEFAULT_DEDUPE_THRESHOLD};
use crate::tools::GoogleSearchConfig;
use crate::{Error, Result};

use file::CompanionConfigFile;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database, audio cache)
    pub data_dir: PathBuf,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub stt: SttConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub api_keys: ApiKeys,
}

/// Ollama chat model
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
}

/// Speech synthesis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    ElevenLabs,
    OpenAi,
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "elevenlabs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub voice_id: String,
    pub model_id: String,
    pub language: Option<String>,
    pub speed: f64,
    /// Keep synthesized audio on disk keyed by text, voice and model
    pub cache: bool,
}

/// Transcription backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: Option<String>,
}

/// Long-term memory tuning
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Recall and curation; needs an embeddings API key
    pub enabled: bool,
    pub dedupe_threshold: f64,
    pub dedupe_limit: usize,
    pub curator: CuratorSettings,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub settings: AgentSettings,
    pub prompt_cache_capacity: usize,
}

/// Tools offered to the model; all disabled by default
#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    pub google_search: Option<GoogleSearchConfig>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
    pub deepgram: Option<SecretString>,
    pub google_search: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::resolve(fc, |key| std::env::var(key).ok())?;

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(config)
    }

    /// Merge `env` over `fc` over defaults
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unknown providers or malformed numbers
    pub fn resolve<F>(fc: CompanionConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
            google_search: env("GOOGLE_SEARCH_API_KEY")
                .or(fc.api_keys.google_search)
                .map(SecretString::from),
        };

        let data_dir = env("COMPANION_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let llm = LlmConfig {
            base_url: env("OLLAMA_HOST")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: env("COMPANION_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "llama3.1".to_string()),
        };

        let tts_provider: TtsProvider = env("COMPANION_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map_or(Ok(TtsProvider::ElevenLabs), |p| p.parse())?;
        let (default_voice, default_model) = match tts_provider {
            TtsProvider::ElevenLabs => ("21m00Tcm4TlvDq8ikWAM", "eleven_multilingual_v2"),
            TtsProvider::OpenAi => ("alloy", "tts-1"),
        };
        let tts = TtsConfig {
            provider: tts_provider,
            voice_id: env("COMPANION_TTS_VOICE")
                .or(fc.tts.voice_id)
                .unwrap_or_else(|| default_voice.to_string()),
            model_id: env("COMPANION_TTS_MODEL")
                .or(fc.tts.model_id)
                .unwrap_or_else(|| default_model.to_string()),
            language: env("COMPANION_TTS_LANGUAGE").or(fc.tts.language),
            speed: parse_env(&env, "COMPANION_TTS_SPEED")?
                .or(fc.tts.speed)
                .unwrap_or(1.0),
            cache: parse_env(&env, "COMPANION_TTS_CACHE")?
                .or(fc.tts.cache)
                .unwrap_or(true),
        };

        let stt_provider: SttProvider = env("COMPANION_STT_PROVIDER")
            .or(fc.stt.provider)
            .map_or(Ok(SttProvider::Whisper), |p| p.parse())?;
        let stt = SttConfig {
            provider: stt_provider,
            model: env("COMPANION_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| match stt_provider {
                    SttProvider::Whisper => "whisper-1".to_string(),
                    SttProvider::Deepgram => "nova-2".to_string(),
                }),
            language: env("COMPANION_STT_LANGUAGE").or(fc.stt.language),
        };

        let embedding = EmbeddingConfig {
            model: env("COMPANION_EMBEDDING_MODEL")
                .or(fc.embedding.model)
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            base_url: env("COMPANION_EMBEDDING_URL").or(fc.embedding.base_url),
        };

        let curator_defaults = CuratorSettings::default();
        let memory = MemoryConfig {
            enabled: parse_env(&env, "COMPANION_MEMORY_ENABLED")?
                .or(fc.memory.enabled)
                .unwrap_or(true),
            dedupe_threshold: fc.memory.dedupe_threshold.unwrap_or(DEFAULT_DEDUPE_THRESHOLD),
            dedupe_limit: fc.memory.dedupe_limit.unwrap_or(DEFAULT_DEDUPE_LIMIT),
            curator: CuratorSettings {
                summary_cadence: parse_env(&env, "COMPANION_SUMMARY_CADENCE")?
                    .or(fc.memory.summary_cadence)
                    .unwrap_or(curator_defaults.summary_cadence),
                summary_window: fc
                    .memory
                    .summary_window
                    .unwrap_or(curator_defaults.summary_window),
                extraction_window: fc
                    .memory
                    .extraction_window
                    .unwrap_or(curator_defaults.extraction_window),
                importance_floor: fc
                    .memory
                    .importance_floor
                    .unwrap_or(curator_defaults.importance_floor),
            },
        };

        let agent_defaults = AgentSettings::default();
        let agent = AgentConfig {
            settings: AgentSettings {
                history_window: parse_env(&env, "COMPANION_HISTORY_WINDOW")?
                    .or(fc.agent.history_window)
                    .unwrap_or(agent_defaults.history_window),
                recall_limit: fc.agent.recall_limit.unwrap_or(agent_defaults.recall_limit),
                recall_threshold: fc
                    .agent
                    .recall_threshold
                    .unwrap_or(agent_defaults.recall_threshold),
                max_tool_steps: parse_env(&env, "COMPANION_MAX_TOOL_STEPS")?
                    .or(fc.agent.max_tool_steps)
                    .unwrap_or(agent_defaults.max_tool_steps),
                ..agent_defaults
            },
            prompt_cache_capacity: fc
                .agent
                .prompt_cache_capacity
                .unwrap_or(DEFAULT_PROMPT_CACHE_CAPACITY),
        };

        let search = fc.tools.google_search;
        let search_enabled = parse_env(&env, "COMPANION_GOOGLE_SEARCH_ENABLED")?
            .or(search.enabled)
            .unwrap_or(false);
        let google_search = if search_enabled {
            let api_key = api_keys.google_search.clone().ok_or_else(|| {
                Error::Config("google search enabled without GOOGLE_SEARCH_API_KEY".to_string())
            })?;
            let engine_id = env("GOOGLE_SEARCH_ENGINE_ID")
                .or(search.engine_id)
                .ok_or_else(|| {
                    Error::Config("google search enabled without GOOGLE_SEARCH_ENGINE_ID".to_string())
                })?;
            Some(GoogleSearchConfig {
                api_key,
                engine_id,
                base_url: search
                    .base_url
                    .unwrap_or_else(|| "https://customsearch.googleapis.com".to_string()),
                num: search.num.unwrap_or(5),
                lang: search.lang.unwrap_or_else(|| "vi".to_string()),
            })
        } else {
            None
        };
        let tools = ToolsConfig { google_search };

        Ok(Self {
            data_dir,
            llm,
            tts,
            stt,
            embedding,
            memory,
            agent,
            tools,
            api_keys,
        })
    }

    /// SQLite database location
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("companion.db")
    }

    /// Synthesized audio cache location
    #[must_use]
    pub fn audio_cache_dir(&self) -> PathBuf {
        self.data_dir.join("audio")
    }
}

/// Default data directory: `~/.local/share/companion` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/companion"),
        |d| d.data_dir().join("companion"),
    )
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{key}: {e}")))
        })
        .transpose()
}
