use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use companion_runtime::agent::{PromptCache, SystemPromptBuilder};
use companion_runtime::config::{SttProvider, TtsProvider};
use companion_runtime::db::{
    self, ConversationRepo, ConversationStore, FactRepo, FactStore, MemoryRepo, ProfileRepo,
};
use companion_runtime::llm::{LanguageModel, OllamaChatModel};
use companion_runtime::memory::{EmbeddingIndex, MemoryCurator, OpenAiEmbedder};
use companion_runtime::speech::{
    AudioCache, DeepgramStt, ElevenLabsTts, OpenAiTts, SpeechDispatcher, SpeechSynthesisProvider,
    TranscriptionProvider, WhisperStt,
};
use companion_runtime::tools::{GoogleSearchTool, ToolRegistry};
use companion_runtime::{Agent, Config, DbPool, TurnContext, UserInput};

/// Companion - conversational voice agent with long-term memory
#[derive(Parser)]
#[command(name = "companion", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Who is talking to whom
#[derive(Args)]
struct Participants {
    /// Conversation identifier
    #[arg(short, long, env = "COMPANION_CONVERSATION", default_value = "default")]
    conversation: String,

    /// Character identifier
    #[arg(long, env = "COMPANION_CHARACTER", default_value = "companion")]
    character: String,

    /// User identifier
    #[arg(short, long, env = "COMPANION_USER", default_value = "local")]
    user: String,
}

impl Participants {
    fn context(&self) -> TurnContext {
        TurnContext::new(&self.conversation, &self.character, &self.user)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Send one text message and speak the reply
    Chat {
        #[command(flatten)]
        who: Participants,
        /// Directory to write numbered mp3 fragments into
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// PNG image to show alongside the message
        #[arg(long)]
        image: Option<PathBuf>,
        /// Message text
        text: String,
    },
    /// Send a recorded utterance and speak the reply
    Transcribe {
        #[command(flatten)]
        who: Participants,
        /// Directory to write numbered mp3 fragments into
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Audio file to transcribe
        file: PathBuf,
    },
    /// List stored memories for a user and character
    Memories {
        #[command(flatten)]
        who: Participants,
    },
    /// Print the conversation transcript
    History {
        #[command(flatten)]
        who: Participants,
        /// Number of most recent messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Create or update a character
    Character {
        /// Character identifier
        id: String,
        #[arg(long)]
        name: String,
        /// Base system prompt
        #[arg(long, default_value = "")]
        prompt: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Create or update a user profile
    User {
        /// User identifier
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        bio: String,
    },
    /// Delete cached synthesized audio
    ClearCache,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,companion_runtime=info",
        1 => "info,companion_runtime=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Chat {
            who,
            out,
            image,
            text,
        } => {
            let mut input = UserInput::text(text);
            if let Some(path) = image {
                input = input.with_image(tokio::fs::read(&path).await?);
            }
            let pool = db::init(config.database_path())?;
            let agent = build_agent(&config, pool)?;
            let result = speak(&agent, who.context(), input, out.as_deref()).await;
            agent.shutdown().await;
            result
        }
        Command::Transcribe { who, out, file } => {
            let audio = tokio::fs::read(&file).await?;
            let pool = db::init(config.database_path())?;
            let agent = build_agent(&config, pool)?;
            let result = speak(&agent, who.context(), UserInput::audio(audio), out.as_deref()).await;
            agent.shutdown().await;
            result
        }
        Command::Memories { who } => {
            let repo = MemoryRepo::new(db::init(config.database_path())?);
            let memories = repo.list(&who.user, &who.character)?;
            if memories.is_empty() {
                println!("No memories for {} with {}", who.user, who.character);
            }
            for memory in memories {
                println!(
                    "[{:.2}] {} ({})",
                    memory.importance,
                    memory.content,
                    memory.created_at.format("%Y-%m-%d")
                );
            }
            Ok(())
        }
        Command::History { who, limit } => {
            let repo = ConversationRepo::new(db::init(config.database_path())?);
            if let Some(summary) = repo
                .get(&who.conversation)?
                .and_then(|c| c.current_summary)
            {
                println!("(summary) {summary}\n");
            }
            for record in repo.list_recent(&who.conversation, limit)? {
                println!("{}: {}", record.message.role, record.message.text());
            }
            Ok(())
        }
        Command::Character {
            id,
            name,
            prompt,
            description,
        } => {
            let profiles = ProfileRepo::new(db::init(config.database_path())?);
            profiles.upsert_character(&id, &name, &prompt, &description)?;
            println!("Saved character {id}");
            Ok(())
        }
        Command::User { id, name, bio } => {
            let profiles = ProfileRepo::new(db::init(config.database_path())?);
            profiles.upsert_user(&id, &name, &bio)?;
            println!("Saved user {id}");
            Ok(())
        }
        Command::ClearCache => {
            let cache = AudioCache::new(config.audio_cache_dir())?;
            let removed = cache.clear().await?;
            println!("Removed {removed} cached audio files");
            Ok(())
        }
    }
}

/// Run one turn, printing sentences as they arrive
async fn speak(
    agent: &Agent,
    ctx: TurnContext,
    input: UserInput,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(dir) = out {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut handle = agent.stream(ctx, input).await?;
    println!("> {}", handle.user_text);

    let mut written = 0usize;
    loop {
        let fragment = tokio::select! {
            fragment = handle.fragments.recv() => fragment,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, cancelling turn");
                handle.cancel();
                break;
            }
        };
        let Some(fragment) = fragment else {
            break;
        };

        println!("{}", fragment.text);
        if let Some(dir) = out {
            let path = dir.join(format!("{written:03}.mp3"));
            tokio::fs::write(&path, &fragment.audio).await?;
            written += 1;
        }
    }

    let outcome = handle.finish().await;
    if let Some(e) = &outcome.stream_error {
        tracing::warn!(error = %e, "reply was cut short");
    }
    tracing::debug!(
        state = ?outcome.state,
        sentences = outcome.delivered.len(),
        files = written,
        "turn complete"
    );
    Ok(())
}

fn require(key: Option<&SecretString>, var: &str) -> anyhow::Result<SecretString> {
    key.cloned()
        .ok_or_else(|| anyhow::anyhow!("{var} is not set"))
}

/// Wire providers, repositories and memory into an agent
fn build_agent(config: &Config, pool: DbPool) -> anyhow::Result<Agent> {
    let model: Arc<dyn LanguageModel> = Arc::new(OllamaChatModel::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
    ));

    let tts: Arc<dyn SpeechSynthesisProvider> = match config.tts.provider {
        TtsProvider::ElevenLabs => {
            let key = require(config.api_keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY")?;
            let mut tts = ElevenLabsTts::new(key)?;
            if let Some(language) = &config.tts.language {
                tts = tts.with_language(language.clone());
            }
            Arc::new(tts)
        }
        TtsProvider::OpenAi => {
            let key = require(config.api_keys.openai.as_ref(), "OPENAI_API_KEY")?;
            #[allow(clippy::cast_possible_truncation)]
            let speed = config.tts.speed as f32;
            Arc::new(OpenAiTts::new(key, speed)?)
        }
    };

    let mut dispatcher = SpeechDispatcher::new(
        tts,
        config.tts.voice_id.clone(),
        config.tts.model_id.clone(),
    );
    if config.tts.cache {
        dispatcher = dispatcher.with_cache(AudioCache::new(config.audio_cache_dir())?);
    }

    let conversations: Arc<dyn ConversationStore> = Arc::new(ConversationRepo::new(pool.clone()));
    let facts: Arc<dyn FactStore> = Arc::new(FactRepo::new(pool.clone()));
    let prompts = SystemPromptBuilder::new(ProfileRepo::new(pool.clone()), Arc::clone(&facts))
        .with_cache(PromptCache::new(config.agent.prompt_cache_capacity));

    let mut agent = Agent::new(
        Arc::clone(&model),
        dispatcher,
        Arc::clone(&conversations),
        prompts,
    )
    .with_settings(config.agent.settings.clone())
    .with_tools(build_tools(config));

    if let Some(transcriber) = build_transcriber(config)? {
        agent = agent.with_transcriber(transcriber);
    }

    match (&config.api_keys.openai, config.memory.enabled) {
        (Some(key), true) => {
            let mut embedder = OpenAiEmbedder::with_model(key.clone(), config.embedding.model.clone())?;
            if let Some(url) = &config.embedding.base_url {
                embedder = embedder.with_base_url(url.clone());
            }

            let index = Arc::new(
                EmbeddingIndex::new(Arc::new(embedder), Arc::new(MemoryRepo::new(pool.clone())))
                    .with_dedupe(config.memory.dedupe_limit, config.memory.dedupe_threshold),
            );
            let curator = Arc::new(
                MemoryCurator::new(
                    model,
                    Arc::clone(&index),
                    conversations,
                    facts,
                    ProfileRepo::new(pool),
                )
                .with_settings(config.memory.curator.clone()),
            );
            agent = agent.with_memory(index, curator);
        }
        (None, true) => tracing::warn!("OPENAI_API_KEY not set, long-term memory disabled"),
        (_, false) => tracing::debug!("long-term memory disabled"),
    }

    Ok(agent)
}

fn build_tools(config: &Config) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    if let Some(search) = &config.tools.google_search {
        tools.register(Arc::new(GoogleSearchTool::new(search.clone())));
    }
    tools
}

fn build_transcriber(config: &Config) -> anyhow::Result<Option<Arc<dyn TranscriptionProvider>>> {
    let transcriber: Arc<dyn TranscriptionProvider> = match config.stt.provider {
        SttProvider::Whisper => {
            let Some(key) = config.api_keys.openai.clone() else {
                tracing::debug!("OPENAI_API_KEY not set, voice input disabled");
                return Ok(None);
            };
            let mut stt = WhisperStt::new(key, config.stt.model.clone())?;
            if let Some(language) = &config.stt.language {
                stt = stt.with_language(language.clone());
            }
            Arc::new(stt)
        }
        SttProvider::Deepgram => {
            let Some(key) = config.api_keys.deepgram.clone() else {
                tracing::debug!("DEEPGRAM_API_KEY not set, voice input disabled");
                return Ok(None);
            };
            Arc::new(DeepgramStt::new(key, config.stt.model.clone())?)
        }
    };
    Ok(Some(transcriber))
}
