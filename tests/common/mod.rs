//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::{Semaphore, SemaphorePermit};

use companion_runtime::agent::SystemPromptBuilder;
use companion_runtime::db::{
    self, Conversation, ConversationRepo, ConversationStore, FactRepo, FactStore, MemoryRepo,
    ProfileRepo, TurnRecord,
};
use companion_runtime::llm::{
    ChatRequest, EventStream, LanguageModel, ModelEvent, TokenStream, ToolCall, ToolSpec,
};
use companion_runtime::memory::{BackgroundQueue, Embedder, EmbeddingIndex, MemoryCurator};
use companion_runtime::message::ChatMessage;
use companion_runtime::speech::{SpeechDispatcher, SpeechSynthesisProvider};
use companion_runtime::tools::Tool;
use companion_runtime::{Agent, DbPool, Error, Result, TurnContext};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

#[must_use]
pub fn test_context() -> TurnContext {
    TurnContext::new("conv-1", "ene", "hoang")
}

/// Language model replaying scripted output
///
/// Chat requests stream `chunks`; chunks at index `free` and later wait for a
/// permit on `gate`. JSON requests get `extraction`, summary requests get
/// `summary`.
pub struct ScriptedModel {
    chunks: Vec<std::result::Result<String, String>>,
    free: usize,
    refusal: Option<String>,
    pub gate: Arc<Semaphore>,
    extraction: String,
    summary: String,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| Ok((*c).to_string())).collect(),
            free: usize::MAX,
            refusal: None,
            gate: Arc::new(Semaphore::new(0)),
            extraction: r#"{"memories": [], "user_facts": [], "character_facts": []}"#.to_string(),
            summary: "They chatted.".to_string(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Append a stream failure after the scripted chunks
    pub fn failing_with(mut self, message: &str) -> Self {
        self.chunks.push(Err(message.to_string()));
        self
    }

    /// Fail to open chat streams at all
    pub fn refusing_with(mut self, message: &str) -> Self {
        self.refusal = Some(message.to_string());
        self
    }

    /// Hold back every chunk from index `free` until the gate opens
    pub fn gated_after(mut self, free: usize) -> Self {
        self.free = free;
        self
    }

    pub fn with_extraction(mut self, json: &str) -> Self {
        self.extraction = json.to_string();
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = summary.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests that were neither extraction nor summary
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.json_output && !is_summary(r))
            .cloned()
            .collect()
    }
}

fn is_summary(request: &ChatRequest) -> bool {
    request
        .system
        .as_deref()
        .is_some_and(|s| s.starts_with("Summarize"))
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream_generate(&self, request: &ChatRequest) -> Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if request.json_output {
            return Ok(Box::pin(stream::iter(vec![Ok(self.extraction.clone())])));
        }
        if is_summary(request) {
            return Ok(Box::pin(stream::iter(vec![Ok(self.summary.clone())])));
        }
        if let Some(message) = &self.refusal {
            return Err(Error::ModelStream(message.clone()));
        }

        let free = self.free;
        let gate = Arc::clone(&self.gate);
        let items: Vec<_> = self.chunks.clone().into_iter().enumerate().collect();
        let stream = stream::iter(items).then(move |(i, item)| {
            let gate = Arc::clone(&gate);
            async move {
                if i >= free {
                    let _ = gate.acquire().await.map(SemaphorePermit::forget);
                }
                item.map_err(Error::ModelStream)
            }
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Language model that plays one scripted step per invocation
///
/// Each step is a list of events. Once the script runs out the last step is
/// repeated.
pub struct ToolScriptModel {
    steps: Vec<Vec<ModelEvent>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ToolScriptModel {
    pub fn new(steps: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            steps,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn text(chunk: &str) -> ModelEvent {
    ModelEvent::Text(chunk.to_string())
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ModelEvent {
    ModelEvent::ToolCall(ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    })
}

#[async_trait]
impl LanguageModel for ToolScriptModel {
    async fn stream_generate(&self, _request: &ChatRequest) -> Result<TokenStream> {
        Err(Error::ModelStream("text-only streams are not scripted".to_string()))
    }

    async fn stream_events(&self, request: &ChatRequest) -> Result<EventStream> {
        let step = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let events = self
            .steps
            .get(step)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok::<_, Error>))))
    }

    fn name(&self) -> &'static str {
        "tool-script"
    }
}

/// Weather lookup returning a fixed forecast, or failing when `down`
#[derive(Default)]
pub struct WeatherTool {
    pub calls: Mutex<Vec<serde_json::Value>>,
    pub down: bool,
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "weather".to_string(),
            description: "Current weather for a city".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }),
        }
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        self.calls.lock().unwrap().push(arguments);
        if self.down {
            return Err(Error::Tool("weather service unavailable".to_string()));
        }
        Ok(serde_json::json!("Sunny, 31C"))
    }
}

/// Echoes sentence text as audio bytes and counts calls
#[derive(Default)]
pub struct RecordingTts {
    pub calls: AtomicUsize,
    pub spoken: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingTts {
    /// Fail synthesis for sentences containing `marker`
    pub fn failing_on(marker: &'static str) -> Self {
        Self {
            fail_on: Some(marker),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesisProvider for RecordingTts {
    async fn synthesize(&self, text: &str, _voice_id: &str, _model_id: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail_on.is_some_and(|marker| text.contains(marker)) {
            return Err(Error::Synthesis("voice unavailable".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Embeds known texts to fixed vectors; unknown text lands far from all of them
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    pub calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, [f32; 3])]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| ((*text).to_string(), v.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .table
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0, 0.0, -100.0]))
    }
}

/// Conversation store whose appends always fail
pub struct BrokenAppendStore(pub ConversationRepo);

impl ConversationStore for BrokenAppendStore {
    fn create_if_absent(
        &self,
        id: &str,
        window_size: usize,
        character_id: &str,
        user_id: &str,
    ) -> Result<Conversation> {
        self.0.create_if_absent(id, window_size, character_id, user_id)
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>> {
        self.0.get(id)
    }

    fn append(&self, _conversation_id: &str, _message: &ChatMessage) -> Result<TurnRecord> {
        Err(Error::Database("disk I/O error".to_string()))
    }

    fn list_recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<TurnRecord>> {
        self.0.list_recent(conversation_id, limit)
    }

    fn count(&self, conversation_id: &str) -> Result<usize> {
        self.0.count(conversation_id)
    }

    fn set_summary(&self, conversation_id: &str, summary: &str) -> Result<()> {
        self.0.set_summary(conversation_id, summary)
    }
}

/// Agent over `model` with no memory, for models other than [`ScriptedModel`]
pub fn agent_with_model(
    pool: &DbPool,
    model: Arc<dyn LanguageModel>,
    tts: Arc<RecordingTts>,
) -> Agent {
    let facts: Arc<dyn FactStore> = Arc::new(FactRepo::new(pool.clone()));
    let prompts = SystemPromptBuilder::new(ProfileRepo::new(pool.clone()), facts);
    Agent::new(
        model,
        SpeechDispatcher::new(tts, "voice", "model"),
        Arc::new(ConversationRepo::new(pool.clone())),
        prompts,
    )
    .with_queue(BackgroundQueue::Inline)
}

/// An agent over an in-memory database with fake providers
pub struct Harness {
    pub pool: DbPool,
    pub model: Arc<ScriptedModel>,
    pub tts: Arc<RecordingTts>,
    pub conversations: ConversationRepo,
    pub agent: Agent,
}

impl Harness {
    pub fn new(model: ScriptedModel, tts: RecordingTts) -> Self {
        let pool = setup_test_db();
        let conversations = ConversationRepo::new(pool.clone());
        Self::with_store(pool, model, tts, Arc::new(conversations))
    }

    pub fn with_store(
        pool: DbPool,
        model: ScriptedModel,
        tts: RecordingTts,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let model = Arc::new(model);
        let tts = Arc::new(tts);
        let facts: Arc<dyn FactStore> = Arc::new(FactRepo::new(pool.clone()));
        let prompts = SystemPromptBuilder::new(ProfileRepo::new(pool.clone()), facts);
        let dispatcher = SpeechDispatcher::new(tts.clone(), "voice", "model");

        let agent = Agent::new(model.clone(), dispatcher, store, prompts)
            .with_queue(BackgroundQueue::Inline);

        Self {
            conversations: ConversationRepo::new(pool.clone()),
            pool,
            model,
            tts,
            agent,
        }
    }

    /// Enable recall and inline curation backed by `embedder`
    pub fn with_memory(mut self, embedder: TableEmbedder) -> Self {
        let index = Arc::new(EmbeddingIndex::new(
            Arc::new(embedder),
            Arc::new(MemoryRepo::new(self.pool.clone())),
        ));
        let curator = Arc::new(MemoryCurator::new(
            self.model.clone(),
            index.clone(),
            Arc::new(self.conversations.clone()),
            Arc::new(FactRepo::new(self.pool.clone())),
            ProfileRepo::new(self.pool.clone()),
        ));
        self.agent = self.agent.with_memory(index, curator);
        self
    }
}
