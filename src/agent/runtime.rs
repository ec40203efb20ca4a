//! Turn orchestration
//!
//! One call to [`Agent::stream`] spawns three tasks:
//!
//! - a model driver copying model chunks into a bounded channel and running
//!   any tools the model calls between invocations
//! - the [`ResponseStreamer`] turning chunks into fragments
//! - a supervisor that joins both, records the reply and queues curation

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    ConversationPersister, ResponseStreamer, SpeakFragment, SystemPromptBuilder, TurnContext,
    TurnOutcome, UserInput,
};
use crate::db::{ConversationStore, Memory};
use crate::llm::{ChatRequest, LanguageModel, ModelEvent, ToolCall};
use crate::memory::{BackgroundQueue, EmbeddingIndex, MemoryCurator};
use crate::message::{ChatMessage, ContentPart, Role};
use crate::speech::{SpeechDispatcher, TranscriptionProvider};
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Images attached to a turn are sent as PNG
const IMAGE_MIME_TYPE: &str = "image/png";

/// Per-turn tuning
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// History window for newly created conversations
    pub history_window: usize,
    /// Capacity of the model chunk channel
    pub chunk_buffer: usize,
    /// Capacity of the caller's fragment channel
    pub fragment_buffer: usize,
    /// Memories recalled into the system prompt; 0 disables recall
    pub recall_limit: usize,
    /// Maximum L2 distance for a recalled memory
    pub recall_threshold: f64,
    /// Model invocations allowed per turn when tools are called
    pub max_tool_steps: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            history_window: 10,
            chunk_buffer: 100,
            fragment_buffer: 16,
            recall_limit: 5,
            recall_threshold: 1.0,
            max_tool_steps: 20,
        }
    }
}

/// A running turn
pub struct TurnHandle {
    /// What the user said (transcribed when the input was audio)
    pub user_text: String,
    /// Fragments in sentence order; closes when the turn is fully delivered
    pub fragments: mpsc::Receiver<SpeakFragment>,
    cancel: CancellationToken,
    outcome: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    /// Stop synthesizing; already delivered fragments stay delivered
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared by every task of this turn
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receive every fragment, then wait for the turn to finish
    pub async fn collect(mut self) -> (Vec<SpeakFragment>, TurnOutcome) {
        let mut fragments = Vec::new();
        while let Some(fragment) = self.fragments.recv().await {
            fragments.push(fragment);
        }
        let outcome = Self::join(self.outcome).await;
        (fragments, outcome)
    }

    /// Wait for the turn to finish without reading further fragments
    ///
    /// Dropping the receiver stops synthesis at the next sentence.
    pub async fn finish(self) -> TurnOutcome {
        drop(self.fragments);
        Self::join(self.outcome).await
    }

    async fn join(handle: JoinHandle<TurnOutcome>) -> TurnOutcome {
        handle.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "turn supervisor failed");
            TurnOutcome::aborted()
        })
    }
}

/// Conversational agent runtime
pub struct Agent {
    model: Arc<dyn LanguageModel>,
    dispatcher: SpeechDispatcher,
    conversations: Arc<dyn ConversationStore>,
    persister: ConversationPersister,
    prompts: Arc<SystemPromptBuilder>,
    transcriber: Option<Arc<dyn TranscriptionProvider>>,
    tools: ToolRegistry,
    index: Option<Arc<EmbeddingIndex>>,
    curator: Option<Arc<MemoryCurator>>,
    queue: BackgroundQueue,
    settings: AgentSettings,
    shutdown: CancellationToken,
}

impl Agent {
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        dispatcher: SpeechDispatcher,
        conversations: Arc<dyn ConversationStore>,
        prompts: SystemPromptBuilder,
    ) -> Self {
        Self {
            model,
            dispatcher,
            persister: ConversationPersister::new(Arc::clone(&conversations)),
            conversations,
            prompts: Arc::new(prompts),
            transcriber: None,
            tools: ToolRegistry::default(),
            index: None,
            curator: None,
            queue: BackgroundQueue::default(),
            settings: AgentSettings::default(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn TranscriptionProvider>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Offer these tools to the model on every turn
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Enable memory recall and post-turn curation
    #[must_use]
    pub fn with_memory(mut self, index: Arc<EmbeddingIndex>, curator: Arc<MemoryCurator>) -> Self {
        self.index = Some(index);
        self.curator = Some(curator);
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: BackgroundQueue) -> Self {
        self.queue = queue;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start a turn
    ///
    /// Returns once the user message is recorded; the reply arrives on
    /// [`TurnHandle::fragments`].
    ///
    /// # Errors
    ///
    /// - `Error::NoInputData` if the input has neither text nor audio, or the
    ///   audio contains no speech
    /// - `Error::Transcription` if the audio cannot be transcribed
    /// - `Error::Persistence` if the user message cannot be recorded
    pub async fn stream(&self, ctx: TurnContext, input: UserInput) -> Result<TurnHandle> {
        let user_text = self.resolve_input(&input).await?;

        let conversation = self
            .conversations
            .create_if_absent(
                &ctx.conversation_id,
                self.settings.history_window,
                &ctx.character_id,
                &ctx.user_id,
            )
            .map_err(|e| Error::Persistence(e.to_string()))?;

        let mut messages: Vec<ChatMessage> = self
            .conversations
            .list_recent(&conversation.id, conversation.max_window_size)
            .map_err(|e| Error::Persistence(e.to_string()))?
            .into_iter()
            .map(|record| record.message)
            .collect();

        let mut user_message = ChatMessage::user(user_text.clone());
        self.persister.before(&conversation.id, &user_message)?;
        // the image goes to the model but never into the transcript
        if let Some(image) = input.image_content() {
            user_message
                .content
                .push(ContentPart::image(image, IMAGE_MIME_TYPE));
        }
        messages.push(user_message);

        let memories = self.recall(&ctx, &user_text).await;
        let system = match self
            .prompts
            .render(&ctx, conversation.current_summary.as_deref(), &memories)
        {
            Ok(system) => Some(system).filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "system prompt unavailable, continuing without it");
                None
            }
        };

        let mut request = ChatRequest::new(messages).with_tools(self.tools.specs());
        request.system = system;

        tracing::info!(
            conversation_id = %ctx.conversation_id,
            history = request.messages.len(),
            memories = memories.len(),
            tools = request.tools.len(),
            "starting turn"
        );

        let cancel = self.shutdown.child_token();
        let (chunk_tx, chunk_rx) = mpsc::channel(self.settings.chunk_buffer.max(1));
        let (fragment_tx, fragment_rx) = mpsc::channel(self.settings.fragment_buffer.max(1));

        let driver = ModelDriver {
            model: Arc::clone(&self.model),
            tools: self.tools.clone(),
            persister: self.persister.clone(),
            conversation_id: conversation.id.clone(),
            max_steps: self.settings.max_tool_steps,
            cancel: cancel.clone(),
        };
        let forwarder = tokio::spawn(driver.run(request, chunk_tx));
        let streamer = tokio::spawn(
            ResponseStreamer::new(self.dispatcher.clone(), cancel.clone()).run(chunk_rx, fragment_tx),
        );

        let outcome = tokio::spawn(supervise(
            Supervision {
                ctx,
                persister: self.persister.clone(),
                prompts: Arc::clone(&self.prompts),
                curator: self.curator.clone(),
                queue: self.queue.clone(),
            },
            forwarder,
            streamer,
        ));

        Ok(TurnHandle {
            user_text,
            fragments: fragment_rx,
            cancel,
            outcome,
        })
    }

    /// Cancel every running turn and wait for queued background work
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.queue.drain().await;
    }

    async fn resolve_input(&self, input: &UserInput) -> Result<String> {
        if let Some(text) = input.text_content() {
            return Ok(text.to_string());
        }

        let Some(audio) = input.audio_content() else {
            return Err(Error::NoInputData);
        };

        let Some(transcriber) = &self.transcriber else {
            return Err(Error::Transcription(
                "no transcription provider configured".to_string(),
            ));
        };

        tracing::debug!(provider = transcriber.name(), bytes = audio.len(), "transcribing input");
        match transcriber.transcribe(audio).await {
            Ok(text) if text.trim().is_empty() => Err(Error::NoInputData),
            Ok(text) => Ok(text),
            Err(Error::NoInputData) => Err(Error::NoInputData),
            Err(Error::Transcription(msg)) => Err(Error::Transcription(msg)),
            Err(e) => Err(Error::Transcription(e.to_string())),
        }
    }

    /// Memories of this user and character closest to `query`
    async fn recall(&self, ctx: &TurnContext, query: &str) -> Vec<Memory> {
        let Some(index) = &self.index else {
            return Vec::new();
        };
        if self.settings.recall_limit == 0 {
            return Vec::new();
        }

        match index
            .recall(
                &ctx.user_id,
                &ctx.character_id,
                query,
                self.settings.recall_limit,
                self.settings.recall_threshold,
            )
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(error = %e, "memory recall failed");
                Vec::new()
            }
        }
    }
}

/// Model side of a turn
///
/// Text is forwarded into the chunk channel as it arrives. When an invocation
/// ends with tool calls, the tools run, the exchange is recorded and the model
/// is invoked again, up to `max_steps` invocations.
struct ModelDriver {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    persister: ConversationPersister,
    conversation_id: String,
    max_steps: usize,
    cancel: CancellationToken,
}

impl ModelDriver {
    async fn run(self, mut request: ChatRequest, tx: mpsc::Sender<Result<String>>) {
        let max_steps = self.max_steps.max(1);

        for step in 1..=max_steps {
            let Some((text, calls)) = self.step(&request, &tx).await else {
                return;
            };
            if calls.is_empty() {
                return;
            }

            tracing::debug!(step, calls = calls.len(), "model requested tools");
            if !self.run_tools(&mut request, text, &calls).await {
                return;
            }
        }

        tracing::warn!(model = self.model.name(), max_steps, "tool loop hit its step limit");
        let _ = tx
            .send(Err(Error::ModelStream(format!(
                "no final answer after {max_steps} model steps"
            ))))
            .await;
    }

    /// Stream one invocation; `None` ends the turn
    async fn step(
        &self,
        request: &ChatRequest,
        tx: &mpsc::Sender<Result<String>>,
    ) -> Option<(String, Vec<ToolCall>)> {
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            opened = self.model.stream_events(request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(model = self.model.name(), error = %e, "failed to open model stream");
                let _ = tx.send(Err(e)).await;
                return None;
            }
        };

        let mut text = String::new();
        let mut calls = Vec::new();
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tx.closed() => return None,
                item = stream.next() => item,
            };

            match item {
                None => return Some((text, calls)),
                Some(Ok(ModelEvent::ToolCall(call))) => calls.push(call),
                Some(Ok(ModelEvent::Text(chunk))) => {
                    text.push_str(&chunk);
                    if tx.send(Ok(chunk)).await.is_err() {
                        return None;
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    return None;
                }
            }
        }
    }

    /// Run the requested tools and append the exchange to the request
    ///
    /// Returns `false` if the turn was cancelled while a tool was running.
    async fn run_tools(&self, request: &mut ChatRequest, text: String, calls: &[ToolCall]) -> bool {
        let mut requested = ChatMessage {
            role: Role::Assistant,
            content: calls.iter().map(ToolCall::to_part).collect(),
        };
        self.record(&requested);

        // the spoken part of this step is recorded with the final reply
        if !text.is_empty() {
            requested.content.insert(0, ContentPart::text(text));
        }
        request.messages.push(requested);

        for call in calls {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                result = self.tools.invoke(call) => result,
            };

            let output = result.unwrap_or_else(|e| {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                serde_json::Value::String(format!("Error: {e}"))
            });

            let response = call.response(output);
            self.record(&response);
            request.messages.push(response);
        }

        true
    }

    fn record(&self, message: &ChatMessage) {
        if let Err(e) = self.persister.before(&self.conversation_id, message) {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                error = %e,
                "tool exchange not recorded"
            );
        }
    }
}

/// State the supervisor needs after the streamer finishes
struct Supervision {
    ctx: TurnContext,
    persister: ConversationPersister,
    prompts: Arc<SystemPromptBuilder>,
    curator: Option<Arc<MemoryCurator>>,
    queue: BackgroundQueue,
}

async fn supervise(
    job: Supervision,
    forwarder: JoinHandle<()>,
    streamer: JoinHandle<TurnOutcome>,
) -> TurnOutcome {
    let (forwarded, streamed) = tokio::join!(forwarder, streamer);
    if let Err(e) = forwarded {
        tracing::error!(error = %e, "token forwarder failed");
    }
    let outcome = streamed.unwrap_or_else(|e| {
        tracing::error!(error = %e, "response streamer failed");
        TurnOutcome::aborted()
    });

    let Supervision {
        ctx,
        persister,
        prompts,
        curator,
        queue,
    } = job;

    persister.after(
        &ctx.conversation_id,
        &ChatMessage::assistant(outcome.full_response.clone()),
    );

    tracing::info!(
        conversation_id = %ctx.conversation_id,
        state = ?outcome.state,
        delivered = outcome.delivered.len(),
        "turn finished"
    );

    if let Some(curator) = curator {
        queue
            .submit("memory_curation", async move {
                let report = curator.curate(&ctx).await;
                if report.facts > 0 {
                    prompts.invalidate(&ctx);
                }
            })
            .await;
    }

    outcome
}
