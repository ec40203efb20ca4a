//! Language model interface
//!
//! The runtime only needs a token stream. Providers that cannot stream can
//! return a single-item stream.

mod ollama;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::Result;
use crate::message::{ChatMessage, ContentPart, Role};

pub use ollama::OllamaChatModel;

/// Boxed stream of text chunks; an `Err` item ends the stream
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Boxed stream of text chunks and tool calls; an `Err` item ends the stream
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ModelEvent>> + Send>>;

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Transcript part recording this request
    #[must_use]
    pub fn to_part(&self) -> ContentPart {
        ContentPart::ToolRequest {
            id: self.id.clone(),
            name: self.name.clone(),
            input: self.arguments.clone(),
        }
    }

    /// Tool message carrying `output` back to the model
    #[must_use]
    pub fn response(&self, output: serde_json::Value) -> ChatMessage {
        ChatMessage {
            role: Role::Tool,
            content: vec![ContentPart::ToolResponse {
                id: self.id.clone(),
                name: self.name.clone(),
                output,
            }],
        }
    }
}

/// One item of model output
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    ToolCall(ToolCall),
}

/// A chat completion request
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Rendered system prompt
    pub system: Option<String>,
    /// Conversation window, oldest first
    pub messages: Vec<ChatMessage>,
    /// Ask the provider to constrain output to JSON
    pub json_output: bool,
    /// Functions offered to the model; empty disables tool calling
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub const fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Streaming chat model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Open a token stream for the request
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelStream` if the stream cannot be opened
    async fn stream_generate(&self, request: &ChatRequest) -> Result<TokenStream>;

    /// Open a stream that may also carry tool calls
    ///
    /// Providers without tool support keep the default, which wraps
    /// [`stream_generate`](Self::stream_generate) and never yields a call.
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelStream` if the stream cannot be opened
    async fn stream_events(&self, request: &ChatRequest) -> Result<EventStream> {
        let stream = self.stream_generate(request).await?;
        Ok(Box::pin(stream.map(|item| item.map(ModelEvent::Text))))
    }

    /// Generate a complete response by draining the stream
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the stream
    async fn generate(&self, request: &ChatRequest) -> Result<String> {
        let mut stream = self.stream_generate(request).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&chunk?);
        }
        Ok(output)
    }

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::Error;

    struct Scripted(Vec<&'static str>, bool);

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn stream_generate(&self, _request: &ChatRequest) -> Result<TokenStream> {
            let mut items: Vec<Result<String>> =
                self.0.iter().map(|s| Ok((*s).to_string())).collect();
            if self.1 {
                items.push(Err(Error::ModelStream("connection reset".to_string())));
            }
            Ok(Box::pin(stream::iter(items)))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn generate_collects_chunks() {
        let model = Scripted(vec!["Hel", "lo", "!"], false);
        let text = model.generate(&ChatRequest::default()).await.unwrap();
        assert_eq!(text, "Hello!");
    }

    #[tokio::test]
    async fn generate_surfaces_stream_errors() {
        let model = Scripted(vec!["partial"], true);
        let err = model.generate(&ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::ModelStream(_)));
    }

    #[tokio::test]
    async fn default_events_are_text_only() {
        let model = Scripted(vec!["a", "b"], false);
        let events: Vec<ModelEvent> = model
            .stream_events(&ChatRequest::default())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![ModelEvent::Text("a".to_string()), ModelEvent::Text("b".to_string())]
        );
    }

    #[test]
    fn tool_call_transcript_parts() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "google_search".to_string(),
            arguments: serde_json::json!({"query": "weather hanoi"}),
        };
        assert!(matches!(call.to_part(), ContentPart::ToolRequest { ref name, .. } if name == "google_search"));

        let response = call.response(serde_json::json!(["sunny"]));
        assert_eq!(response.role, Role::Tool);
        assert!(matches!(
            &response.content[0],
            ContentPart::ToolResponse { id, .. } if id == "call_1"
        ));
    }

    #[test]
    fn request_builder() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")])
            .with_system("be nice")
            .json();
        assert_eq!(request.system.as_deref(), Some("be nice"));
        assert!(request.json_output);
        assert_eq!(request.messages.len(), 1);
    }
}
