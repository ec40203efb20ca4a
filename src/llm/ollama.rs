//! Ollama `/api/chat` streaming client

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{ChatRequest, EventStream, LanguageModel, ModelEvent, TokenStream, ToolCall, ToolSpec};
use crate::message::{ChatMessage, ContentPart, Role};
use crate::{Error, Result};

/// Chat model served by an Ollama instance
pub struct OllamaChatModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaChatModel {
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool<'a>>,
}

#[derive(Serialize)]
struct OllamaTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl OllamaMessage {
    const fn text(role: &'static str, content: String) -> Self {
        Self {
            role,
            content,
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// One NDJSON line of a streamed chat response
#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaStreamMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

fn tool_output_text(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn convert_message(message: &ChatMessage, out: &mut Vec<OllamaMessage>) {
    if message.role == Role::Tool {
        for part in &message.content {
            if let ContentPart::ToolResponse { name, output, .. } = part {
                let mut reply = OllamaMessage::text(Role::Tool.as_str(), tool_output_text(output));
                reply.tool_name = Some(name.clone());
                out.push(reply);
            }
        }
        return;
    }

    let mut converted = OllamaMessage::text(message.role.as_str(), message.text());
    for part in &message.content {
        match part {
            ContentPart::ToolRequest { id, name, input } => {
                converted.tool_calls.push(OllamaToolCall {
                    id: Some(id.clone()),
                    function: OllamaFunctionCall {
                        name: name.clone(),
                        arguments: input.clone(),
                    },
                });
            }
            ContentPart::Image { data, .. } => converted.images.push(data.clone()),
            ContentPart::Text { .. } | ContentPart::ToolResponse { .. } => {}
        }
    }

    if !converted.content.is_empty() || !converted.tool_calls.is_empty() || !converted.images.is_empty() {
        out.push(converted);
    }
}

fn build_messages(request: &ChatRequest) -> Vec<OllamaMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(OllamaMessage::text(Role::System.as_str(), system.clone()));
    }
    for message in &request.messages {
        convert_message(message, &mut messages);
    }
    messages
}

/// Parse one NDJSON line into zero or more events
fn parse_line(line: &str) -> Vec<Result<ModelEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    tracing::trace!(line = %line, "parsing stream chunk");

    let chunk: OllamaStreamChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => return vec![Err(Error::ModelStream(format!("invalid chunk: {e}")))],
    };

    if let Some(error) = chunk.error {
        return vec![Err(Error::ModelStream(error))];
    }

    let Some(message) = chunk.message else {
        return Vec::new();
    };

    let mut events = Vec::new();
    if !message.content.is_empty() {
        events.push(Ok(ModelEvent::Text(message.content)));
    }
    for call in message.tool_calls {
        events.push(Ok(ModelEvent::ToolCall(ToolCall {
            id: call
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
            name: call.function.name,
            arguments: call.function.arguments,
        })));
    }
    events
}

struct LineReader<S> {
    inner: S,
    buffer: Vec<u8>,
    ready: VecDeque<Result<ModelEvent>>,
    finished: bool,
}

impl<S> LineReader<S> {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        match std::str::from_utf8(line) {
            Ok(text) => self.ready.extend(parse_line(text)),
            Err(e) => self
                .ready
                .push_back(Err(Error::ModelStream(format!("invalid UTF-8: {e}")))),
        }
    }
}

/// Re-frame an arbitrary byte stream into NDJSON lines and parse each one
///
/// Network frames can split a line (or a multibyte character) anywhere, so
/// bytes are buffered until a newline arrives.
fn ndjson_events<S, B, E>(bytes: S) -> impl Stream<Item = Result<ModelEvent>>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let reader = LineReader {
        inner: bytes,
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(item) = reader.ready.pop_front() {
                if item.is_err() {
                    reader.ready.clear();
                    reader.finished = true;
                }
                return Some((item, reader));
            }
            if reader.finished {
                return None;
            }

            match reader.inner.next().await {
                Some(Ok(chunk)) => {
                    reader.buffer.extend_from_slice(chunk.as_ref());
                    reader.drain_lines();
                }
                Some(Err(e)) => {
                    reader
                        .ready
                        .push_back(Err(Error::ModelStream(e.to_string())));
                    reader.finished = true;
                }
                None => {
                    let rest = std::mem::take(&mut reader.buffer);
                    reader.push_line(&rest);
                    reader.finished = true;
                }
            }
        }
    })
}

#[async_trait]
impl LanguageModel for OllamaChatModel {
    async fn stream_generate(&self, request: &ChatRequest) -> Result<TokenStream> {
        let events = self.stream_events(request).await?;
        Ok(Box::pin(events.filter_map(|event| async move {
            match event {
                Ok(ModelEvent::Text(text)) => Some(Ok(text)),
                Ok(ModelEvent::ToolCall(call)) => {
                    tracing::warn!(tool = %call.name, "ignoring tool call on a text-only stream");
                    None
                }
                Err(e) => Some(Err(e)),
            }
        })))
    }

    async fn stream_events(&self, request: &ChatRequest) -> Result<EventStream> {
        let body = OllamaRequest {
            model: &self.model,
            messages: build_messages(request),
            stream: true,
            format: request.json_output.then_some("json"),
            tools: request
                .tools
                .iter()
                .map(|function| OllamaTool {
                    kind: "function",
                    function,
                })
                .collect(),
        };

        tracing::debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "opening chat stream"
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ModelStream(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ModelStream(format!("Ollama error {status}: {body}")));
        }

        Ok(Box::pin(ndjson_events(Box::pin(response.bytes_stream()))))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(p.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(parts: &[&str]) -> Vec<Result<ModelEvent>> {
        ndjson_events(frames(parts)).collect().await
    }

    fn texts(events: Vec<Result<ModelEvent>>) -> Vec<String> {
        events
            .into_iter()
            .map(|e| match e.unwrap() {
                ModelEvent::Text(text) => text,
                ModelEvent::ToolCall(call) => panic!("unexpected tool call {call:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn parses_multiple_chunks() {
        let events = collect(&[
            "{\"model\":\"qwen\",\"message\":{\"content\":\"Hello\"},\"done\":false}\n\
             {\"model\":\"qwen\",\"message\":{\"content\":\" world\"},\"done\":false}\n\
             {\"model\":\"qwen\",\"message\":{\"content\":\"\"},\"done\":true}\n",
        ])
        .await;

        assert_eq!(texts(events), vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_frames() {
        let events = collect(&[
            "{\"message\":{\"content\":\"Xin ch",
            "ào\"},\"done\":false}\n{\"message\":{\"con",
            "tent\":\"!\"},\"done\":true}",
        ])
        .await;

        assert_eq!(texts(events), vec!["Xin chào", "!"]);
    }

    #[tokio::test]
    async fn error_line_ends_stream() {
        let events = collect(&[
            "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n{\"error\":\"model not found\"}\n{\"message\":{\"content\":\"late\"}}\n",
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &ModelEvent::Text("Hi".to_string()));
        assert!(matches!(&events[1], Err(Error::ModelStream(msg)) if msg == "model not found"));
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let frames = stream::iter(vec![
            Ok(b"{\"message\":{\"content\":\"A\"}}\n".to_vec()),
            Err("reset by peer".to_string()),
        ]);
        let events: Vec<Result<ModelEvent>> = ndjson_events(frames).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn tool_calls_become_events() {
        let events = collect(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"google_search\",\"arguments\":{\"query\":\"hanoi weather\"}}}]},\"done\":false}\n",
        ])
        .await;

        assert_eq!(events.len(), 1);
        let Ok(ModelEvent::ToolCall(call)) = &events[0] else {
            panic!("expected a tool call, got {:?}", events[0]);
        };
        assert_eq!(call.name, "google_search");
        assert_eq!(call.arguments["query"], "hanoi weather");
        assert!(call.id.starts_with("call_"));
    }

    #[test]
    fn system_prompt_leads_messages() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi"), ChatMessage::assistant("")])
            .with_system("You are Ene.");
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "hi");
    }

    #[test]
    fn tool_exchange_and_images_are_encoded() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "google_search".to_string(),
            arguments: serde_json::json!({"query": "cats"}),
        };
        let request = ChatRequest::new(vec![
            ChatMessage {
                role: Role::User,
                content: vec![ContentPart::text("Look"), ContentPart::image(b"png", "image/png")],
            },
            ChatMessage {
                role: Role::Assistant,
                content: vec![call.to_part()],
            },
            call.response(serde_json::json!("Cats are great")),
        ]);

        let messages = build_messages(&request);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].images, vec!["cG5n"]);
        assert_eq!(messages[1].tool_calls[0].function.name, "google_search");
        assert_eq!(messages[2].role, "tool");
        assert_eq!(messages[2].content, "Cats are great");
        assert_eq!(messages[2].tool_name.as_deref(), Some("google_search"));
    }
}
