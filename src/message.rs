//! Chat messages with tagged content parts
//!
//! Assistant output can interleave plain text with tool calls and tool
//! results. Each piece is a [`ContentPart`] variant so that normalization and
//! storage never need to sniff JSON shapes.

use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text { text: String },
    /// Model asked for a tool invocation
    ToolRequest {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Result of a tool invocation
    ToolResponse {
        id: String,
        name: String,
        #[serde(default)]
        output: serde_json::Value,
    },
    /// Inline image, base64 encoded
    Image { mime_type: String, data: String },
}

impl ContentPart {
    /// Text part shorthand
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image part from raw bytes
    pub fn image(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self::Image {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Borrow the text if this is a text part
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A chat message as exchanged with the model and stored in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    /// Create a message with a single text part
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Concatenated text of all text parts
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect()
    }

    /// Copy of this message with its content normalized
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            role: self.role,
            content: normalize(self.content.clone()),
        }
    }
}

/// Collapse runs of adjacent text parts into one text part
///
/// Empty text parts are dropped. Tool and image parts pass through
/// untouched and keep their position relative to the surrounding text.
#[must_use]
pub fn normalize(parts: Vec<ContentPart>) -> Vec<ContentPart> {
    let mut result = Vec::with_capacity(parts.len());
    let mut pending = String::new();

    for part in parts {
        match part {
            ContentPart::Text { text } => pending.push_str(&text),
            other => {
                if !pending.is_empty() {
                    result.push(ContentPart::text(std::mem::take(&mut pending)));
                }
                result.push(other);
            }
        }
    }

    if !pending.is_empty() {
        result.push(ContentPart::text(pending));
    }

    result
}

/// Render messages as `role: text` lines, skipping messages without text
#[must_use]
pub fn transcript_to_text(messages: &[ChatMessage]) -> String {
    let mut output = String::new();
    for message in messages {
        let text = message.text();
        if !text.is_empty() {
            let _ = writeln!(output, "{}: {text}", message.role);
        }
    }
    output
}
