//! Request-scoped turn types

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Identifies the conversation and the pair it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnContext {
    pub conversation_id: String,
    pub character_id: String,
    pub user_id: String,
}

impl TurnContext {
    pub fn new(
        conversation_id: impl Into<String>,
        character_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            character_id: character_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// What the user said, as text or recorded audio, optionally with a picture
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub text: Option<String>,
    pub audio: Option<Vec<u8>>,
    /// PNG image shown to the model alongside this turn only
    pub image: Option<Vec<u8>>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            audio: None,
            image: None,
        }
    }

    #[must_use]
    pub const fn audio(audio: Vec<u8>) -> Self {
        Self {
            text: None,
            audio: Some(audio),
            image: None,
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    /// Non-blank text, if any
    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Non-empty audio, if any
    #[must_use]
    pub fn audio_content(&self) -> Option<&[u8]> {
        self.audio.as_deref().filter(|a| !a.is_empty())
    }

    /// Non-empty image, if any
    #[must_use]
    pub fn image_content(&self) -> Option<&[u8]> {
        self.image.as_deref().filter(|i| !i.is_empty())
    }

    /// An image alone is not a turn; text or audio is required
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text_content().is_none() && self.audio_content().is_none()
    }
}

/// One synthesized sentence, delivered in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakFragment {
    pub text: String,
    pub audio: Vec<u8>,
}

impl SpeakFragment {
    /// Audio encoded for JSON transports
    #[must_use]
    pub fn audio_base64(&self) -> String {
        STANDARD.encode(&self.audio)
    }
}
