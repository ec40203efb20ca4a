//! Transcript recording around a model invocation

use std::sync::Arc;

use crate::db::{ConversationStore, TurnRecord};
use crate::message::ChatMessage;
use crate::{Error, Result};

/// Writes the user message before generation and the reply after it
#[derive(Clone)]
pub struct ConversationPersister {
    store: Arc<dyn ConversationStore>,
}

impl ConversationPersister {
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Record the outbound user or tool message
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if the write fails; the turn must not
    /// reach the model in that case
    pub fn before(&self, conversation_id: &str, message: &ChatMessage) -> Result<TurnRecord> {
        self.store
            .append(conversation_id, message)
            .map_err(|e| {
                tracing::error!(conversation_id, error = %e, "failed to record message");
                Error::Persistence(e.to_string())
            })
    }

    /// Record the assistant reply after normalizing its content
    ///
    /// Empty replies are stored too, so every user message is followed by an
    /// assistant message. Returns `None` when the write failed; failures are
    /// logged only.
    pub fn after(&self, conversation_id: &str, message: &ChatMessage) -> Option<TurnRecord> {
        let message = message.normalized();
        if message.content.is_empty() {
            tracing::debug!(conversation_id, "recording empty reply");
        }

        match self.store.append(conversation_id, &message) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(conversation_id, error = %e, "failed to record assistant reply");
                None
            }
        }
    }
}
