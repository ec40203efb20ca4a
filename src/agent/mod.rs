//! Conversational agent runtime
//!
//! Turns one user utterance into ordered speech fragments while recording the
//! transcript and feeding long-term memory.

mod context;
mod persister;
mod prompt;
mod runtime;
mod streamer;

pub use context::{SpeakFragment, TurnContext, UserInput};
pub use persister::ConversationPersister;
pub use prompt::{DEFAULT_PROMPT_CACHE_CAPACITY, PromptCache, SystemPromptBuilder};
pub use runtime::{Agent, AgentSettings, TurnHandle};
pub use streamer::{ResponseStreamer, StreamState, TurnOutcome};
