//! Companion Runtime - voice agent turns with long-term memory
//!
//! This library provides the core of a conversational voice companion:
//! - Streaming chat replies cut into sentences and synthesized in order
//! - Content-addressed audio cache in front of the TTS provider
//! - Transcript persistence around every model call
//! - Embedding-based memory recall, deduplication and background curation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Agent::stream                    │
//! │   STT  │  history + persona prompt  │  memory recall  │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ model chunks
//! ┌───────────────────────▼──────────────────────────────┐
//! │                   ResponseStreamer                    │
//! │   SentenceBuffer  │  SpeechDispatcher  │  AudioCache  │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ SpeakFragment (text + audio)
//! ┌───────────────────────▼──────────────────────────────┐
//! │          Persist reply  →  MemoryCurator (queued)     │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod memory;
pub mod message;
pub mod speech;
pub mod tools;

pub use agent::{Agent, SpeakFragment, TurnContext, TurnHandle, TurnOutcome, UserInput};
pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
