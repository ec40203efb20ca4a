//! Long-term semantic memory
//!
//! ```text
//! turn finished ─► BackgroundQueue ─► MemoryCurator ─► LanguageModel (JSON)
//!                                          │
//!                                          ▼
//!                                   EmbeddingIndex ─► MemoryStore
//!                                   (dedupe search)
//! ```

mod curator;
mod embedder;
pub mod extraction;
mod index;
mod queue;

pub use curator::{CurationReport, CuratorSettings, MemoryCurator};
pub use embedder::{Embedder, OPENAI_EMBEDDING_DIM, OpenAiEmbedder};
pub use index::{DEFAULT_DEDUPE_LIMIT, DEFAULT_DEDUPE_THRESHOLD, EmbeddingIndex, l2_distance};
pub use queue::BackgroundQueue;
