//! Speech pipeline building blocks
//!
//! Sentence segmentation, cached synthesis dispatch, and the HTTP
//! text-to-speech / speech-to-text adapters.

mod cache;
mod dispatcher;
pub mod segmenter;
mod stt;
mod tts;

pub use cache::AudioCache;
pub use dispatcher::{SpeechDispatcher, SpeechSynthesisProvider};
pub use segmenter::{SentenceBuffer, segment};
pub use stt::{DeepgramStt, TranscriptionProvider, WhisperStt};
pub use tts::{ELEVENLABS_OUTPUT_FORMAT, ElevenLabsTts, OpenAiTts};
