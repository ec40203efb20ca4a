//! Token stream to ordered speech fragments
//!
//! ```text
//! Idle ─► Streaming ─┬─► Flushing ──┬─► Closed
//!                    └─► Cancelled ─┘
//! ```
//!
//! Sentences are synthesized one at a time in stream order. The fragment
//! sender is owned by [`ResponseStreamer::run`] and dropped when it returns,
//! which is the single point where the caller's channel closes.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::SpeakFragment;
use crate::Result;
use crate::speech::{SentenceBuffer, SpeechDispatcher};

/// Streamer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    /// Upstream finished or failed; emitting the remainder
    Flushing,
    /// Cancellation observed; remainder flushed best-effort
    Cancelled,
    Closed,
}

/// How a turn ended
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// State the streamer was in when it closed (`Flushing` or `Cancelled`)
    pub state: StreamState,
    /// Every chunk received from the model, concatenated
    pub full_response: String,
    /// Sentence texts that reached the caller, in order
    pub delivered: Vec<String>,
    /// Model stream failure, if any
    pub stream_error: Option<String>,
}

impl TurnOutcome {
    #[must_use]
    pub const fn was_cancelled(&self) -> bool {
        matches!(self.state, StreamState::Cancelled)
    }

    pub(crate) const fn aborted() -> Self {
        Self {
            state: StreamState::Cancelled,
            full_response: String::new(),
            delivered: Vec::new(),
            stream_error: None,
        }
    }
}

enum Delivery {
    Sent,
    Skipped,
    /// Token fired or the receiver went away
    Stopped,
}

/// Drives segmentation, synthesis and delivery for one turn
pub struct ResponseStreamer {
    dispatcher: SpeechDispatcher,
    cancel: CancellationToken,
    state: StreamState,
    delivered: Vec<String>,
}

impl ResponseStreamer {
    #[must_use]
    pub const fn new(dispatcher: SpeechDispatcher, cancel: CancellationToken) -> Self {
        Self {
            dispatcher,
            cancel,
            state: StreamState::Idle,
            delivered: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, next: StreamState) {
        tracing::trace!(from = ?self.state, to = ?next, "stream state");
        self.state = next;
    }

    /// Consume `chunks` until the stream ends, fails or is cancelled
    ///
    /// `output` is dropped on return, closing the caller's receiver.
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<Result<String>>,
        output: mpsc::Sender<SpeakFragment>,
    ) -> TurnOutcome {
        self.transition(StreamState::Streaming);

        let mut buffer = SentenceBuffer::new();
        let mut full_response = String::new();
        let mut stream_error = None;

        'stream: loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.transition(StreamState::Cancelled);
                    break 'stream;
                }
                () = output.closed() => {
                    tracing::debug!("fragment receiver dropped");
                    self.transition(StreamState::Cancelled);
                    break 'stream;
                }
                next = chunks.recv() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    full_response.push_str(&chunk);
                    for sentence in buffer.push(&chunk) {
                        if matches!(self.deliver(sentence, &output).await, Delivery::Stopped) {
                            // remaining sentences of this chunk are intentionally not spoken
                            self.transition(StreamState::Cancelled);
                            break 'stream;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "model stream failed, flushing partial reply");
                    stream_error = Some(e.to_string());
                    self.transition(StreamState::Flushing);
                    break;
                }
                None => {
                    self.transition(StreamState::Flushing);
                    break;
                }
            }
        }

        // Stop the forwarder from filling a channel nobody reads
        drop(chunks);

        if let Some(rest) = buffer.finish() {
            match self.state {
                StreamState::Flushing => {
                    self.deliver(rest, &output).await;
                }
                _ => self.deliver_best_effort(rest, &output).await,
            }
        }

        let exit_state = self.state;
        self.transition(StreamState::Closed);
        drop(output);

        tracing::debug!(
            state = ?exit_state,
            delivered = self.delivered.len(),
            chars = full_response.len(),
            "response stream closed"
        );

        TurnOutcome {
            state: exit_state,
            full_response,
            delivered: self.delivered,
            stream_error,
        }
    }

    async fn deliver(&mut self, sentence: String, output: &mpsc::Sender<SpeakFragment>) -> Delivery {
        if self.cancel.is_cancelled() {
            return Delivery::Stopped;
        }

        let audio = match self.dispatcher.synthesize(&sentence).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, sentence = %sentence, "synthesis failed, skipping sentence");
                return Delivery::Skipped;
            }
        };

        if self.cancel.is_cancelled() {
            return Delivery::Stopped;
        }

        let fragment = SpeakFragment {
            text: sentence.clone(),
            audio,
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Delivery::Stopped,
            sent = output.send(fragment) => match sent {
                Ok(()) => {
                    self.delivered.push(sentence);
                    Delivery::Sent
                }
                Err(_) => {
                    tracing::debug!("fragment receiver dropped");
                    Delivery::Stopped
                }
            },
        }
    }

    /// One synthesis attempt for the remainder after cancellation, never blocking on send
    async fn deliver_best_effort(&mut self, sentence: String, output: &mpsc::Sender<SpeakFragment>) {
        if output.is_closed() {
            return;
        }

        match self.dispatcher.synthesize(&sentence).await {
            Ok(audio) => {
                let fragment = SpeakFragment {
                    text: sentence.clone(),
                    audio,
                };
                if output.try_send(fragment).is_ok() {
                    self.delivered.push(sentence);
                }
            }
            Err(e) => tracing::debug!(error = %e, "remainder synthesis failed after cancel"),
        }
    }
}
