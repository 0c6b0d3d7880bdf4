//! Continuous speech recognition
//!
//! Engines stream [`RecognitionEvent`]s; [`Transcript`] folds them into the
//! accumulated final text and the current interim guess.

mod line;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use line::LineRecognizer;

use crate::Result;
use crate::config::RecognitionConfig;

/// One recognized segment within a result event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub is_final: bool,
}

impl Segment {
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    #[must_use]
    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Events from a recognition stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// New results, finalized and interim
    Results(Vec<Segment>),
    /// Stream-level failure; the stream is over
    Error { code: String, message: String },
    /// Stream ended
    Ended,
}

/// A continuous streaming recognition engine
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Start a stream; language and interim settings are fixed for its lifetime
    async fn start(&self, config: &RecognitionConfig) -> Result<mpsc::Receiver<RecognitionEvent>>;

    /// Stop the current stream; safe to call when not running
    async fn stop(&self);
}

/// Accumulated recognition output for a turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    interim: String,
}

impl Transcript {
    /// Finalized text, each segment followed by a space
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current unfinalized guess
    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Whether any finalized text has arrived
    #[must_use]
    pub fn has_final(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Fold one result event in, returning whether finalized text grew
    ///
    /// Finals append in order; the interim is replaced by the concatenation
    /// of this event's non-final segments.
    pub fn apply(&mut self, segments: &[Segment]) -> bool {
        let mut grew = false;
        let mut interim = String::new();
        for segment in segments {
            if segment.is_final {
                self.text.push_str(&segment.text);
                self.text.push(' ');
                grew = true;
            } else {
                interim.push_str(&segment.text);
            }
        }
        self.interim = interim;
        grew
    }

    /// Stream ended; drop the interim guess
    pub fn end_stream(&mut self) {
        self.interim.clear();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.interim.clear();
    }

    /// Split off finalized text past byte offset `at`, interim included
    ///
    /// `at` past the end yields a transcript holding only the interim.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> Self {
        let text = if at < self.text.len() && self.text.is_char_boundary(at) {
            self.text.split_off(at)
        } else {
            String::new()
        };
        Self {
            text,
            interim: std::mem::take(&mut self.interim),
        }
    }
}
