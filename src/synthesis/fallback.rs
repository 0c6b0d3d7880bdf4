//! Main-task speech fallback
//!
//! Used when the worker cannot host an engine. Platform speech gives no
//! reliable failure signal when it silently does nothing, so every utterance
//! is watched for onset and retried once behind a silent primer.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::protocol::VoiceInfo;
use crate::playback::{Playback, PlaybackEnd};
use crate::{Error, Result};

/// A single request to platform speech
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<String>,
    /// 0.0 (silent) to 1.0
    pub volume: f32,
}

impl Utterance {
    /// Full-volume utterance with the default voice
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            volume: 1.0,
        }
    }

    /// Silent utterance used to wake platform speech
    #[must_use]
    pub fn primer() -> Self {
        Self {
            text: " ".to_string(),
            voice: None,
            volume: 0.0,
        }
    }
}

/// Why an utterance ended with an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechErrorKind {
    Interrupted,
    Canceled,
    Other(String),
}

impl SpeechErrorKind {
    /// Whether this was an intentional stop
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Canceled)
    }
}

/// Lifecycle events for one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    Start,
    End,
    Error(SpeechErrorKind),
}

/// Event stream for a queued utterance
#[derive(Debug)]
pub struct UtteranceHandle {
    events: mpsc::UnboundedReceiver<UtteranceEvent>,
}

impl UtteranceHandle {
    /// Create a handle and the sender the platform reports through
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<UtteranceEvent>, Self) {
        let (tx, events) = mpsc::unbounded_channel();
        (tx, Self { events })
    }

    async fn next(&mut self) -> Option<UtteranceEvent> {
        self.events.recv().await
    }
}

/// Platform speech facility driven from the main task
#[async_trait]
pub trait PlatformSpeech: Send + Sync {
    /// Name for logging
    fn name(&self) -> &'static str;

    /// Queue an utterance
    async fn speak(&self, utterance: Utterance) -> Result<UtteranceHandle>;

    /// Cancel everything queued or speaking
    fn cancel(&self);

    /// Currently known voices; may be empty until the platform has loaded them
    async fn voices(&self) -> Vec<VoiceInfo>;

    /// Notification that the voice list changed, if the platform offers one
    fn voices_changed(&self) -> Option<watch::Receiver<()>> {
        None
    }
}

/// Speaks through [`PlatformSpeech`] with onset detection and one retry
pub struct FallbackSynthesizer {
    platform: std::sync::Arc<dyn PlatformSpeech>,
    onset_timeout: Duration,
    voices_wait: Duration,
    voice: Mutex<Option<String>>,
}

impl FallbackSynthesizer {
    #[must_use]
    pub fn new(
        platform: std::sync::Arc<dyn PlatformSpeech>,
        onset_timeout: Duration,
        voices_wait: Duration,
    ) -> Self {
        Self {
            platform,
            onset_timeout,
            voices_wait,
            voice: Mutex::new(None),
        }
    }

    /// Set the voice used for later utterances
    pub fn set_voice(&self, voice: Option<String>) {
        *self.voice.lock().unwrap_or_else(PoisonError::into_inner) = voice;
    }

    /// Send a silent primer without waiting for it
    ///
    /// # Errors
    ///
    /// Returns error if platform speech cannot accept utterances at all
    pub async fn prime(&self) -> Result<()> {
        let handle = self.platform.speak(Utterance::primer()).await?;
        drop(handle);
        tracing::debug!(platform = self.platform.name(), "platform speech primed");
        Ok(())
    }

    /// Speak `text`, resolving once speech has started
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if stopped before onset, or
    /// [`Error::Synthesis`] if no onset is seen after the retry
    pub async fn speak(&self, text: &str) -> Result<Playback> {
        match self.attempt(text).await {
            Err(Error::Timeout(_)) => {
                tracing::warn!(
                    platform = self.platform.name(),
                    timeout_ms = self.onset_timeout.as_millis(),
                    "no speech onset, priming and retrying"
                );
                self.platform.cancel();
                if let Err(e) = self.prime().await {
                    tracing::debug!(error = %e, "primer failed");
                }
                match self.attempt(text).await {
                    Err(Error::Timeout(_)) => {
                        self.platform.cancel();
                        Err(Error::Synthesis(
                            "platform speech did not start after retry".to_string(),
                        ))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Cancel platform speech; idempotent
    pub fn cancel(&self) {
        self.platform.cancel();
    }

    /// Platform voices, waiting once for a late-populating list
    pub async fn list_voices(&self) -> Vec<VoiceInfo> {
        let voices = self.platform.voices().await;
        if !voices.is_empty() {
            return voices;
        }

        match self.platform.voices_changed() {
            Some(mut changed) => {
                let _ = tokio::time::timeout(self.voices_wait, changed.changed()).await;
            }
            None => tokio::time::sleep(self.voices_wait).await,
        }
        self.platform.voices().await
    }

    async fn attempt(&self, text: &str) -> Result<Playback> {
        let utterance = Utterance {
            voice: self.voice.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            ..Utterance::new(text)
        };
        let mut handle = self.platform.speak(utterance).await?;

        let onset = tokio::time::timeout(self.onset_timeout, async {
            match handle.next().await {
                Some(UtteranceEvent::Start) => Ok(None),
                // Finished before a start was reported
                Some(UtteranceEvent::End) => Ok(Some(PlaybackEnd::Completed)),
                Some(UtteranceEvent::Error(kind)) if kind.is_interruption() => {
                    Err(Error::Interrupted)
                }
                Some(UtteranceEvent::Error(SpeechErrorKind::Other(message))) => {
                    Err(Error::Synthesis(message))
                }
                Some(UtteranceEvent::Error(_)) | None => Err(Error::Interrupted),
            }
        })
        .await
        .map_err(|_| Error::Timeout("speech onset".to_string()))??;

        if let Some(end) = onset {
            return Ok(Playback::ended(end));
        }

        let (notifier, playback) = Playback::channel();
        tokio::spawn(async move {
            let end = loop {
                match handle.next().await {
                    Some(UtteranceEvent::Start) => {}
                    Some(UtteranceEvent::End) => break PlaybackEnd::Completed,
                    Some(UtteranceEvent::Error(kind)) if kind.is_interruption() => {
                        break PlaybackEnd::Interrupted;
                    }
                    Some(UtteranceEvent::Error(SpeechErrorKind::Other(message))) => {
                        break PlaybackEnd::Failed(message);
                    }
                    Some(UtteranceEvent::Error(_)) | None => break PlaybackEnd::Interrupted,
                }
            };
            notifier.finish(end);
        });
        Ok(playback)
    }
}
