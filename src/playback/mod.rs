//! Audio output for synthesized speech
//!
//! Sinks accept worker-produced [`AudioBuffer`]s and hand back a [`Playback`]
//! that resolves when the audio has finished or was stopped.

#[cfg(feature = "device-audio")]
mod device;
mod wav;

use async_trait::async_trait;
use tokio::sync::oneshot;

#[cfg(feature = "device-audio")]
pub use device::DevicePlayback;
pub use wav::{WavFileSink, samples_to_wav};

use crate::Result;
use crate::synthesis::AudioBuffer;

/// How a playback ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Audio played to the end
    Completed,
    /// Stopped or canceled on purpose
    Interrupted,
    /// Output failed after starting
    Failed(String),
}

/// Completion handle for audio that has started playing
#[derive(Debug)]
pub struct Playback {
    done: oneshot::Receiver<PlaybackEnd>,
}

/// Sender half of a [`Playback`]
#[derive(Debug)]
pub struct PlaybackNotifier {
    tx: oneshot::Sender<PlaybackEnd>,
}

impl PlaybackNotifier {
    /// Report how playback ended
    pub fn finish(self, end: PlaybackEnd) {
        let _ = self.tx.send(end);
    }

    /// Whether the [`Playback`] side is still waiting
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl Playback {
    /// Create a playback handle and its notifier
    #[must_use]
    pub fn channel() -> (PlaybackNotifier, Self) {
        let (tx, done) = oneshot::channel();
        (PlaybackNotifier { tx }, Self { done })
    }

    /// A playback that has already ended
    #[must_use]
    pub fn ended(end: PlaybackEnd) -> Self {
        let (notifier, playback) = Self::channel();
        notifier.finish(end);
        playback
    }

    /// Wait for playback to end
    ///
    /// A notifier dropped without reporting counts as an interruption.
    pub async fn finished(self) -> PlaybackEnd {
        self.done.await.unwrap_or(PlaybackEnd::Interrupted)
    }
}

/// Destination for synthesized audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start playing `buffer`, returning once audio has begun
    async fn play(&self, buffer: AudioBuffer) -> Result<Playback>;

    /// Stop whatever is playing; safe to call when idle
    fn stop(&self);
}

/// Sink that discards audio and completes immediately
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _buffer: AudioBuffer) -> Result<Playback> {
        Ok(Playback::ended(PlaybackEnd::Completed))
    }

    fn stop(&self) {}
}
