//! Message protocol between the synthesis adapter and its worker
//!
//! Commands flow adapter → worker, events flow worker → adapter. Both are
//! tagged with a `type` field so they can cross a process boundary as JSON.

use serde::{Deserialize, Serialize};

/// Mono PCM audio produced by a synthesis engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBuffer {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a new buffer
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback duration
    #[must_use]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = self.samples.len() as f64 / f64::from(self.sample_rate);
        std::time::Duration::from_secs_f64(secs)
    }

    /// Whether the buffer holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Download progress for model assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Bytes received so far
    pub loaded: u64,

    /// Total bytes, when known
    pub total: Option<u64>,
}

impl ProgressInfo {
    /// Create progress info, clamping `loaded` so it never exceeds `total`
    #[must_use]
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        let loaded = total.map_or(loaded, |t| loaded.min(t));
        Self { loaded, total }
    }

    /// Completed fraction in `[0.0, 1.0]`, when the total is known
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        self.total
            .filter(|t| *t > 0)
            .map(|t| self.loaded as f64 / t as f64)
    }
}

/// A voice offered by an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Engine-specific identifier passed back in `INIT`
    pub id: String,

    /// Display name
    pub name: String,

    /// BCP-47 language tag, when known
    pub language: Option<String>,
}

impl VoiceInfo {
    /// Create a voice entry
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, language: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language,
        }
    }
}

/// Commands sent to the synthesis worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    /// Load the engine, optionally selecting a voice
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_id: Option<String>,
    },

    /// Synthesize text
    Speak { text: String },

    /// Enumerate voices
    GetVoices,

    /// Abort any in-flight synthesis
    Stop,
}

/// Audio reply to a `SPEAK` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioPayload {
    /// Audio synthesized by the worker
    Buffer(AudioBuffer),

    /// The worker cannot synthesize; speak this on the main task instead
    Request { text: String },
}

/// Events emitted by the synthesis worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    /// Engine loaded (or the worker asks for main-task synthesis)
    Ready {
        voice_id: Option<String>,
        uses_fallback: bool,
    },

    /// Asset download progress during `INIT`
    DownloadProgress {
        loaded: u64,
        total: Option<u64>,
    },

    /// Reply to `SPEAK`
    Audio { payload: AudioPayload },

    /// Reply to `GET_VOICES`
    Voices {
        voices: Vec<VoiceInfo>,
        uses_fallback: bool,
    },

    /// Voice switched on an already loaded engine
    VoiceChanged { voice_id: String },

    /// A command failed
    Error { message: String },

    /// Reply to `STOP`
    Stopped,
}
