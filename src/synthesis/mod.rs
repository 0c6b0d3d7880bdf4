//! Text-to-speech with a background worker and platform fallback

mod adapter;
pub mod engine;
pub mod fallback;
pub mod platform;
pub mod protocol;
mod session;
pub mod worker;

pub use adapter::{ReadyInfo, SpeechSynthesizer, SynthesisAdapter, SynthesisEvent, SynthesisOutput};
pub use engine::HttpSynthesisEngine;
pub use fallback::{FallbackSynthesizer, PlatformSpeech, Utterance, UtteranceEvent, UtteranceHandle};
pub use platform::CommandSpeech;
pub use protocol::{AudioBuffer, ProgressInfo, VoiceInfo, WorkerCommand, WorkerEvent};
pub use session::{MAX_INIT_ATTEMPTS, SessionState, SynthesisSession};
pub use worker::{SynthesisEngine, WorkerHandle, spawn_worker};
