//! Beacon Voice - Conversation core for voice assistants
//!
//! This library chains speech recognition, a remote LLM and speech synthesis
//! into a single conversational loop:
//! - Streaming recognition with interim and final transcripts
//! - Debounced response generation via Gemini
//! - Background synthesis worker with a main-task platform speech fallback
//! - A speaking lock and circuit breaker that prevent duplicate speech
//! - Model asset precaching
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Orchestrator                       │
//! │  Idle → Recording → Generating → Speaking → Idle     │
//! │  SpeakingLock  │  breaker  │  debounce/grace timers  │
//! └──────┬──────────────────┬───────────────────┬────────┘
//!        │                  │                   │
//! ┌──────▼──────┐   ┌───────▼──────┐   ┌────────▼────────┐
//! │ Recognition │   │  Reasoning   │   │    Synthesis    │
//! │  (stream)   │   │  (Gemini)    │   │ adapter ↔ worker│
//! └─────────────┘   └──────────────┘   │ fallback, sinks │
//!                                      └─────────────────┘
//! ```

pub mod assets;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod playback;
pub mod reasoning;
pub mod recognition;
pub mod synthesis;

pub use assets::AssetPrecache;
pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{
    Collaborators, ConversationState, Orchestrator, OrchestratorHandle, OrchestratorStatus,
};
pub use playback::{AudioSink, Playback, PlaybackEnd, WavFileSink};
pub use reasoning::{GeminiClient, ReasoningClient, ReasoningRequest, ReasoningResponse};
pub use recognition::{LineRecognizer, RecognitionEngine, RecognitionEvent, Segment};
pub use synthesis::{
    AudioBuffer, CommandSpeech, FallbackSynthesizer, HttpSynthesisEngine, SpeechSynthesizer,
    SynthesisAdapter, SynthesisEvent,
};
