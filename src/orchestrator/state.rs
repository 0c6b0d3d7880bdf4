//! Conversation state held by an orchestrator instance

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::lock::SpeakingLock;
use crate::recognition::Transcript;

/// Phase of the conversation, derived from the activity flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Recording,
    Generating,
    Speaking,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Generating => write!(f, "generating"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// One question and its answer
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: Uuid,
    pub transcript: Transcript,
    pub generated_response: Option<String>,
    /// Length of the transcript text sent for generation
    pub asked: usize,
    pub created_at: DateTime<Utc>,
    /// Set once the response has audibly started
    pub spoken: bool,
}

impl Turn {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            transcript: Transcript::default(),
            generated_response: None,
            asked: 0,
            created_at: Utc::now(),
            spoken: false,
        }
    }

    /// Response that still needs speaking, if any
    #[must_use]
    pub fn pending_response(&self) -> Option<&str> {
        self.generated_response
            .as_deref()
            .filter(|r| !r.trim().is_empty() && !self.spoken)
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an orchestrator owns about the conversation
#[derive(Debug, Default)]
pub struct ConversationContext {
    pub turn: Turn,
    pub is_recording: bool,
    pub is_generating: bool,
    pub is_speaking: bool,
    /// The single user-visible error slot
    pub error: Option<String>,
    pub lock: SpeakingLock,
}

impl ConversationContext {
    /// Speaking takes precedence, then generating, then recording
    #[must_use]
    pub const fn state(&self) -> ConversationState {
        if self.is_speaking {
            ConversationState::Speaking
        } else if self.is_generating {
            ConversationState::Generating
        } else if self.is_recording {
            ConversationState::Recording
        } else {
            ConversationState::Idle
        }
    }

    /// Start a fresh turn once a response has been dealt with
    ///
    /// Speech captured after the question was sent carries over.
    pub fn finish_turn(&mut self) {
        let carried = if self.is_recording {
            let asked = self.turn.asked;
            self.turn.transcript.split_off(asked)
        } else {
            Transcript::default()
        };
        self.turn = Turn {
            transcript: carried,
            ..Turn::new()
        };
        self.lock.reset_attempts();
    }

    /// Discard the turn entirely
    pub fn reset_turn(&mut self) {
        self.turn = Turn::new();
        self.lock.reset_attempts();
    }

    pub fn snapshot(&self, synthesis_ready: bool, uses_fallback: bool) -> OrchestratorStatus {
        OrchestratorStatus {
            state: self.state(),
            turn_id: self.turn.id,
            transcript: self.turn.transcript.text().to_string(),
            interim: self.turn.transcript.interim().to_string(),
            response: self.turn.generated_response.clone(),
            spoken: self.turn.spoken,
            error: self.error.clone(),
            speaking_lock_held: self.lock.is_held(),
            auto_speak_attempts: self.lock.attempts(),
            synthesis_ready,
            uses_fallback,
        }
    }
}

/// Published view of an orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorStatus {
    pub state: ConversationState,
    pub turn_id: Uuid,
    pub transcript: String,
    pub interim: String,
    pub response: Option<String>,
    pub spoken: bool,
    pub error: Option<String>,
    pub speaking_lock_held: bool,
    pub auto_speak_attempts: u32,
    pub synthesis_ready: bool,
    pub uses_fallback: bool,
}
