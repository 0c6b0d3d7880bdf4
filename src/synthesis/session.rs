//! Synthesis session readiness tracking

/// Maximum worker initialization attempts per session
pub const MAX_INIT_ATTEMPTS: u32 = 3;

/// Readiness of the synthesis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `initialize` has not been called
    Uninitialized,
    /// Bringing up the worker or fallback
    Initializing,
    /// Synthesis requests are accepted
    Ready,
    /// Neither worker nor fallback could be brought up
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Readiness of the synthesis backend for the current session
///
/// `attempt_count` only grows until [`SynthesisSession::restart`], and once
/// `uses_fallback` is set it stays set for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisSession {
    state: SessionState,
    attempt_count: u32,
    uses_fallback: bool,
    voice_id: Option<String>,
}

impl Default for SynthesisSession {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            attempt_count: 0,
            uses_fallback: false,
            voice_id: None,
        }
    }
}

impl SynthesisSession {
    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Worker initialization attempts made this session
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether main-task fallback synthesis is in effect
    #[must_use]
    pub const fn uses_fallback(&self) -> bool {
        self.uses_fallback
    }

    /// Active voice
    #[must_use]
    pub fn voice_id(&self) -> Option<&str> {
        self.voice_id.as_deref()
    }

    /// Whether synthesis requests are accepted
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Whether another worker attempt is allowed
    #[must_use]
    pub const fn can_attempt_worker(&self) -> bool {
        !self.uses_fallback && self.attempt_count < MAX_INIT_ATTEMPTS
    }

    pub(crate) fn begin_initializing(&mut self) {
        self.state = SessionState::Initializing;
    }

    /// Record a worker attempt, returning the attempt number
    pub(crate) const fn record_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    /// Switch permanently to fallback mode for this session
    pub(crate) const fn engage_fallback(&mut self) {
        self.uses_fallback = true;
    }

    pub(crate) fn mark_ready(&mut self, voice_id: Option<String>) {
        self.state = SessionState::Ready;
        if voice_id.is_some() {
            self.voice_id = voice_id;
        }
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = SessionState::Failed;
    }

    pub(crate) fn set_voice(&mut self, voice_id: String) {
        self.voice_id = Some(voice_id);
    }

    /// Reset for an explicit restart
    pub(crate) fn restart(&mut self) {
        *self = Self {
            voice_id: self.voice_id.take(),
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_are_bounded() {
        let mut session = SynthesisSession::default();
        for expected in 1..=MAX_INIT_ATTEMPTS {
            assert!(session.can_attempt_worker());
            assert_eq!(session.record_attempt(), expected);
        }
        assert!(!session.can_attempt_worker());
    }

    #[test]
    fn fallback_blocks_worker_attempts() {
        let mut session = SynthesisSession::default();
        session.engage_fallback();
        assert!(session.uses_fallback());
        assert!(!session.can_attempt_worker());
    }

    #[test]
    fn restart_resets_counters_but_keeps_voice() {
        let mut session = SynthesisSession::default();
        session.record_attempt();
        session.engage_fallback();
        session.mark_ready(Some("nova".to_string()));

        session.restart();
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(session.attempt_count(), 0);
        assert!(!session.uses_fallback());
        assert_eq!(session.voice_id(), Some("nova"));
    }

    #[test]
    fn ready_without_voice_keeps_previous() {
        let mut session = SynthesisSession::default();
        session.set_voice("alloy".to_string());
        session.mark_ready(None);
        assert!(session.is_ready());
        assert_eq!(session.voice_id(), Some("alloy"));
    }
}
