//! Speaking lock and auto-speak attempt counter

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{Error, Result};

#[derive(Debug, Default)]
struct LockState {
    holder: Option<u64>,
    next_ticket: u64,
    attempts: u32,
}

/// Single exclusion flag shared by auto and manual speak
///
/// Holding the lock is represented by a [`SpeakGuard`]; dropping the guard
/// releases it. Each acquisition gets a fresh ticket, so after
/// [`force_release`](Self::force_release) a stale guard cannot release a
/// newer holder.
#[derive(Debug, Clone, Default)]
pub struct SpeakingLock {
    state: Arc<Mutex<LockState>>,
}

impl SpeakingLock {
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock without waiting
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpeakingLockHeld`] if another speak holds it
    pub fn try_acquire(&self) -> Result<SpeakGuard> {
        let mut state = self.state();
        if state.holder.is_some() {
            return Err(Error::SpeakingLockHeld);
        }
        state.next_ticket = state.next_ticket.wrapping_add(1);
        let ticket = state.next_ticket;
        state.holder = Some(ticket);
        drop(state);

        Ok(SpeakGuard {
            lock: self.clone(),
            ticket,
        })
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state().holder.is_some()
    }

    /// Release regardless of holder, returning whether it was held
    pub fn force_release(&self) -> bool {
        self.state().holder.take().is_some()
    }

    /// Count an auto-speak attempt, returning the new total
    pub fn record_attempt(&self) -> u32 {
        let mut state = self.state();
        state.attempts = state.attempts.saturating_add(1);
        state.attempts
    }

    /// Auto-speak attempts for the current turn
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    pub fn reset_attempts(&self) {
        self.state().attempts = 0;
    }
}

/// Proof of holding the [`SpeakingLock`]
#[derive(Debug)]
pub struct SpeakGuard {
    lock: SpeakingLock,
    ticket: u64,
}

impl Drop for SpeakGuard {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        if state.holder == Some(self.ticket) {
            state.holder = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected() {
        let lock = SpeakingLock::default();
        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_held());
        assert!(matches!(lock.try_acquire(), Err(Error::SpeakingLockHeld)));

        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_ok());
    }

    #[test]
    fn stale_guard_does_not_release_new_holder() {
        let lock = SpeakingLock::default();
        let stale = lock.try_acquire().unwrap();
        assert!(lock.force_release());

        let current = lock.try_acquire().unwrap();
        drop(stale);
        assert!(lock.is_held());

        drop(current);
        assert!(!lock.is_held());
        assert!(!lock.force_release());
    }

    #[test]
    fn attempts_count_until_reset() {
        let lock = SpeakingLock::default();
        assert_eq!(lock.record_attempt(), 1);
        assert_eq!(lock.record_attempt(), 2);
        assert_eq!(lock.attempts(), 2);
        lock.reset_attempts();
        assert_eq!(lock.attempts(), 0);
    }
}
