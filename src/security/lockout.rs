//! Account lockout tracking
//!
//! In-memory, per-identity failed-attempt counter with a time-boxed
//! lockout. Constructed once at controller startup and shared by reference
//! into every authentication handler; the guard owns its state exclusively.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Failed attempts within the window before a lockout triggers
pub const MAX_FAILED_ATTEMPTS: usize = 5;

/// Sliding window for counting failures, and the lockout length
pub const LOCKOUT_DURATION_MINUTES: i64 = 15;

#[derive(Debug, Default)]
struct LockoutState {
    /// Failed-attempt timestamps per identity, pruned to the sliding window
    failed_attempts: HashMap<String, Vec<DateTime<Utc>>>,
    /// Active lockout expiries
    lockouts: HashMap<String, DateTime<Utc>>,
}

/// Tracks failed login attempts and locks identities after the threshold
///
/// All methods are safe under concurrent invocation; operations are O(small)
/// so a single mutex region per guard is sufficient at authentication scale.
#[derive(Debug, Default)]
pub struct LockoutGuard {
    state: Mutex<LockoutState>,
}

impl LockoutGuard {
    /// Create an empty guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn window() -> Duration {
        Duration::minutes(LOCKOUT_DURATION_MINUTES)
    }

    fn prune(state: &mut LockoutState, identity: &str, now: DateTime<Utc>) {
        let cutoff = now - Self::window();
        if let Some(attempts) = state.failed_attempts.get_mut(identity) {
            attempts.retain(|t| *t > cutoff);
        }
    }

    /// Whether the identity is currently locked out
    ///
    /// Expired lockouts self-clear here (lazy eviction), taking the
    /// identity's attempt history with them.
    #[must_use]
    pub fn is_locked_out(&self, identity: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Utc::now();

        if let Some(until) = state.lockouts.get(identity).copied() {
            if now < until {
                return true;
            }
            state.lockouts.remove(identity);
            state.failed_attempts.remove(identity);
        }
        false
    }

    /// Record a failed attempt; returns whether this attempt triggered a lockout
    pub fn record_failed_attempt(&self, identity: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Utc::now();

        Self::prune(&mut state, identity, now);
        state
            .failed_attempts
            .entry(identity.to_string())
            .or_default()
            .push(now);

        let already_locked = state
            .lockouts
            .get(identity)
            .is_some_and(|until| now < *until);
        let count = state.failed_attempts.get(identity).map_or(0, Vec::len);

        if count >= MAX_FAILED_ATTEMPTS && !already_locked {
            let until = now + Self::window();
            state.lockouts.insert(identity.to_string(), until);
            tracing::warn!(identity, %until, "account locked after repeated failures");
            return true;
        }
        false
    }

    /// Remaining attempts before the identity locks
    #[must_use]
    pub fn remaining_attempts(&self, identity: &str) -> usize {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::prune(&mut state, identity, Utc::now());
        let used = state.failed_attempts.get(identity).map_or(0, Vec::len);
        MAX_FAILED_ATTEMPTS.saturating_sub(used)
    }

    /// Seconds until an active lockout expires, or `None` when not locked
    #[must_use]
    pub fn lockout_remaining_seconds(&self, identity: &str) -> Option<i64> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let until = state.lockouts.get(identity)?;
        let remaining = (*until - Utc::now()).num_seconds();
        (remaining > 0).then_some(remaining)
    }

    /// Clear an identity's history after a successful login
    pub fn clear_attempts(&self, identity: &str) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.failed_attempts.remove(identity);
        state.lockouts.remove(identity);
    }
}
