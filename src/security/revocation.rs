//! Token revocation list
//!
//! In-memory set of revoked token identifiers mapped to their natural
//! expiry. Entries are pruned opportunistically on `revoke`; lookups treat
//! tokens whose expiry has passed as not revoked regardless of pruning
//! cadence, since an expired revocation is moot.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Revoked token identifiers with expiry-based eviction
#[derive(Debug, Default)]
pub struct RevocationGuard {
    revoked: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RevocationGuard {
    /// Create an empty guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke a token until its natural expiry
    pub fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) {
        let mut revoked = self
            .revoked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        revoked.insert(token_id.to_string(), expires_at);

        // lazy GC: expired entries drop out whenever a new revocation lands
        let now = Utc::now();
        revoked.retain(|_, exp| *exp > now);
    }

    /// Whether a token is currently revoked
    #[must_use]
    pub fn is_revoked(&self, token_id: &str) -> bool {
        let revoked = self
            .revoked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        revoked
            .get(token_id)
            .is_some_and(|expires_at| *expires_at > Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn revoked_until_expiry() {
        let guard = RevocationGuard::new();
        guard.revoke("jti-1", Utc::now() + Duration::hours(1));
        assert!(guard.is_revoked("jti-1"));
        assert!(!guard.is_revoked("jti-2"));
    }

    #[test]
    fn expired_revocation_is_moot() {
        let guard = RevocationGuard::new();
        guard.revoke("jti-1", Utc::now() - Duration::seconds(1));
        assert!(!guard.is_revoked("jti-1"));
    }

    #[test]
    fn revoke_prunes_expired_entries() {
        let guard = RevocationGuard::new();
        guard.revoke("stale", Utc::now() - Duration::minutes(5));
        guard.revoke("live", Utc::now() + Duration::minutes(5));

        let revoked = guard.revoked.lock().unwrap();
        assert!(!revoked.contains_key("stale"));
        assert!(revoked.contains_key("live"));
    }
}
