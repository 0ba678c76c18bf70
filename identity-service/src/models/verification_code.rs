//! Verification code model - one-time code proving control of an auth method.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Verification code entity. Only the hash of the code is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode {
    pub code_id: Uuid,
    pub auth_method_id: Uuid,
    pub code_hash_text: String,
    pub attempt_count: i32,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl VerificationCode {
    pub fn new(
        auth_method_id: Uuid,
        code_hash_text: String,
        now: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            auth_method_id,
            code_hash_text,
            attempt_count: 0,
            expiry_utc,
            consumed_utc: None,
            created_utc: now,
        }
    }

    /// Unconsumed and not yet expired at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.consumed_utc.is_none() && self.expiry_utc > now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    /// Seconds until expiry, zero once expired.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expiry_utc - now).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_code_activity_window() {
        let now = Utc::now();
        let code = VerificationCode::new(
            Uuid::new_v4(),
            "hash".to_string(),
            now,
            now + Duration::seconds(300),
        );

        assert!(code.is_active(now));
        assert_eq!(code.expires_in(now), 300);
        assert!(!code.is_active(now + Duration::seconds(300)));
        assert!(code.is_expired(now + Duration::seconds(300)));
        assert_eq!(code.expires_in(now + Duration::seconds(900)), 0);
    }

    #[test]
    fn test_consumed_code_is_inactive() {
        let now = Utc::now();
        let mut code = VerificationCode::new(
            Uuid::new_v4(),
            "hash".to_string(),
            now,
            now + Duration::seconds(300),
        );
        code.consumed_utc = Some(now);

        assert!(code.is_consumed());
        assert!(!code.is_active(now));
    }
}
