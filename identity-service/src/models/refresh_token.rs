//! Refresh token model - the one long-lived session of an account.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Client details recorded with a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Refresh token entity. Only the hash of the secret is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub account_id: Uuid,
    pub token_hash_text: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(
        account_id: Uuid,
        token_hash_text: String,
        client: &ClientMeta,
        now: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            account_id,
            token_hash_text,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            revoked_utc: None,
            expiry_utc,
            created_utc: now,
        }
    }

    /// Not revoked and not yet expired at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}
