//! Auth method model - the single credential binding of an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Authentication provider codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Email,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Email => "EMAIL",
            Provider::Google => "GOOGLE",
        }
    }

    /// Providers proven by a one-time code sent to the external id.
    ///
    /// Other providers arrive already verified by the provider itself.
    pub fn uses_verification_codes(&self) -> bool {
        matches!(self, Provider::Email)
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Ok(Provider::Email),
            "GOOGLE" => Ok(Provider::Google),
            _ => Err(format!("Invalid provider: {}", s)),
        }
    }
}

/// Auth method entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMethod {
    pub auth_method_id: Uuid,
    pub account_id: Uuid,
    pub provider: Provider,
    /// Email address or provider subject.
    pub provider_subject: String,
    pub verified: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl AuthMethod {
    pub fn new(
        account_id: Uuid,
        provider: Provider,
        provider_subject: String,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            auth_method_id: Uuid::new_v4(),
            account_id,
            provider,
            provider_subject,
            verified,
            last_login_utc: None,
            created_utc: now,
        }
    }
}
