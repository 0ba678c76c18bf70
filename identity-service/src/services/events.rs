//! Identity events, dispatched after a unit of work commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{AccountStatus, Provider};

/// Plaintext one-time code on its way to out-of-band delivery.
///
/// Serialized for the delivery channel but redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeliveredCode(String);

impl DeliveredCode {
    pub fn new(code: String) -> Self {
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for DeliveredCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeliveredCode(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum IdentityEvent {
    #[serde(rename = "account.registered")]
    AccountRegistered {
        account_id: Uuid,
        provider: Provider,
    },

    #[serde(rename = "verification_code.issued")]
    VerificationCodeIssued {
        account_id: Uuid,
        auth_method_id: Uuid,
        provider: Provider,
        destination: String,
        code: DeliveredCode,
        expires_at: DateTime<Utc>,
    },

    #[serde(rename = "account.activated")]
    AccountActivated { account_id: Uuid },

    #[serde(rename = "session.started")]
    SessionStarted { account_id: Uuid, token_id: Uuid },

    /// `token_id` is absent when every session of the account was revoked.
    #[serde(rename = "session.revoked")]
    SessionRevoked {
        account_id: Uuid,
        token_id: Option<Uuid>,
        revoked_count: u64,
    },

    #[serde(rename = "account.status_changed")]
    AccountStatusChanged {
        account_id: Uuid,
        from: AccountStatus,
        to: AccountStatus,
    },
}

impl IdentityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IdentityEvent::AccountRegistered { .. } => "account.registered",
            IdentityEvent::VerificationCodeIssued { .. } => "verification_code.issued",
            IdentityEvent::AccountActivated { .. } => "account.activated",
            IdentityEvent::SessionStarted { .. } => "session.started",
            IdentityEvent::SessionRevoked { .. } => "session.revoked",
            IdentityEvent::AccountStatusChanged { .. } => "account.status_changed",
        }
    }

    pub fn account_id(&self) -> Uuid {
        match self {
            IdentityEvent::AccountRegistered { account_id, .. }
            | IdentityEvent::VerificationCodeIssued { account_id, .. }
            | IdentityEvent::AccountActivated { account_id }
            | IdentityEvent::SessionStarted { account_id, .. }
            | IdentityEvent::SessionRevoked { account_id, .. }
            | IdentityEvent::AccountStatusChanged { account_id, .. } => *account_id,
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &IdentityEvent) -> Result<(), anyhow::Error>;
}

/// Writes event names to the log. Payloads are not logged.
#[derive(Debug, Clone, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: &IdentityEvent) -> Result<(), anyhow::Error> {
        tracing::info!(
            event = event.name(),
            account_id = %event.account_id(),
            "Identity event published"
        );
        Ok(())
    }
}

/// POSTs each event as JSON to a webhook.
#[derive(Clone)]
pub struct WebhookEventPublisher {
    client: reqwest::Client,
    url: String,
}

impl WebhookEventPublisher {
    pub fn new(url: &str) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build webhook client: {}", e))?;

        tracing::info!(url = %url, "Event webhook configured");

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for WebhookEventPublisher {
    #[tracing::instrument(skip(self, event), fields(event = event.name()))]
    async fn publish(&self, event: &IdentityEvent) -> Result<(), anyhow::Error> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Event webhook request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("Event webhook rejected event: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_name_tag() {
        let account_id = Uuid::new_v4();
        let event = IdentityEvent::AccountActivated { account_id };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "account.activated");
        assert_eq!(value["account_id"], account_id.to_string());
        assert_eq!(event.name(), "account.activated");
    }

    #[test]
    fn test_code_is_redacted_from_debug() {
        let event = IdentityEvent::VerificationCodeIssued {
            account_id: Uuid::new_v4(),
            auth_method_id: Uuid::new_v4(),
            provider: Provider::Email,
            destination: "a@example.com".to_string(),
            code: DeliveredCode::new("123456".to_string()),
            expires_at: Utc::now(),
        };

        assert!(!format!("{:?}", event).contains("123456"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["code"], "123456");
        assert_eq!(value["provider"], "EMAIL");
    }
}
