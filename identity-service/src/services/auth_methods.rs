//! Auth method binding: one method per account, one account per
//! (provider, external id).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::ValidateEmail;

use super::clock::Clock;
use super::error::ServiceError;
use crate::models::{AuthMethod, Provider};
use crate::store::AuthMethodRepository;

/// Canonical form of an external id for lookups and storage.
///
/// Email addresses are trimmed and lower-cased. Provider subjects are
/// opaque and only trimmed.
pub fn normalize_external_id(provider: Provider, raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation("External id must not be empty".to_string()));
    }

    match provider {
        Provider::Email => {
            let email = trimmed.to_lowercase();
            if !email.validate_email() {
                return Err(ServiceError::Validation("Invalid email address".to_string()));
            }
            Ok(email)
        }
        Provider::Google => Ok(trimmed.to_string()),
    }
}

#[derive(Clone)]
pub struct AuthMethodBinding<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: AuthMethodRepository> AuthMethodBinding<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create(
        &self,
        tx: &mut S::Tx,
        account_id: Uuid,
        provider: Provider,
        external_id: String,
        initially_verified: bool,
    ) -> Result<AuthMethod, ServiceError> {
        if self
            .store
            .find_auth_method_by_provider(tx, provider, &external_id)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "{} identity already bound",
                provider.as_str()
            )));
        }

        if self
            .store
            .find_auth_method_by_account(tx, account_id)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "Account already has an auth method".to_string(),
            ));
        }

        let method = AuthMethod::new(
            account_id,
            provider,
            external_id,
            initially_verified,
            self.clock.now(),
        );
        // Concurrent binders that passed the checks above are stopped by the
        // unique indexes.
        self.store.insert_auth_method(tx, &method).await?;

        Ok(method)
    }

    pub async fn find_by_provider(
        &self,
        tx: &mut S::Tx,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<AuthMethod>, ServiceError> {
        Ok(self
            .store
            .find_auth_method_by_provider(tx, provider, external_id)
            .await?)
    }

    /// Idempotent.
    pub async fn mark_verified(
        &self,
        tx: &mut S::Tx,
        auth_method_id: Uuid,
    ) -> Result<(), ServiceError> {
        if !self.store.mark_auth_method_verified(tx, auth_method_id).await? {
            return Err(ServiceError::NotFound("Auth method"));
        }
        Ok(())
    }

    pub async fn record_login(
        &self,
        tx: &mut S::Tx,
        auth_method_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if !self
            .store
            .record_auth_method_login(tx, auth_method_id, at)
            .await?
        {
            return Err(ServiceError::NotFound("Auth method"));
        }
        Ok(())
    }
}
