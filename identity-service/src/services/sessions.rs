//! Session manager: one active refresh token per account.

use std::sync::Arc;

use uuid::Uuid;

use super::clock::Clock;
use super::credentials::CredentialHasher;
use super::error::ServiceError;
use super::jwt::TokenIssuer;
use crate::models::{ClientMeta, RefreshToken};
use crate::store::RefreshTokenRepository;

/// A new session and the refresh secret handed to the client.
#[derive(Clone)]
pub struct StartedSession {
    pub token: RefreshToken,
    pub secret: String,
}

#[derive(Clone)]
pub struct SessionManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: Arc<dyn TokenIssuer>,
}

impl<S: RefreshTokenRepository> SessionManager<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            store,
            clock,
            hasher,
            tokens,
        }
    }

    /// Revoke every unrevoked token of the account, then persist a new one.
    pub async fn start_session(
        &self,
        tx: &mut S::Tx,
        account_id: Uuid,
        client: &ClientMeta,
    ) -> Result<StartedSession, ServiceError> {
        let now = self.clock.now();

        let revoked = self.store.revoke_account_tokens(tx, account_id, now).await?;
        if revoked > 0 {
            tracing::debug!(account_id = %account_id, revoked, "Revoked previous sessions");
        }

        let secret = self.tokens.mint_refresh_secret();
        let token = RefreshToken::new(
            account_id,
            self.hasher.hash(&secret),
            client,
            now,
            now + self.tokens.refresh_token_ttl(),
        );
        self.store.insert_refresh_token(tx, &token).await?;

        Ok(StartedSession { token, secret })
    }

    pub async fn revoke(&self, tx: &mut S::Tx, token_id: Uuid) -> Result<(), ServiceError> {
        if !self
            .store
            .revoke_refresh_token(tx, token_id, self.clock.now())
            .await?
        {
            return Err(ServiceError::NotFound("Refresh token"));
        }
        Ok(())
    }

    pub async fn revoke_all(&self, tx: &mut S::Tx, account_id: Uuid) -> Result<u64, ServiceError> {
        Ok(self
            .store
            .revoke_account_tokens(tx, account_id, self.clock.now())
            .await?)
    }

    /// Resolve a refresh secret to its active token.
    pub async fn validate(&self, tx: &mut S::Tx, secret: &str) -> Result<RefreshToken, ServiceError> {
        let token = self
            .store
            .find_refresh_token_by_hash(tx, &self.hasher.hash(secret))
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        if !self.hasher.verify(secret, &token.token_hash_text) {
            return Err(ServiceError::InvalidToken);
        }

        if !token.is_active(self.clock.now()) {
            return Err(ServiceError::InvalidToken);
        }

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, AccountStatus, Role};
    use crate::services::clock::ManualClock;
    use crate::services::credentials::HmacCredentialHasher;
    use crate::services::jwt::JwtService;
    use crate::store::{AccountRepository, MemoryStore, TransactionCoordinator};
    use chrono::Duration;

    async fn fixture() -> (MemoryStore, Arc<ManualClock>, SessionManager<MemoryStore>, Uuid) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let sessions = SessionManager::new(
            store.clone(),
            clock.clone(),
            Arc::new(HmacCredentialHasher::new("pepper").unwrap()),
            Arc::new(JwtService::from_secret("secret", "identity-service", 15, 7)),
        );

        let account = Account::new(Role::User, AccountStatus::Active, clock.now());
        let mut tx = store.begin().await.unwrap();
        store.insert_account(&mut tx, &account).await.unwrap();
        store.commit(tx).await.unwrap();

        (store, clock, sessions, account.account_id)
    }

    #[tokio::test]
    async fn test_double_start_leaves_one_active_token() {
        let (store, clock, sessions, account_id) = fixture().await;
        let mut tx = store.begin().await.unwrap();

        let first = sessions.start_session(&mut tx, account_id, &ClientMeta::default()).await.unwrap();
        let second = sessions.start_session(&mut tx, account_id, &ClientMeta::default()).await.unwrap();
        store.commit(tx).await.unwrap();

        let tokens = store.refresh_tokens().await;
        let active: Vec<_> = tokens.iter().filter(|t| t.is_active(clock.now())).collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_id, second.token.token_id);
        assert_ne!(first.secret, second.secret);
        assert!(tokens.iter().all(|t| t.token_hash_text != second.secret));
    }

    #[tokio::test]
    async fn test_validate_rejects_revoked_and_expired() {
        let (store, clock, sessions, account_id) = fixture().await;
        let mut tx = store.begin().await.unwrap();

        let first = sessions.start_session(&mut tx, account_id, &ClientMeta::default()).await.unwrap();
        let second = sessions.start_session(&mut tx, account_id, &ClientMeta::default()).await.unwrap();

        assert!(matches!(
            sessions.validate(&mut tx, &first.secret).await,
            Err(ServiceError::InvalidToken)
        ));
        assert!(matches!(
            sessions.validate(&mut tx, "unknown").await,
            Err(ServiceError::InvalidToken)
        ));
        let token = sessions.validate(&mut tx, &second.secret).await.unwrap();
        assert_eq!(token.account_id, account_id);

        clock.advance(Duration::days(7));
        assert!(matches!(
            sessions.validate(&mut tx, &second.secret).await,
            Err(ServiceError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_revoke_and_revoke_all() {
        let (store, _clock, sessions, account_id) = fixture().await;
        let mut tx = store.begin().await.unwrap();

        assert_eq!(sessions.revoke_all(&mut tx, account_id).await.unwrap(), 0);

        let started = sessions.start_session(&mut tx, account_id, &ClientMeta::default()).await.unwrap();
        sessions.revoke(&mut tx, started.token.token_id).await.unwrap();

        let again = sessions.revoke(&mut tx, started.token.token_id).await.unwrap_err();
        assert!(matches!(again, ServiceError::NotFound(_)));
        let missing = sessions.revoke(&mut tx, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }
}
