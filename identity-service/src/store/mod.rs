//! Persistence ports for the identity engine.
//!
//! Every repository call made inside a unit of work receives the open
//! transaction as an explicit `&mut Self::Tx`. Repositories never begin,
//! commit or roll back; [`run_atomic`] owns the transaction boundary.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, AccountStatus, AuthMethod, Provider, RefreshToken, VerificationCode};

pub use memory::{FailPoint, MemoryStore, MemoryTx};
pub use postgres::PgStore;

/// Errors raised by store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A uniqueness constraint rejected the write.
    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Opens and closes units of work.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AccountRepository: TransactionCoordinator {
    async fn insert_account(&self, tx: &mut Self::Tx, account: &Account) -> Result<(), StoreError>;

    async fn find_account(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
    ) -> Result<Option<Account>, StoreError>;

    /// Returns false when the account does not exist.
    async fn update_account_status(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AuthMethodRepository: TransactionCoordinator {
    /// Fails with `Conflict` when (provider, subject) is taken or the
    /// account already owns a method.
    async fn insert_auth_method(
        &self,
        tx: &mut Self::Tx,
        method: &AuthMethod,
    ) -> Result<(), StoreError>;

    async fn find_auth_method_by_provider(
        &self,
        tx: &mut Self::Tx,
        provider: Provider,
        provider_subject: &str,
    ) -> Result<Option<AuthMethod>, StoreError>;

    async fn find_auth_method_by_account(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
    ) -> Result<Option<AuthMethod>, StoreError>;

    async fn mark_auth_method_verified(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
    ) -> Result<bool, StoreError>;

    async fn record_auth_method_login(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait VerificationCodeRepository: TransactionCoordinator {
    /// Deletes every unconsumed code of the method, expired ones included.
    async fn delete_unconsumed_codes(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Fails with `Conflict` when the method still has an unconsumed code.
    async fn insert_code(&self, tx: &mut Self::Tx, code: &VerificationCode)
        -> Result<(), StoreError>;

    /// The unconsumed code of the method that has not expired at `now`.
    async fn find_active_code(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationCode>, StoreError>;

    /// Returns the new attempt count.
    async fn increment_code_attempts(
        &self,
        tx: &mut Self::Tx,
        code_id: Uuid,
    ) -> Result<i32, StoreError>;

    /// Sets `consumed_utc` if still unset. Returns false when already consumed.
    async fn consume_code(
        &self,
        tx: &mut Self::Tx,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait RefreshTokenRepository: TransactionCoordinator {
    /// Revokes every unrevoked token of the account. Returns the row count.
    async fn revoke_account_tokens(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Fails with `Conflict` on a duplicate hash or a second unrevoked
    /// token for the account.
    async fn insert_refresh_token(
        &self,
        tx: &mut Self::Tx,
        token: &RefreshToken,
    ) -> Result<(), StoreError>;

    async fn find_refresh_token_by_hash(
        &self,
        tx: &mut Self::Tx,
        token_hash_text: &str,
    ) -> Result<Option<RefreshToken>, StoreError>;

    /// Revokes one token if still unrevoked. Returns false otherwise.
    async fn revoke_refresh_token(
        &self,
        tx: &mut Self::Tx,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Everything the engine needs from a store, behind one transaction type.
pub trait IdentityStore:
    AccountRepository
    + AuthMethodRepository
    + VerificationCodeRepository
    + RefreshTokenRepository
    + Clone
    + 'static
{
}

impl<T> IdentityStore for T where
    T: AccountRepository
        + AuthMethodRepository
        + VerificationCodeRepository
        + RefreshTokenRepository
        + Clone
        + 'static
{
}

/// Run `f` as one unit of work.
///
/// Commits when `f` returns `Ok` and rolls back on `Err`. If the returned
/// future is dropped before completion the transaction is dropped with it,
/// which discards every write.
pub async fn run_atomic<C, T, E, F>(coordinator: &C, f: F) -> Result<T, E>
where
    C: TransactionCoordinator + ?Sized,
    E: From<StoreError>,
    F: for<'t> FnOnce(&'t mut C::Tx) -> BoxFuture<'t, Result<T, E>> + Send,
{
    let mut tx = coordinator.begin().await?;

    let outcome = f(&mut tx).await;
    match outcome {
        Ok(value) => {
            coordinator.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = coordinator.rollback(tx).await {
                tracing::error!(error = %rollback_err, "Failed to roll back unit of work");
            }
            Err(err)
        }
    }
}
