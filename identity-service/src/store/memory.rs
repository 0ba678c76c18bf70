//! In-memory store.
//!
//! Units of work are serialised: `begin` takes the table lock and works on a
//! copy, `commit` writes the copy back, and dropping the transaction throws
//! it away. The uniqueness rules of the relational schema are enforced on
//! every insert so both adapters reject the same writes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    AccountRepository, AuthMethodRepository, RefreshTokenRepository, StoreError,
    TransactionCoordinator, VerificationCodeRepository,
};
use crate::models::{Account, AccountStatus, AuthMethod, Provider, RefreshToken, VerificationCode};

/// Operations that can be made to fail once, for failure-injection tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Commit,
    InsertAccount,
    UpdateAccountStatus,
    InsertAuthMethod,
    MarkAuthMethodVerified,
    InsertCode,
    ConsumeCode,
    RevokeAccountTokens,
    InsertRefreshToken,
    RevokeRefreshToken,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    auth_methods: HashMap<Uuid, AuthMethod>,
    codes: HashMap<Uuid, VerificationCode>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
}

/// Open unit of work on a [`MemoryStore`].
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_points: Arc<DashSet<FailPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call through `point` fail with a backend error.
    pub fn fail_once(&self, point: FailPoint) {
        self.fail_points.insert(point);
    }

    fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.fail_points.remove(&point).is_some() {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "injected failure at {:?}",
                point
            )));
        }
        Ok(())
    }

    // Committed-state snapshots. These wait for any open unit of work.

    pub async fn accounts(&self) -> Vec<Account> {
        self.tables.lock().await.accounts.values().cloned().collect()
    }

    pub async fn auth_methods(&self) -> Vec<AuthMethod> {
        self.tables.lock().await.auth_methods.values().cloned().collect()
    }

    pub async fn codes(&self) -> Vec<VerificationCode> {
        self.tables.lock().await.codes.values().cloned().collect()
    }

    pub async fn refresh_tokens(&self) -> Vec<RefreshToken> {
        self.tables.lock().await.refresh_tokens.values().cloned().collect()
    }
}

#[async_trait]
impl TransactionCoordinator for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        self.trip(FailPoint::Begin)?;
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        self.trip(FailPoint::Commit)?;
        let MemoryTx { mut guard, working } = tx;
        *guard = working;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), StoreError> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn insert_account(&self, tx: &mut MemoryTx, account: &Account) -> Result<(), StoreError> {
        self.trip(FailPoint::InsertAccount)?;
        let accounts = &mut tx.working.accounts;
        if accounts.contains_key(&account.account_id) {
            return Err(StoreError::Conflict("accounts_pkey".to_string()));
        }
        accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    async fn find_account(
        &self,
        tx: &mut MemoryTx,
        account_id: Uuid,
    ) -> Result<Option<Account>, StoreError> {
        Ok(tx.working.accounts.get(&account_id).cloned())
    }

    async fn update_account_status(
        &self,
        tx: &mut MemoryTx,
        account_id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, StoreError> {
        self.trip(FailPoint::UpdateAccountStatus)?;
        match tx.working.accounts.get_mut(&account_id) {
            Some(account) => {
                account.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AuthMethodRepository for MemoryStore {
    async fn insert_auth_method(
        &self,
        tx: &mut MemoryTx,
        method: &AuthMethod,
    ) -> Result<(), StoreError> {
        self.trip(FailPoint::InsertAuthMethod)?;
        let tables = &mut tx.working;
        if !tables.accounts.contains_key(&method.account_id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "auth_methods_account_id_fkey violated"
            )));
        }
        for existing in tables.auth_methods.values() {
            if existing.provider == method.provider
                && existing.provider_subject == method.provider_subject
            {
                return Err(StoreError::Conflict(
                    "auth_methods_provider_subject_key".to_string(),
                ));
            }
            if existing.account_id == method.account_id {
                return Err(StoreError::Conflict("auth_methods_account_id_key".to_string()));
            }
        }
        tables.auth_methods.insert(method.auth_method_id, method.clone());
        Ok(())
    }

    async fn find_auth_method_by_provider(
        &self,
        tx: &mut MemoryTx,
        provider: Provider,
        provider_subject: &str,
    ) -> Result<Option<AuthMethod>, StoreError> {
        Ok(tx
            .working
            .auth_methods
            .values()
            .find(|m| m.provider == provider && m.provider_subject == provider_subject)
            .cloned())
    }

    async fn find_auth_method_by_account(
        &self,
        tx: &mut MemoryTx,
        account_id: Uuid,
    ) -> Result<Option<AuthMethod>, StoreError> {
        Ok(tx
            .working
            .auth_methods
            .values()
            .find(|m| m.account_id == account_id)
            .cloned())
    }

    async fn mark_auth_method_verified(
        &self,
        tx: &mut MemoryTx,
        auth_method_id: Uuid,
    ) -> Result<bool, StoreError> {
        self.trip(FailPoint::MarkAuthMethodVerified)?;
        match tx.working.auth_methods.get_mut(&auth_method_id) {
            Some(method) => {
                method.verified = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_auth_method_login(
        &self,
        tx: &mut MemoryTx,
        auth_method_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match tx.working.auth_methods.get_mut(&auth_method_id) {
            Some(method) => {
                method.last_login_utc = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl VerificationCodeRepository for MemoryStore {
    async fn delete_unconsumed_codes(
        &self,
        tx: &mut MemoryTx,
        auth_method_id: Uuid,
    ) -> Result<u64, StoreError> {
        let codes = &mut tx.working.codes;
        let before = codes.len();
        codes.retain(|_, c| c.auth_method_id != auth_method_id || c.consumed_utc.is_some());
        Ok((before - codes.len()) as u64)
    }

    async fn insert_code(&self, tx: &mut MemoryTx, code: &VerificationCode) -> Result<(), StoreError> {
        self.trip(FailPoint::InsertCode)?;
        let tables = &mut tx.working;
        if !tables.auth_methods.contains_key(&code.auth_method_id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "verification_codes_auth_method_id_fkey violated"
            )));
        }
        let has_unconsumed = tables
            .codes
            .values()
            .any(|c| c.auth_method_id == code.auth_method_id && c.consumed_utc.is_none());
        if has_unconsumed {
            return Err(StoreError::Conflict(
                "verification_codes_one_unconsumed_idx".to_string(),
            ));
        }
        tables.codes.insert(code.code_id, code.clone());
        Ok(())
    }

    async fn find_active_code(
        &self,
        tx: &mut MemoryTx,
        auth_method_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationCode>, StoreError> {
        Ok(tx
            .working
            .codes
            .values()
            .find(|c| c.auth_method_id == auth_method_id && c.is_active(now))
            .cloned())
    }

    async fn increment_code_attempts(
        &self,
        tx: &mut MemoryTx,
        code_id: Uuid,
    ) -> Result<i32, StoreError> {
        let code = tx
            .working
            .codes
            .get_mut(&code_id)
            .ok_or(StoreError::NotFound("Verification code"))?;
        code.attempt_count += 1;
        Ok(code.attempt_count)
    }

    async fn consume_code(
        &self,
        tx: &mut MemoryTx,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.trip(FailPoint::ConsumeCode)?;
        match tx.working.codes.get_mut(&code_id) {
            Some(code) if code.consumed_utc.is_none() => {
                code.consumed_utc = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
    async fn revoke_account_tokens(
        &self,
        tx: &mut MemoryTx,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.trip(FailPoint::RevokeAccountTokens)?;
        let mut revoked = 0;
        for token in tx.working.refresh_tokens.values_mut() {
            if token.account_id == account_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn insert_refresh_token(
        &self,
        tx: &mut MemoryTx,
        token: &RefreshToken,
    ) -> Result<(), StoreError> {
        self.trip(FailPoint::InsertRefreshToken)?;
        let tables = &mut tx.working;
        if !tables.accounts.contains_key(&token.account_id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "refresh_tokens_account_id_fkey violated"
            )));
        }
        for existing in tables.refresh_tokens.values() {
            if existing.token_hash_text == token.token_hash_text {
                return Err(StoreError::Conflict(
                    "refresh_tokens_token_hash_text_key".to_string(),
                ));
            }
            if existing.account_id == token.account_id && existing.revoked_utc.is_none() {
                return Err(StoreError::Conflict(
                    "refresh_tokens_one_unrevoked_idx".to_string(),
                ));
            }
        }
        tables.refresh_tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        tx: &mut MemoryTx,
        token_hash_text: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(tx
            .working
            .refresh_tokens
            .values()
            .find(|t| t.token_hash_text == token_hash_text)
            .cloned())
    }

    async fn revoke_refresh_token(
        &self,
        tx: &mut MemoryTx,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.trip(FailPoint::RevokeRefreshToken)?;
        match tx.working.refresh_tokens.get_mut(&token_id) {
            Some(token) if token.revoked_utc.is_none() => {
                token.revoked_utc = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientMeta, Role};
    use chrono::Duration;

    async fn seeded(store: &MemoryStore) -> (Account, AuthMethod) {
        let now = Utc::now();
        let account = Account::new(Role::User, AccountStatus::Pending, now);
        let method = AuthMethod::new(
            account.account_id,
            Provider::Email,
            "a@example.com".to_string(),
            false,
            now,
        );
        let mut tx = store.begin().await.unwrap();
        store.insert_account(&mut tx, &account).await.unwrap();
        store.insert_auth_method(&mut tx, &method).await.unwrap();
        store.commit(tx).await.unwrap();
        (account, method)
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        let account = Account::new(Role::User, AccountStatus::Pending, Utc::now());

        let mut tx = store.begin().await.unwrap();
        store.insert_account(&mut tx, &account).await.unwrap();
        drop(tx);

        assert!(store.accounts().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_binding_is_conflict() {
        let store = MemoryStore::new();
        let (_, method) = seeded(&store).await;
        let other = Account::new(Role::User, AccountStatus::Pending, Utc::now());
        let clash = AuthMethod::new(
            other.account_id,
            Provider::Email,
            method.provider_subject.clone(),
            false,
            Utc::now(),
        );

        let mut tx = store.begin().await.unwrap();
        store.insert_account(&mut tx, &other).await.unwrap();
        let err = store.insert_auth_method(&mut tx, &clash).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_second_method_for_account_is_conflict() {
        let store = MemoryStore::new();
        let (account, _) = seeded(&store).await;
        let second = AuthMethod::new(
            account.account_id,
            Provider::Google,
            "google-sub".to_string(),
            true,
            Utc::now(),
        );

        let mut tx = store.begin().await.unwrap();
        let err = store.insert_auth_method(&mut tx, &second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_second_unconsumed_code_is_conflict() {
        let store = MemoryStore::new();
        let (_, method) = seeded(&store).await;
        let now = Utc::now();
        let first = VerificationCode::new(method.auth_method_id, "h1".into(), now, now + Duration::minutes(5));
        let second = VerificationCode::new(method.auth_method_id, "h2".into(), now, now + Duration::minutes(5));

        let mut tx = store.begin().await.unwrap();
        store.insert_code(&mut tx, &first).await.unwrap();
        let err = store.insert_code(&mut tx, &second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.delete_unconsumed_codes(&mut tx, method.auth_method_id).await.unwrap(), 1);
        store.insert_code(&mut tx, &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_unrevoked_token_is_conflict() {
        let store = MemoryStore::new();
        let (account, _) = seeded(&store).await;
        let now = Utc::now();
        let meta = ClientMeta::default();
        let first = RefreshToken::new(account.account_id, "t1".into(), &meta, now, now + Duration::days(7));
        let second = RefreshToken::new(account.account_id, "t2".into(), &meta, now, now + Duration::days(7));

        let mut tx = store.begin().await.unwrap();
        store.insert_refresh_token(&mut tx, &first).await.unwrap();
        let err = store.insert_refresh_token(&mut tx, &second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.revoke_account_tokens(&mut tx, account.account_id, now).await.unwrap(), 1);
        store.insert_refresh_token(&mut tx, &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_point_fires_once() {
        let store = MemoryStore::new();
        store.fail_once(FailPoint::Begin);

        assert!(matches!(store.begin().await, Err(StoreError::Backend(_))));
        assert!(store.begin().await.is_ok());
    }
}
