//! PostgreSQL store.
//!
//! Uses sqlx runtime queries inside an explicit transaction. Timestamps are
//! bound from the engine clock instead of `NOW()` so both adapters agree on
//! what "active" means.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    AccountRepository, AuthMethodRepository, RefreshTokenRepository, StoreError,
    TransactionCoordinator, VerificationCodeRepository,
};
use crate::models::{Account, AccountStatus, AuthMethod, Provider, RefreshToken, VerificationCode};

/// PostgreSQL-backed identity store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn map_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => StoreError::Conflict(
            db_err.constraint().unwrap_or(context).to_string(),
        ),
        _ => StoreError::Backend(anyhow::Error::new(err).context(context)),
    }
}

fn decode_err(what: &'static str) -> impl FnOnce(String) -> StoreError {
    move |msg| StoreError::Backend(anyhow::anyhow!("Invalid {} row: {}", what, msg))
}

#[derive(FromRow)]
struct AccountRow {
    account_id: Uuid,
    role_code: String,
    status_code: String,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            account_id: row.account_id,
            role: row.role_code.parse().map_err(decode_err("account"))?,
            status: row.status_code.parse().map_err(decode_err("account"))?,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct AuthMethodRow {
    auth_method_id: Uuid,
    account_id: Uuid,
    provider_code: String,
    provider_subject: String,
    verified_flag: bool,
    last_login_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AuthMethodRow> for AuthMethod {
    type Error = StoreError;

    fn try_from(row: AuthMethodRow) -> Result<Self, Self::Error> {
        Ok(AuthMethod {
            auth_method_id: row.auth_method_id,
            account_id: row.account_id,
            provider: row.provider_code.parse().map_err(decode_err("auth method"))?,
            provider_subject: row.provider_subject,
            verified: row.verified_flag,
            last_login_utc: row.last_login_utc,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct VerificationCodeRow {
    code_id: Uuid,
    auth_method_id: Uuid,
    code_hash_text: String,
    attempt_count: i32,
    expiry_utc: DateTime<Utc>,
    consumed_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
}

impl From<VerificationCodeRow> for VerificationCode {
    fn from(row: VerificationCodeRow) -> Self {
        VerificationCode {
            code_id: row.code_id,
            auth_method_id: row.auth_method_id,
            code_hash_text: row.code_hash_text,
            attempt_count: row.attempt_count,
            expiry_utc: row.expiry_utc,
            consumed_utc: row.consumed_utc,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct RefreshTokenRow {
    token_id: Uuid,
    account_id: Uuid,
    token_hash_text: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    revoked_utc: Option<DateTime<Utc>>,
    expiry_utc: DateTime<Utc>,
    created_utc: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshToken {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshToken {
            token_id: row.token_id,
            account_id: row.account_id,
            token_hash_text: row.token_hash_text,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            revoked_utc: row.revoked_utc,
            expiry_utc: row.expiry_utc,
            created_utc: row.created_utc,
        }
    }
}

#[async_trait]
impl TransactionCoordinator for PgStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.pool.begin().await.map_err(map_err("begin transaction"))
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit().await.map_err(map_err("commit transaction"))
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.rollback().await.map_err(map_err("rollback transaction"))
    }
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn insert_account(&self, tx: &mut Self::Tx, account: &Account) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO accounts (account_id, role_code, status_code, created_utc)
            VALUES ($1, $2, $3, $4)
        "#;
        sqlx::query(query)
            .bind(account.account_id)
            .bind(account.role.as_str())
            .bind(account.status.as_str())
            .bind(account.created_utc)
            .execute(&mut **tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(map_err("insert account"))?;
        Ok(())
    }

    async fn find_account(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
    ) -> Result<Option<Account>, StoreError> {
        let query = "SELECT account_id, role_code, status_code, created_utc FROM accounts WHERE account_id = $1";
        let row = sqlx::query_as::<_, AccountRow>(query)
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(map_err("find account"))?;
        row.map(Account::try_from).transpose()
    }

    async fn update_account_status(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, StoreError> {
        let query = "UPDATE accounts SET status_code = $2 WHERE account_id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(status.as_str())
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_err("update account status"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuthMethodRepository for PgStore {
    async fn insert_auth_method(
        &self,
        tx: &mut Self::Tx,
        method: &AuthMethod,
    ) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO auth_methods
                (auth_method_id, account_id, provider_code, provider_subject,
                 verified_flag, last_login_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#;
        sqlx::query(query)
            .bind(method.auth_method_id)
            .bind(method.account_id)
            .bind(method.provider.as_str())
            .bind(&method.provider_subject)
            .bind(method.verified)
            .bind(method.last_login_utc)
            .bind(method.created_utc)
            .execute(&mut **tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(map_err("insert auth method"))?;
        Ok(())
    }

    async fn find_auth_method_by_provider(
        &self,
        tx: &mut Self::Tx,
        provider: Provider,
        provider_subject: &str,
    ) -> Result<Option<AuthMethod>, StoreError> {
        let query = r#"
            SELECT auth_method_id, account_id, provider_code, provider_subject,
                   verified_flag, last_login_utc, created_utc
            FROM auth_methods
            WHERE provider_code = $1 AND provider_subject = $2
        "#;
        let row = sqlx::query_as::<_, AuthMethodRow>(query)
            .bind(provider.as_str())
            .bind(provider_subject)
            .fetch_optional(&mut **tx)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(map_err("find auth method by provider"))?;
        row.map(AuthMethod::try_from).transpose()
    }

    async fn find_auth_method_by_account(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
    ) -> Result<Option<AuthMethod>, StoreError> {
        let query = r#"
            SELECT auth_method_id, account_id, provider_code, provider_subject,
                   verified_flag, last_login_utc, created_utc
            FROM auth_methods
            WHERE account_id = $1
        "#;
        let row = sqlx::query_as::<_, AuthMethodRow>(query)
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(map_err("find auth method by account"))?;
        row.map(AuthMethod::try_from).transpose()
    }

    async fn mark_auth_method_verified(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
    ) -> Result<bool, StoreError> {
        let query = "UPDATE auth_methods SET verified_flag = TRUE WHERE auth_method_id = $1";
        let result = sqlx::query(query)
            .bind(auth_method_id)
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_err("mark auth method verified"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_auth_method_login(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = "UPDATE auth_methods SET last_login_utc = $2 WHERE auth_method_id = $1";
        let result = sqlx::query(query)
            .bind(auth_method_id)
            .bind(at)
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_err("record auth method login"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl VerificationCodeRepository for PgStore {
    async fn delete_unconsumed_codes(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
    ) -> Result<u64, StoreError> {
        let query =
            "DELETE FROM verification_codes WHERE auth_method_id = $1 AND consumed_utc IS NULL";
        let result = sqlx::query(query)
            .bind(auth_method_id)
            .execute(&mut **tx)
            .instrument(db_span("DELETE", query))
            .await
            .map_err(map_err("delete unconsumed codes"))?;
        Ok(result.rows_affected())
    }

    async fn insert_code(&self, tx: &mut Self::Tx, code: &VerificationCode) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO verification_codes
                (code_id, auth_method_id, code_hash_text, attempt_count,
                 expiry_utc, consumed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#;
        sqlx::query(query)
            .bind(code.code_id)
            .bind(code.auth_method_id)
            .bind(&code.code_hash_text)
            .bind(code.attempt_count)
            .bind(code.expiry_utc)
            .bind(code.consumed_utc)
            .bind(code.created_utc)
            .execute(&mut **tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(map_err("insert verification code"))?;
        Ok(())
    }

    async fn find_active_code(
        &self,
        tx: &mut Self::Tx,
        auth_method_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationCode>, StoreError> {
        // FOR UPDATE serialises concurrent validations of the same code.
        let query = r#"
            SELECT code_id, auth_method_id, code_hash_text, attempt_count,
                   expiry_utc, consumed_utc, created_utc
            FROM verification_codes
            WHERE auth_method_id = $1 AND consumed_utc IS NULL AND expiry_utc > $2
            FOR UPDATE
        "#;
        let row = sqlx::query_as::<_, VerificationCodeRow>(query)
            .bind(auth_method_id)
            .bind(now)
            .fetch_optional(&mut **tx)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(map_err("find active code"))?;
        Ok(row.map(VerificationCode::from))
    }

    async fn increment_code_attempts(
        &self,
        tx: &mut Self::Tx,
        code_id: Uuid,
    ) -> Result<i32, StoreError> {
        let query = r#"
            UPDATE verification_codes SET attempt_count = attempt_count + 1
            WHERE code_id = $1
            RETURNING attempt_count
        "#;
        let attempts: Option<i32> = sqlx::query_scalar(query)
            .bind(code_id)
            .fetch_optional(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_err("increment code attempts"))?;
        attempts.ok_or(StoreError::NotFound("Verification code"))
    }

    async fn consume_code(
        &self,
        tx: &mut Self::Tx,
        code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = r#"
            UPDATE verification_codes SET consumed_utc = $2
            WHERE code_id = $1 AND consumed_utc IS NULL
        "#;
        let result = sqlx::query(query)
            .bind(code_id)
            .bind(at)
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_err("consume code"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RefreshTokenRepository for PgStore {
    async fn revoke_account_tokens(
        &self,
        tx: &mut Self::Tx,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let query = r#"
            UPDATE refresh_tokens SET revoked_utc = $2
            WHERE account_id = $1 AND revoked_utc IS NULL
        "#;
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(at)
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_err("revoke account tokens"))?;
        Ok(result.rows_affected())
    }

    async fn insert_refresh_token(
        &self,
        tx: &mut Self::Tx,
        token: &RefreshToken,
    ) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO refresh_tokens
                (token_id, account_id, token_hash_text, ip_address, user_agent,
                 revoked_utc, expiry_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;
        sqlx::query(query)
            .bind(token.token_id)
            .bind(token.account_id)
            .bind(&token.token_hash_text)
            .bind(&token.ip_address)
            .bind(&token.user_agent)
            .bind(token.revoked_utc)
            .bind(token.expiry_utc)
            .bind(token.created_utc)
            .execute(&mut **tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(map_err("insert refresh token"))?;
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        tx: &mut Self::Tx,
        token_hash_text: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let query = r#"
            SELECT token_id, account_id, token_hash_text, ip_address, user_agent,
                   revoked_utc, expiry_utc, created_utc
            FROM refresh_tokens
            WHERE token_hash_text = $1
        "#;
        let row = sqlx::query_as::<_, RefreshTokenRow>(query)
            .bind(token_hash_text)
            .fetch_optional(&mut **tx)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(map_err("find refresh token"))?;
        Ok(row.map(RefreshToken::from))
    }

    async fn revoke_refresh_token(
        &self,
        tx: &mut Self::Tx,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = r#"
            UPDATE refresh_tokens SET revoked_utc = $2
            WHERE token_id = $1 AND revoked_utc IS NULL
        "#;
        let result = sqlx::query(query)
            .bind(token_id)
            .bind(at)
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_err("revoke refresh token"))?;
        Ok(result.rows_affected() > 0)
    }
}
