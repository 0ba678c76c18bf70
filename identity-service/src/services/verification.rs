//! Verification code engine.
//!
//! A method has at most one active code. Issuing deletes whatever
//! unconsumed codes remain, so an old code stops working the moment a new
//! one exists. Validation is attempt-limited: once a code has collected
//! `max_attempts` failed comparisons it is locked until superseded.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::clock::Clock;
use super::credentials::{CodeGenerator, CredentialHasher};
use super::error::ServiceError;
use crate::models::VerificationCode;
use crate::store::VerificationCodeRepository;

/// A freshly issued code. The plaintext exists only here.
#[derive(Clone)]
pub struct IssuedCode {
    pub code_id: Uuid,
    pub plaintext: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCode")
            .field("code_id", &self.code_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct VerificationCodeEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn CredentialHasher>,
    generator: Arc<dyn CodeGenerator>,
    max_attempts: i32,
}

impl<S: VerificationCodeRepository> VerificationCodeEngine<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn CredentialHasher>,
        generator: Arc<dyn CodeGenerator>,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            clock,
            hasher,
            generator,
            max_attempts,
        }
    }

    pub async fn issue(
        &self,
        tx: &mut S::Tx,
        auth_method_id: Uuid,
        ttl: Duration,
    ) -> Result<IssuedCode, ServiceError> {
        let now = self.clock.now();

        let superseded = self.store.delete_unconsumed_codes(tx, auth_method_id).await?;
        if superseded > 0 {
            tracing::debug!(auth_method_id = %auth_method_id, superseded, "Superseded unconsumed codes");
        }

        let plaintext = self.generator.generate();
        let code = VerificationCode::new(
            auth_method_id,
            self.hasher.hash(&plaintext),
            now,
            now + ttl,
        );
        self.store.insert_code(tx, &code).await?;

        Ok(IssuedCode {
            code_id: code.code_id,
            plaintext,
            expires_at: code.expiry_utc,
        })
    }

    /// Check `plaintext` against the active code and consume it on a match.
    ///
    /// A mismatch increments the attempt counter and fails with
    /// `InvalidCode`; the caller must commit that increment.
    pub async fn validate(
        &self,
        tx: &mut S::Tx,
        auth_method_id: Uuid,
        plaintext: &str,
    ) -> Result<VerificationCode, ServiceError> {
        let now = self.clock.now();

        let mut code = self
            .store
            .find_active_code(tx, auth_method_id, now)
            .await?
            .ok_or(ServiceError::CodeExpired)?;

        if code.attempt_count >= self.max_attempts {
            tracing::warn!(auth_method_id = %auth_method_id, "Verification code locked after too many attempts");
            return Err(ServiceError::AttemptsExceeded);
        }

        if !self.hasher.verify(plaintext, &code.code_hash_text) {
            let attempts = self.store.increment_code_attempts(tx, code.code_id).await?;
            tracing::info!(auth_method_id = %auth_method_id, attempts, "Verification code mismatch");
            return Err(ServiceError::InvalidCode);
        }

        if !self.store.consume_code(tx, code.code_id, now).await? {
            return Err(ServiceError::CodeExpired);
        }

        code.consumed_utc = Some(now);
        Ok(code)
    }

    pub async fn active(
        &self,
        tx: &mut S::Tx,
        auth_method_id: Uuid,
    ) -> Result<Option<VerificationCode>, ServiceError> {
        Ok(self
            .store
            .find_active_code(tx, auth_method_id, self.clock.now())
            .await?)
    }
}
