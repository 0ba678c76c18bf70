use service_core::error::AppError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by the engine components.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid code")]
    InvalidCode,

    #[error("Code expired or missing")]
    CodeExpired,

    #[error("Too many attempts")]
    AttemptsExceeded,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid account state: {0}")]
    InvalidAccountState(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Failures whose side effects must still be committed.
    ///
    /// A wrong code counts against the attempt limit even though the
    /// flow fails.
    pub fn keeps_state(&self) -> bool {
        matches!(self, ServiceError::InvalidCode)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Conflict(constraint) => ServiceError::Conflict(constraint),
            StoreError::Backend(e) => ServiceError::Internal(e),
        }
    }
}

/// Errors returned by the identity flows.
///
/// Code failures are coarse: callers cannot tell a wrong code
/// from an expired, consumed or locked one.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Account not found")]
    AccountNotFound,

    #[error("Account already exists")]
    AccountAlreadyExists,

    #[error("Conflicting concurrent update")]
    Conflict,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired code")]
    InvalidOrExpiredCode,

    #[error("Invalid account state: {0}")]
    InvalidAccountState(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl From<ServiceError> for IdentityError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => IdentityError::AccountNotFound,
            ServiceError::Conflict(_) => IdentityError::Conflict,
            ServiceError::InvalidCode
            | ServiceError::CodeExpired
            | ServiceError::AttemptsExceeded => IdentityError::InvalidOrExpiredCode,
            ServiceError::InvalidCredentials => IdentityError::InvalidCredentials,
            ServiceError::InvalidAccountState(s) => IdentityError::InvalidAccountState(s),
            ServiceError::InvalidToken => IdentityError::InvalidToken,
            ServiceError::Validation(s) => IdentityError::InvalidInput(s),
            ServiceError::DeadlineExceeded => IdentityError::DeadlineExceeded,
            ServiceError::Internal(e) => IdentityError::Internal(e),
        }
    }
}

impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::AccountNotFound => AppError::NotFound(anyhow::anyhow!("Account not found")),
            IdentityError::AccountAlreadyExists => {
                AppError::Conflict(anyhow::anyhow!("Account already exists"))
            }
            IdentityError::Conflict => {
                AppError::Conflict(anyhow::anyhow!("Request conflicted with a concurrent update"))
            }
            IdentityError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            IdentityError::InvalidOrExpiredCode => {
                AppError::AuthError(anyhow::anyhow!("Invalid or expired code"))
            }
            IdentityError::InvalidToken => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            IdentityError::InvalidAccountState(_) => {
                AppError::Forbidden(anyhow::anyhow!("Account is not in a valid state for this operation"))
            }
            IdentityError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            IdentityError::DeadlineExceeded => AppError::ServiceUnavailable,
            IdentityError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_code_failures_are_indistinguishable() {
        for err in [
            ServiceError::InvalidCode,
            ServiceError::CodeExpired,
            ServiceError::AttemptsExceeded,
        ] {
            assert!(matches!(
                IdentityError::from(err),
                IdentityError::InvalidOrExpiredCode
            ));
        }
    }

    #[test]
    fn test_only_invalid_code_keeps_state() {
        assert!(ServiceError::InvalidCode.keeps_state());
        assert!(!ServiceError::CodeExpired.keeps_state());
        assert!(!ServiceError::AttemptsExceeded.keeps_state());
        assert!(!ServiceError::InvalidCredentials.keeps_state());
    }

    #[test]
    fn test_store_backend_detail_becomes_internal() {
        let err: IdentityError = StoreError::Backend(anyhow::anyhow!("connection reset")).into();
        assert!(matches!(err, IdentityError::Internal(_)));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (IdentityError::AccountNotFound, StatusCode::NOT_FOUND),
            (IdentityError::AccountAlreadyExists, StatusCode::CONFLICT),
            (IdentityError::Conflict, StatusCode::CONFLICT),
            (IdentityError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (IdentityError::InvalidOrExpiredCode, StatusCode::UNAUTHORIZED),
            (IdentityError::InvalidToken, StatusCode::UNAUTHORIZED),
            (
                IdentityError::InvalidAccountState("BANNED".into()),
                StatusCode::FORBIDDEN,
            ),
            (IdentityError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (IdentityError::DeadlineExceeded, StatusCode::SERVICE_UNAVAILABLE),
            (
                IdentityError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }
}
