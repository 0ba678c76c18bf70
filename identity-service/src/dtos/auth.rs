use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{AccountSummary, Provider};
use crate::services::{LoginSession, Registration, TokenResponse, Verification};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "EMAIL")]
    pub provider: Provider,

    #[validate(length(min = 1, max = 320, message = "External id is required"))]
    #[schema(example = "user@example.com")]
    pub external_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub account: AccountSummary,
    #[schema(example = true)]
    pub verification_required: bool,
    /// Seconds until the verification code expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 300)]
    pub code_expires_in: Option<i64>,
}

impl From<Registration> for RegisterResponse {
    fn from(registration: Registration) -> Self {
        Self {
            account: registration.account,
            verification_required: registration.verification_required,
            code_expires_in: registration.code_expires_in,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyCodeRequest {
    #[schema(example = "EMAIL")]
    pub provider: Provider,

    #[validate(length(min = 1, max = 320, message = "External id is required"))]
    #[schema(example = "user@example.com")]
    pub external_id: String,

    #[validate(length(min = 1, max = 32, message = "Code is required"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub account: AccountSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenResponse>,
}

impl From<Verification> for VerifyResponse {
    fn from(verification: Verification) -> Self {
        Self {
            account: verification.account,
            tokens: verification.tokens,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginCodeRequest {
    #[schema(example = "EMAIL")]
    pub provider: Provider,

    #[validate(length(min = 1, max = 320, message = "External id is required"))]
    #[schema(example = "user@example.com")]
    pub external_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginCodeResponse {
    #[schema(example = 300)]
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "EMAIL")]
    pub provider: Provider,

    #[validate(length(min = 1, max = 320, message = "External id is required"))]
    #[schema(example = "user@example.com")]
    pub external_id: String,

    #[validate(length(min = 1, max = 32, message = "Code is required"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ProviderLoginRequest {
    #[schema(example = "GOOGLE")]
    pub provider: Provider,

    /// Signed ID token issued by the provider. Missing or empty
    /// assertions are rejected as invalid credentials.
    #[serde(default)]
    #[validate(length(max = 8192, message = "Assertion is too long"))]
    #[schema(example = "eyJhbGciOiJSUzI1NiIsImtpZCI6IjEifQ...")]
    pub assertion: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub account: AccountSummary,
    pub tokens: TokenResponse,
}

impl From<LoginSession> for LoginResponse {
    fn from(session: LoginSession) -> Self {
        Self {
            account: session.account,
            tokens: session.tokens,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "refresh-token-123")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "refresh-token-123")]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GlobalLogoutResponse {
    #[schema(example = 1)]
    pub revoked: u64,
}
