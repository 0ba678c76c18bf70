use axum::{extract::Request, middleware::Next, response::Response};
use service_core::error::AppError;

use crate::{models::Role, services::AccessTokenClaims};

/// Runs after `auth_middleware`; only ADMIN callers pass.
pub async fn admin_auth_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    match request.extensions().get::<AccessTokenClaims>() {
        Some(claims) if claims.role == Role::Admin => Ok(next.run(request).await),
        Some(claims) => {
            tracing::warn!(account_id = %claims.sub, "Non-admin caller on admin route");
            Err(AppError::Forbidden(anyhow::anyhow!("Admin role required")))
        }
        None => Err(AppError::Unauthorized(anyhow::anyhow!(
            "Missing or invalid Authorization header"
        ))),
    }
}
