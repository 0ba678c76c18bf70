//! Services layer for identity-service.
//!
//! Engine components, the identity orchestrator and the ports they call
//! besides the store.

mod accounts;
mod auth_methods;
pub mod clock;
mod context;
mod credentials;
pub mod error;
pub mod events;
mod identity;
mod jwt;
mod providers;
mod sessions;
mod verification;

pub use accounts::AccountLifecycle;
pub use auth_methods::{normalize_external_id, AuthMethodBinding};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::RequestContext;
pub use credentials::{CodeGenerator, CredentialHasher, HmacCredentialHasher, NumericCodeGenerator};
pub use error::{IdentityError, ServiceError};
pub use events::{
    DeliveredCode, EventPublisher, IdentityEvent, TracingEventPublisher, WebhookEventPublisher,
};
pub use identity::{
    IdentityDeps, IdentityService, IdentitySettings, LoginCodeIssued, LoginSession, Registration,
    Verification,
};
pub use jwt::{AccessTokenClaims, JwtService, TokenIssuer, TokenResponse};
pub use providers::{IdTokenVerifier, ProviderVerifier, GOOGLE_ISSUERS, GOOGLE_JWKS_URL};
pub use sessions::{SessionManager, StartedSession};
pub use verification::{IssuedCode, VerificationCodeEngine};
