//! Test helpers for identity-service integration tests.
//!
//! Wires the identity engine to the in-memory store, a manual clock, a
//! predictable code generator and an event recorder.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use identity_service::{
    build_router,
    models::{Account, AccountSummary, Provider},
    services::{
        CodeGenerator, EventPublisher, HmacCredentialHasher, IdTokenVerifier, IdentityDeps,
        IdentityEvent, IdentityService, IdentitySettings, JwtService, LoginSession, ManualClock,
        RequestContext, TokenIssuer, GOOGLE_ISSUERS,
    },
    store::MemoryStore,
    AppState,
};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_ISSUER: &str = "identity-service-test";
pub const GOOGLE_TEST_KEY: &[u8] = b"google-test-signing-key";
pub const GOOGLE_TEST_CLIENT_ID: &str = "identity-test-client";

/// Verifier that accepts Google ID tokens signed with [`GOOGLE_TEST_KEY`].
pub fn test_provider_verifier() -> IdTokenVerifier {
    IdTokenVerifier::new()
        .expect("verifier should build")
        .with_static_key(
            Provider::Google,
            Algorithm::HS256,
            DecodingKey::from_secret(GOOGLE_TEST_KEY),
            &GOOGLE_ISSUERS,
            GOOGLE_TEST_CLIENT_ID,
        )
}

/// Google ID token for `subject`, signed with `key`.
pub fn google_id_token_signed_with(subject: &str, key: &[u8]) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "sub": subject,
        "iss": GOOGLE_ISSUERS[0],
        "aud": GOOGLE_TEST_CLIENT_ID,
        "iat": now,
        "exp": now + 600,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(key),
    )
    .expect("id token should sign")
}

/// Valid Google ID token for `subject`.
pub fn google_id_token(subject: &str) -> String {
    google_id_token_signed_with(subject, GOOGLE_TEST_KEY)
}

/// Hands out 100001, 100002, ... so every code is distinct.
#[derive(Default)]
pub struct SequentialCodes {
    next: AtomicU32,
}

impl CodeGenerator for SequentialCodes {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{:06}", 100_000 + n)
    }
}

/// Keeps every published event. Can be switched to fail after recording.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<IdentityEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn fail_publishing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<IdentityEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Plaintext of the most recent code delivered to `destination`.
    pub fn last_code_for(&self, destination: &str) -> Option<String> {
        self.events()
            .iter()
            .rev()
            .find_map(|event| match event {
                IdentityEvent::VerificationCodeIssued {
                    destination: d,
                    code,
                    ..
                } if d == destination => Some(code.as_str().to_string()),
                _ => None,
            })
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &IdentityEvent) -> Result<(), anyhow::Error> {
        self.events.lock().unwrap().push(event.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("event sink unavailable"));
        }
        Ok(())
    }
}

pub struct TestIdentity {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingPublisher>,
    pub jwt: Arc<JwtService>,
    pub identity: IdentityService<MemoryStore>,
}

impl TestIdentity {
    pub fn new() -> Self {
        Self::with_settings(IdentitySettings::default())
    }

    pub fn with_settings(settings: IdentitySettings) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let events = Arc::new(RecordingPublisher::default());
        let jwt = Arc::new(JwtService::from_secret("test-jwt-secret", TEST_ISSUER, 15, 7));

        let deps = IdentityDeps {
            clock: clock.clone(),
            hasher: Arc::new(HmacCredentialHasher::new("test-pepper").unwrap()),
            code_generator: Arc::new(SequentialCodes::default()),
            tokens: jwt.clone(),
            events: events.clone(),
            providers: Arc::new(test_provider_verifier()),
        };
        let identity = IdentityService::new(store.clone(), deps, settings);

        Self {
            store,
            clock,
            events,
            jwt,
            identity,
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::default()
    }

    pub fn last_code(&self, destination: &str) -> String {
        self.events
            .last_code_for(destination)
            .expect("a code should have been delivered")
    }

    /// Register and verify an email identity.
    pub async fn active_account(&self, email: &str) -> AccountSummary {
        self.identity
            .register(&self.ctx(), Provider::Email, email)
            .await
            .expect("registration should succeed");
        let code = self.last_code(email);
        self.identity
            .verify_code(&self.ctx(), Provider::Email, email, &code)
            .await
            .expect("verification should succeed")
            .account
    }

    /// Request and redeem a login code.
    pub async fn login(&self, email: &str) -> LoginSession {
        self.identity
            .request_login_code(&self.ctx(), Provider::Email, email)
            .await
            .expect("login code should be issued");
        let code = self.last_code(email);
        self.identity
            .complete_login(&self.ctx(), Provider::Email, email, &code)
            .await
            .expect("login should succeed")
    }

    /// Access token for an arbitrary account, signed with the test key.
    pub fn access_token_for(&self, account: &Account) -> String {
        self.jwt
            .issue_access_token(account, chrono::Utc::now())
            .expect("token should sign")
    }

    pub fn router(&self) -> Router {
        self.router_with_limit(100)
    }

    /// Router whose code routes allow `attempts` requests per IP per minute.
    pub fn router_with_limit(&self, attempts: u32) -> Router {
        build_router(AppState {
            identity: self.identity.clone(),
            service_name: "identity-service-test".to_string(),
            service_version: "0.0.0".to_string(),
            request_timeout: Duration::from_secs(5),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            login_rate_limiter: create_ip_rate_limiter(attempts, 60),
        })
    }
}
