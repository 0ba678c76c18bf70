//! End-to-end flows against PostgreSQL.
//!
//! Run with `DATABASE_URL` pointing at a scratch database.

mod common;

use common::{
    google_id_token, test_provider_verifier, RecordingPublisher, SequentialCodes, TEST_ISSUER,
};
use identity_service::{
    config::DatabaseConfig,
    db,
    models::{AccountStatus, Provider},
    services::{
        HmacCredentialHasher, IdentityDeps, IdentityError, IdentityService, IdentitySettings,
        JwtService, RequestContext, SystemClock,
    },
    store::PgStore,
};
use sqlx::PgPool;
use std::sync::Arc;

async fn pg_identity() -> (IdentityService<PgStore>, Arc<RecordingPublisher>) {
    let (identity, events, _) = pg_identity_with_pool().await;
    (identity, events)
}

async fn pg_identity_with_pool() -> (IdentityService<PgStore>, Arc<RecordingPublisher>, PgPool) {
    let config = DatabaseConfig {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        max_connections: 5,
        min_connections: 1,
    };
    let pool = db::create_pool(&config).await.expect("Failed to connect");
    db::run_migrations(&pool).await.expect("Failed to migrate");

    let events = Arc::new(RecordingPublisher::default());
    let deps = IdentityDeps {
        clock: Arc::new(SystemClock),
        hasher: Arc::new(HmacCredentialHasher::new("test-pepper").unwrap()),
        code_generator: Arc::new(SequentialCodes::default()),
        tokens: Arc::new(JwtService::from_secret("test-jwt-secret", TEST_ISSUER, 15, 7)),
        events: events.clone(),
        providers: Arc::new(test_provider_verifier()),
    };
    (
        IdentityService::new(PgStore::new(pool.clone()), deps, IdentitySettings::default()),
        events,
        pool,
    )
}

/// A racing unit of work either wins or is refused by a unique index.
fn assert_won_or_conflicted<T>(results: &[Result<T, IdentityError>]) {
    assert!(results.iter().any(|r| r.is_ok()), "at least one call should win");
    for result in results {
        if let Err(err) = result {
            assert!(
                matches!(err, IdentityError::Conflict),
                "losing call should be a conflict, got {:?}",
                err
            );
        }
    }
}

fn unique_email() -> String {
    format!("pg-{}@example.com", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn register_verify_login_round_trip() {
    let (identity, events) = pg_identity().await;
    let ctx = RequestContext::default();
    let email = unique_email();

    identity
        .register(&ctx, Provider::Email, &email)
        .await
        .expect("registration should succeed");
    let code = events.last_code_for(&email).unwrap();

    let wrong = identity
        .verify_code(&ctx, Provider::Email, &email, "000000")
        .await
        .unwrap_err();
    assert!(matches!(wrong, IdentityError::InvalidOrExpiredCode));

    let verified = identity
        .verify_code(&ctx, Provider::Email, &email, &code)
        .await
        .expect("verification should succeed");
    assert_eq!(verified.account.status, AccountStatus::Active);

    identity
        .request_login_code(&ctx, Provider::Email, &email)
        .await
        .unwrap();
    let session = identity
        .complete_login(&ctx, Provider::Email, &email, &events.last_code_for(&email).unwrap())
        .await
        .expect("login should succeed");

    let stale = identity
        .refresh_access(&ctx, &verified.tokens.unwrap().refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(stale, IdentityError::InvalidToken));

    identity
        .logout(&ctx, &session.tokens.refresh_token)
        .await
        .expect("logout should succeed");
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn duplicate_registration_hits_the_unique_constraint() {
    let (identity, _) = pg_identity().await;
    let ctx = RequestContext::default();
    let email = unique_email();

    identity.register(&ctx, Provider::Email, &email).await.unwrap();
    let err = identity
        .register(&ctx, Provider::Email, &email)
        .await
        .unwrap_err();

    assert!(matches!(err, IdentityError::AccountAlreadyExists));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires running PostgreSQL
async fn concurrent_code_requests_leave_one_active_code() {
    // Arrange
    let (identity, events, pool) = pg_identity_with_pool().await;
    let ctx = RequestContext::default();
    let email = unique_email();
    identity.register(&ctx, Provider::Email, &email).await.unwrap();
    let code = events.last_code_for(&email).unwrap();
    identity
        .verify_code(&ctx, Provider::Email, &email, &code)
        .await
        .unwrap();

    // Act
    let mut handles = Vec::new();
    for _ in 0..8 {
        let identity = identity.clone();
        let email = email.clone();
        handles.push(tokio::spawn(async move {
            identity
                .request_login_code(&RequestContext::default(), Provider::Email, &email)
                .await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // Assert
    assert_won_or_conflicted(&results);
    let active: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM verification_codes c
        JOIN auth_methods m ON m.auth_method_id = c.auth_method_id
        WHERE m.provider_subject = $1
          AND c.consumed_utc IS NULL
          AND c.expiry_utc > NOW()
        "#,
    )
    .bind(&email)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires running PostgreSQL
async fn concurrent_logins_leave_one_active_session() {
    // Arrange
    let (identity, _, pool) = pg_identity_with_pool().await;
    let ctx = RequestContext::default();
    let subject = format!("pg-google-{}", uuid::Uuid::new_v4());
    let first = identity
        .complete_provider_login(&ctx, Provider::Google, &google_id_token(&subject))
        .await
        .expect("first login should register the subject");

    // Act
    let mut handles = Vec::new();
    for _ in 0..8 {
        let identity = identity.clone();
        let assertion = google_id_token(&subject);
        handles.push(tokio::spawn(async move {
            identity
                .complete_provider_login(&RequestContext::default(), Provider::Google, &assertion)
                .await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // Assert
    assert_won_or_conflicted(&results);
    let active: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM refresh_tokens
        WHERE account_id = $1 AND revoked_utc IS NULL AND expiry_utc > NOW()
        "#,
    )
    .bind(first.account.account_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active, 1);
}
