//! Refresh, logout and account status tests.

mod common;

use chrono::Duration;
use common::TestIdentity;
use identity_service::{
    models::{Account, AccountStatus, Role},
    services::{Clock, IdentityError, IdentityEvent, JwtService, TokenIssuer},
};

#[tokio::test]
async fn refresh_mints_access_token_without_rotating_the_session() {
    // Arrange
    let t = TestIdentity::new();
    let account = t.active_account("pia@example.com").await;
    let session = t.login("pia@example.com").await;
    let rows_before = t.store.refresh_tokens().await.len();

    // Act
    let refreshed = t
        .identity
        .refresh_access(&t.ctx(), &session.tokens.refresh_token)
        .await
        .expect("refresh should succeed");

    // Assert
    assert_eq!(refreshed.refresh_token, session.tokens.refresh_token);
    assert_eq!(t.store.refresh_tokens().await.len(), rows_before);

    let claims = t.identity.authenticate(&refreshed.access_token).unwrap();
    assert_eq!(claims.account_id().unwrap(), account.account_id);
    assert_eq!(claims.status, AccountStatus::Active);
}

#[tokio::test]
async fn refresh_rejects_unknown_and_expired_tokens() {
    let t = TestIdentity::new();
    t.active_account("quin@example.com").await;
    let session = t.login("quin@example.com").await;

    let unknown = t
        .identity
        .refresh_access(&t.ctx(), "not-a-refresh-token")
        .await
        .unwrap_err();
    assert!(matches!(unknown, IdentityError::InvalidToken));

    t.clock.advance(Duration::days(7));
    let expired = t
        .identity
        .refresh_access(&t.ctx(), &session.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(expired, IdentityError::InvalidToken));
}

#[tokio::test]
async fn logout_revokes_exactly_that_session() {
    let t = TestIdentity::new();
    t.active_account("rae@example.com").await;
    let session = t.login("rae@example.com").await;
    t.events.clear();

    t.identity
        .logout(&t.ctx(), &session.tokens.refresh_token)
        .await
        .expect("logout should succeed");

    let again = t
        .identity
        .logout(&t.ctx(), &session.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(again, IdentityError::InvalidToken));

    let refresh = t
        .identity
        .refresh_access(&t.ctx(), &session.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(refresh, IdentityError::InvalidToken));

    let events = t.events.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        IdentityEvent::SessionRevoked {
            token_id: Some(_),
            revoked_count: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn global_logout_reports_revoked_count() {
    let t = TestIdentity::new();
    let account = t.active_account("sam@example.com").await;
    t.login("sam@example.com").await;
    t.events.clear();

    let revoked = t
        .identity
        .global_logout(&t.ctx(), account.account_id)
        .await
        .unwrap();
    assert_eq!(revoked, 1);

    let again = t
        .identity
        .global_logout(&t.ctx(), account.account_id)
        .await
        .unwrap();
    assert_eq!(again, 0);

    let now = t.clock.now();
    assert!(t.store.refresh_tokens().await.iter().all(|tok| !tok.is_active(now)));
    assert_eq!(t.events.names(), vec!["session.revoked"]);
}

#[tokio::test]
async fn banning_an_account_ends_its_sessions() {
    let t = TestIdentity::new();
    let account = t.active_account("tia@example.com").await;
    let session = t.login("tia@example.com").await;
    t.events.clear();

    let summary = t
        .identity
        .change_account_status(&t.ctx(), account.account_id, AccountStatus::Banned)
        .await
        .expect("ban should succeed");
    assert_eq!(summary.status, AccountStatus::Banned);

    let refresh = t
        .identity
        .refresh_access(&t.ctx(), &session.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(refresh, IdentityError::InvalidToken));

    let events = t.events.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        IdentityEvent::AccountStatusChanged {
            from: AccountStatus::Active,
            to: AccountStatus::Banned,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        IdentityEvent::SessionRevoked {
            token_id: None,
            revoked_count: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn disallowed_status_transitions_are_rejected() {
    let t = TestIdentity::new();
    let account = t.active_account("uma@example.com").await;

    let back = t
        .identity
        .change_account_status(&t.ctx(), account.account_id, AccountStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(back, IdentityError::InvalidAccountState(_)));

    t.identity
        .change_account_status(&t.ctx(), account.account_id, AccountStatus::Deleted)
        .await
        .unwrap();
    let revive = t
        .identity
        .change_account_status(&t.ctx(), account.account_id, AccountStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(revive, IdentityError::InvalidAccountState(_)));

    assert_eq!(t.store.accounts().await[0].status, AccountStatus::Deleted);
}

#[tokio::test]
async fn status_change_for_unknown_account_is_not_found() {
    let t = TestIdentity::new();

    let err = t
        .identity
        .change_account_status(&t.ctx(), uuid::Uuid::new_v4(), AccountStatus::Banned)
        .await
        .unwrap_err();

    assert!(matches!(err, IdentityError::AccountNotFound));
}

#[tokio::test]
async fn authenticate_rejects_foreign_and_malformed_tokens() {
    let t = TestIdentity::new();
    let foreign = JwtService::from_secret("other-secret", common::TEST_ISSUER, 15, 7);
    let account = Account::new(Role::User, AccountStatus::Active, chrono::Utc::now());
    let token = foreign.issue_access_token(&account, chrono::Utc::now()).unwrap();

    assert!(matches!(
        t.identity.authenticate(&token),
        Err(IdentityError::InvalidToken)
    ));
    assert!(matches!(
        t.identity.authenticate("garbage"),
        Err(IdentityError::InvalidToken)
    ));

    let own = t.access_token_for(&account);
    assert_eq!(t.identity.authenticate(&own).unwrap().role, Role::User);
}
