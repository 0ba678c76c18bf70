//! Identity orchestrator.
//!
//! Every flow is one unit of work on the store. Events are published only
//! after the unit of work commits, and a publishing failure never undoes
//! committed state.

use std::sync::Arc;

use chrono::Duration;
use futures::future::BoxFuture;
use uuid::Uuid;

use super::accounts::AccountLifecycle;
use super::auth_methods::{normalize_external_id, AuthMethodBinding};
use super::clock::Clock;
use super::context::RequestContext;
use super::credentials::{CodeGenerator, CredentialHasher};
use super::error::{IdentityError, ServiceError};
use super::events::{DeliveredCode, EventPublisher, IdentityEvent};
use super::jwt::{AccessTokenClaims, TokenIssuer, TokenResponse};
use super::providers::ProviderVerifier;
use super::sessions::SessionManager;
use super::verification::{IssuedCode, VerificationCodeEngine};
use crate::models::{Account, AccountStatus, AccountSummary, AuthMethod, Provider, Role};
use crate::store::{run_atomic, IdentityStore, TransactionCoordinator};

/// Tunables of the identity flows.
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub code_ttl: Duration,
    pub max_code_attempts: i32,
    /// Start a session as soon as a registration is verified.
    pub session_on_verify: bool,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            code_ttl: Duration::seconds(300),
            max_code_attempts: 5,
            session_on_verify: true,
        }
    }
}

/// Collaborators injected into the engine.
#[derive(Clone)]
pub struct IdentityDeps {
    pub clock: Arc<dyn Clock>,
    pub hasher: Arc<dyn CredentialHasher>,
    pub code_generator: Arc<dyn CodeGenerator>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub events: Arc<dyn EventPublisher>,
    pub providers: Arc<dyn ProviderVerifier>,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub account: AccountSummary,
    /// True when a code was sent and must be verified before login.
    pub verification_required: bool,
    pub code_expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub account: AccountSummary,
    pub tokens: Option<TokenResponse>,
}

#[derive(Debug, Clone)]
pub struct LoginCodeIssued {
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct LoginSession {
    pub account: AccountSummary,
    pub tokens: TokenResponse,
}

struct Engine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    accounts: AccountLifecycle<S>,
    auth_methods: AuthMethodBinding<S>,
    codes: VerificationCodeEngine<S>,
    sessions: SessionManager<S>,
    tokens: Arc<dyn TokenIssuer>,
    events: Arc<dyn EventPublisher>,
    providers: Arc<dyn ProviderVerifier>,
    settings: IdentitySettings,
}

impl<S: IdentityStore> Engine<S> {
    fn mint_tokens(&self, account: &Account, refresh_secret: String) -> Result<TokenResponse, ServiceError> {
        let access_token = self
            .tokens
            .issue_access_token(account, self.clock.now())
            .map_err(ServiceError::Internal)?;
        Ok(TokenResponse::bearer(
            access_token,
            refresh_secret,
            self.tokens.access_token_expiry_seconds(),
        ))
    }

    fn code_issued_event(&self, account_id: Uuid, method: &AuthMethod, issued: &IssuedCode) -> IdentityEvent {
        IdentityEvent::VerificationCodeIssued {
            account_id,
            auth_method_id: method.auth_method_id,
            provider: method.provider,
            destination: method.provider_subject.clone(),
            code: DeliveredCode::new(issued.plaintext.clone()),
            expires_at: issued.expires_at,
        }
    }

    fn seconds_until(&self, issued: &IssuedCode) -> i64 {
        (issued.expires_at - self.clock.now()).num_seconds().max(0)
    }
}

/// Outcome of a code check inside a unit of work.
///
/// A wrong code is returned as `Ok(Err(..))` so the attempt increment is
/// committed; every other failure aborts the unit of work.
fn code_failure<T>(err: ServiceError) -> Result<Result<T, IdentityError>, IdentityError> {
    if err.keeps_state() {
        Ok(Err(err.into()))
    } else {
        Err(err.into())
    }
}

fn already_exists(err: ServiceError) -> IdentityError {
    match err {
        ServiceError::Conflict(_) => IdentityError::AccountAlreadyExists,
        other => other.into(),
    }
}

fn not_active(account: &Account) -> IdentityError {
    IdentityError::InvalidAccountState(format!("account is {}", account.status.as_str()))
}

/// The identity and session lifecycle engine.
pub struct IdentityService<S> {
    engine: Arc<Engine<S>>,
}

impl<S> Clone for IdentityService<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S: IdentityStore> IdentityService<S> {
    pub fn new(store: S, deps: IdentityDeps, settings: IdentitySettings) -> Self {
        let accounts = AccountLifecycle::new(store.clone(), deps.clock.clone());
        let auth_methods = AuthMethodBinding::new(store.clone(), deps.clock.clone());
        let codes = VerificationCodeEngine::new(
            store.clone(),
            deps.clock.clone(),
            deps.hasher.clone(),
            deps.code_generator.clone(),
            settings.max_code_attempts,
        );
        let sessions = SessionManager::new(
            store.clone(),
            deps.clock.clone(),
            deps.hasher.clone(),
            deps.tokens.clone(),
        );

        Self {
            engine: Arc::new(Engine {
                store,
                clock: deps.clock,
                accounts,
                auth_methods,
                codes,
                sessions,
                tokens: deps.tokens,
                events: deps.events,
                providers: deps.providers,
                settings,
            }),
        }
    }

    /// Run `f` as one unit of work, bounded by the context deadline.
    async fn atomic<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, IdentityError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, IdentityError>> + Send,
    {
        if ctx.deadline_passed() {
            return Err(IdentityError::DeadlineExceeded);
        }

        let work = run_atomic(&self.engine.store, f);
        match ctx.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, work).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Deadline passed mid-flow, unit of work rolled back");
                    Err(IdentityError::DeadlineExceeded)
                }
            },
            None => work.await,
        }
    }

    async fn publish(&self, events: Vec<IdentityEvent>) {
        for event in &events {
            if let Err(err) = self.engine.events.publish(event).await {
                tracing::warn!(
                    event = event.name(),
                    account_id = %event.account_id(),
                    error = %err,
                    "Failed to publish identity event"
                );
            }
        }
    }

    /// Create an account bound to `(provider, external_id)`.
    ///
    /// Code-verified providers start PENDING with a verification code;
    /// other providers start ACTIVE and verified.
    #[tracing::instrument(skip_all, fields(provider = provider.as_str()))]
    pub async fn register(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        external_id: &str,
    ) -> Result<Registration, IdentityError> {
        let external_id = normalize_external_id(provider, external_id)?;
        let engine = self.engine.clone();

        let (account, method, issued): (Account, AuthMethod, Option<IssuedCode>) = self
            .atomic(ctx, move |tx| {
                Box::pin(async move {
                    if engine
                        .auth_methods
                        .find_by_provider(tx, provider, &external_id)
                        .await?
                        .is_some()
                    {
                        return Err(IdentityError::AccountAlreadyExists);
                    }

                    let needs_code = provider.uses_verification_codes();
                    let initial_status = if needs_code {
                        AccountStatus::Pending
                    } else {
                        AccountStatus::Active
                    };

                    let account = engine.accounts.create(tx, Role::User, initial_status).await?;
                    let method = engine
                        .auth_methods
                        .create(tx, account.account_id, provider, external_id, !needs_code)
                        .await
                        .map_err(already_exists)?;

                    let issued = if needs_code {
                        Some(
                            engine
                                .codes
                                .issue(tx, method.auth_method_id, engine.settings.code_ttl)
                                .await?,
                        )
                    } else {
                        None
                    };

                    Ok((account, method, issued))
                })
            })
            .await?;

        tracing::info!(account_id = %account.account_id, "Account registered");

        let mut events = vec![IdentityEvent::AccountRegistered {
            account_id: account.account_id,
            provider,
        }];
        if let Some(issued) = &issued {
            events.push(self.engine.code_issued_event(account.account_id, &method, issued));
        }
        self.publish(events).await;

        Ok(Registration {
            account: account.summary(),
            verification_required: issued.is_some(),
            code_expires_in: issued.as_ref().map(|i| self.engine.seconds_until(i)),
        })
    }

    /// Prove control of a pending registration and activate the account.
    #[tracing::instrument(skip_all, fields(provider = provider.as_str()))]
    pub async fn verify_code(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        external_id: &str,
        code: &str,
    ) -> Result<Verification, IdentityError> {
        let external_id = normalize_external_id(provider, external_id)?;
        let code = code.to_string();
        let client = ctx.client.clone();
        let engine = self.engine.clone();

        let outcome: Result<(Account, Option<(Uuid, TokenResponse)>), IdentityError> = self
            .atomic(ctx, move |tx| {
                Box::pin(async move {
                    let method = engine
                        .auth_methods
                        .find_by_provider(tx, provider, &external_id)
                        .await?
                        .ok_or(IdentityError::AccountNotFound)?;

                    let account = engine.accounts.get(tx, method.account_id).await?;
                    if account.status != AccountStatus::Pending {
                        return Err(IdentityError::InvalidAccountState(format!(
                            "account is {}",
                            account.status.as_str()
                        )));
                    }

                    if let Err(err) = engine.codes.validate(tx, method.auth_method_id, &code).await {
                        return code_failure(err);
                    }

                    engine.auth_methods.mark_verified(tx, method.auth_method_id).await?;
                    let account = engine
                        .accounts
                        .set_status(tx, account.account_id, AccountStatus::Active)
                        .await?;

                    let session = if engine.settings.session_on_verify {
                        let started = engine
                            .sessions
                            .start_session(tx, account.account_id, &client)
                            .await?;
                        let token_id = started.token.token_id;
                        Some((token_id, engine.mint_tokens(&account, started.secret)?))
                    } else {
                        None
                    };

                    Ok(Ok((account, session)))
                })
            })
            .await?;
        let (account, session) = outcome?;

        tracing::info!(account_id = %account.account_id, "Account verified and activated");

        let mut events = vec![IdentityEvent::AccountActivated {
            account_id: account.account_id,
        }];
        if let Some((token_id, _)) = &session {
            events.push(IdentityEvent::SessionStarted {
                account_id: account.account_id,
                token_id: *token_id,
            });
        }
        self.publish(events).await;

        Ok(Verification {
            account: account.summary(),
            tokens: session.map(|(_, tokens)| tokens),
        })
    }

    /// Send a fresh login code to a verified, active binding.
    #[tracing::instrument(skip_all, fields(provider = provider.as_str()))]
    pub async fn request_login_code(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        external_id: &str,
    ) -> Result<LoginCodeIssued, IdentityError> {
        if !provider.uses_verification_codes() {
            return Err(IdentityError::InvalidInput(format!(
                "{} does not use login codes",
                provider.as_str()
            )));
        }
        let external_id = normalize_external_id(provider, external_id)?;
        let engine = self.engine.clone();

        let (account, method, issued): (Account, AuthMethod, IssuedCode) = self
            .atomic(ctx, move |tx| {
                Box::pin(async move {
                    let method = engine
                        .auth_methods
                        .find_by_provider(tx, provider, &external_id)
                        .await?
                        .filter(|m| m.verified)
                        .ok_or(IdentityError::InvalidCredentials)?;

                    let account = engine.accounts.get(tx, method.account_id).await?;
                    if !account.is_active() {
                        return Err(not_active(&account));
                    }

                    let issued = engine
                        .codes
                        .issue(tx, method.auth_method_id, engine.settings.code_ttl)
                        .await?;

                    Ok((account, method, issued))
                })
            })
            .await?;

        tracing::info!(account_id = %account.account_id, "Login code issued");

        self.publish(vec![self
            .engine
            .code_issued_event(account.account_id, &method, &issued)])
            .await;

        Ok(LoginCodeIssued {
            expires_in: self.engine.seconds_until(&issued),
        })
    }

    /// Exchange a login code for a new session, replacing any existing one.
    #[tracing::instrument(skip_all, fields(provider = provider.as_str()))]
    pub async fn complete_login(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        external_id: &str,
        code: &str,
    ) -> Result<LoginSession, IdentityError> {
        let external_id = normalize_external_id(provider, external_id)?;
        let code = code.to_string();
        let client = ctx.client.clone();
        let engine = self.engine.clone();

        let outcome: Result<(Account, Uuid, TokenResponse), IdentityError> = self
            .atomic(ctx, move |tx| {
                Box::pin(async move {
                    let method = engine
                        .auth_methods
                        .find_by_provider(tx, provider, &external_id)
                        .await?
                        .ok_or(IdentityError::InvalidCredentials)?;

                    let account = engine.accounts.get(tx, method.account_id).await?;
                    if !account.is_active() {
                        return Err(not_active(&account));
                    }

                    if let Err(err) = engine.codes.validate(tx, method.auth_method_id, &code).await {
                        return code_failure(err);
                    }

                    engine
                        .auth_methods
                        .record_login(tx, method.auth_method_id, engine.clock.now())
                        .await?;
                    let started = engine
                        .sessions
                        .start_session(tx, account.account_id, &client)
                        .await?;
                    let token_id = started.token.token_id;
                    let tokens = engine.mint_tokens(&account, started.secret)?;

                    Ok(Ok((account, token_id, tokens)))
                })
            })
            .await?;
        let (account, token_id, tokens) = outcome?;

        tracing::info!(account_id = %account.account_id, "Login completed");

        self.publish(vec![IdentityEvent::SessionStarted {
            account_id: account.account_id,
            token_id,
        }])
        .await;

        Ok(LoginSession {
            account: account.summary(),
            tokens,
        })
    }

    /// Sign in with a signed assertion from a provider that does not use
    /// login codes.
    ///
    /// The subject is taken from the verified assertion only. The first
    /// login registers the binding as ACTIVE and verified.
    #[tracing::instrument(skip_all, fields(provider = provider.as_str()))]
    pub async fn complete_provider_login(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        assertion: &str,
    ) -> Result<LoginSession, IdentityError> {
        if provider.uses_verification_codes() {
            return Err(IdentityError::InvalidInput(format!(
                "{} logins require a verification code",
                provider.as_str()
            )));
        }
        if ctx.deadline_passed() {
            return Err(IdentityError::DeadlineExceeded);
        }

        let subject = self
            .engine
            .providers
            .verify(provider, assertion)
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "Provider assertion rejected");
                IdentityError::InvalidCredentials
            })?;
        let subject = normalize_external_id(provider, &subject)?;
        let client = ctx.client.clone();
        let engine = self.engine.clone();

        let (account, registered, token_id, tokens): (Account, bool, Uuid, TokenResponse) = self
            .atomic(ctx, move |tx| {
                Box::pin(async move {
                    let existing = engine
                        .auth_methods
                        .find_by_provider(tx, provider, &subject)
                        .await?;

                    let (account, method, registered) = match existing {
                        Some(method) => {
                            let account = engine.accounts.get(tx, method.account_id).await?;
                            if !account.is_active() {
                                return Err(not_active(&account));
                            }
                            (account, method, false)
                        }
                        None => {
                            let account = engine
                                .accounts
                                .create(tx, Role::User, AccountStatus::Active)
                                .await?;
                            let method = engine
                                .auth_methods
                                .create(tx, account.account_id, provider, subject, true)
                                .await?;
                            (account, method, true)
                        }
                    };

                    engine
                        .auth_methods
                        .record_login(tx, method.auth_method_id, engine.clock.now())
                        .await?;
                    let started = engine
                        .sessions
                        .start_session(tx, account.account_id, &client)
                        .await?;
                    let token_id = started.token.token_id;
                    let tokens = engine.mint_tokens(&account, started.secret)?;

                    Ok((account, registered, token_id, tokens))
                })
            })
            .await?;

        tracing::info!(account_id = %account.account_id, registered, "Provider login completed");

        let mut events = Vec::with_capacity(2);
        if registered {
            events.push(IdentityEvent::AccountRegistered {
                account_id: account.account_id,
                provider,
            });
        }
        events.push(IdentityEvent::SessionStarted {
            account_id: account.account_id,
            token_id,
        });
        self.publish(events).await;

        Ok(LoginSession {
            account: account.summary(),
            tokens,
        })
    }

    /// New access token for a valid refresh secret. The session itself is
    /// not rotated.
    #[tracing::instrument(skip_all)]
    pub async fn refresh_access(
        &self,
        ctx: &RequestContext,
        refresh_secret: &str,
    ) -> Result<TokenResponse, IdentityError> {
        let secret = refresh_secret.to_string();
        let engine = self.engine.clone();

        self.atomic(ctx, move |tx| {
            Box::pin(async move {
                let token = engine.sessions.validate(tx, &secret).await?;
                let account = engine.accounts.get(tx, token.account_id).await?;
                if !account.is_active() {
                    return Err(not_active(&account));
                }
                Ok(engine.mint_tokens(&account, secret)?)
            })
        })
        .await
    }

    /// End the session that owns `refresh_secret`.
    #[tracing::instrument(skip_all)]
    pub async fn logout(&self, ctx: &RequestContext, refresh_secret: &str) -> Result<(), IdentityError> {
        let secret = refresh_secret.to_string();
        let engine = self.engine.clone();

        let (account_id, token_id): (Uuid, Uuid) = self
            .atomic(ctx, move |tx| {
                Box::pin(async move {
                    let token = engine.sessions.validate(tx, &secret).await?;
                    engine
                        .sessions
                        .revoke(tx, token.token_id)
                        .await
                        .map_err(|err| match err {
                            ServiceError::NotFound(_) => IdentityError::InvalidToken,
                            other => other.into(),
                        })?;
                    Ok((token.account_id, token.token_id))
                })
            })
            .await?;

        tracing::info!(account_id = %account_id, "Session revoked");

        self.publish(vec![IdentityEvent::SessionRevoked {
            account_id,
            token_id: Some(token_id),
            revoked_count: 1,
        }])
        .await;

        Ok(())
    }

    /// Revoke every session of the account. Returns how many were active.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn global_logout(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
    ) -> Result<u64, IdentityError> {
        let engine = self.engine.clone();

        let revoked: u64 = self
            .atomic(ctx, move |tx| {
                Box::pin(async move { Ok(engine.sessions.revoke_all(tx, account_id).await?) })
            })
            .await?;

        tracing::info!(account_id = %account_id, revoked, "All sessions revoked");

        if revoked > 0 {
            self.publish(vec![IdentityEvent::SessionRevoked {
                account_id,
                token_id: None,
                revoked_count: revoked,
            }])
            .await;
        }

        Ok(revoked)
    }

    /// Administrative status change. Banning or deleting an account also
    /// ends its sessions.
    #[tracing::instrument(skip(self, ctx, new_status), fields(new_status = new_status.as_str()))]
    pub async fn change_account_status(
        &self,
        ctx: &RequestContext,
        account_id: Uuid,
        new_status: AccountStatus,
    ) -> Result<AccountSummary, IdentityError> {
        let engine = self.engine.clone();

        let (previous, account, revoked): (AccountStatus, Account, u64) = self
            .atomic(ctx, move |tx| {
                Box::pin(async move {
                    let previous = engine.accounts.get(tx, account_id).await?.status;
                    let account = engine.accounts.set_status(tx, account_id, new_status).await?;
                    let revoked = if account.status.ends_sessions() {
                        engine.sessions.revoke_all(tx, account_id).await?
                    } else {
                        0
                    };
                    Ok((previous, account, revoked))
                })
            })
            .await?;

        tracing::info!(
            account_id = %account_id,
            from = previous.as_str(),
            revoked,
            "Account status changed"
        );

        let mut events = vec![IdentityEvent::AccountStatusChanged {
            account_id,
            from: previous,
            to: account.status,
        }];
        if revoked > 0 {
            events.push(IdentityEvent::SessionRevoked {
                account_id,
                token_id: None,
                revoked_count: revoked,
            });
        }
        self.publish(events).await;

        Ok(account.summary())
    }

    /// Verify a bearer access token.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessTokenClaims, IdentityError> {
        self.engine
            .tokens
            .verify_access_token(access_token)
            .map_err(|err| {
                tracing::debug!(error = %err, "Access token rejected");
                IdentityError::InvalidToken
            })
    }

    /// Open and roll back an empty unit of work.
    pub async fn check_store(&self) -> Result<(), IdentityError> {
        let store = &self.engine.store;
        let tx = store.begin().await?;
        store.rollback(tx).await?;
        Ok(())
    }
}
