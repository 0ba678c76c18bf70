use identity_service::{
    build_router,
    config::IdentityConfig,
    db,
    models::Provider,
    services::{
        EventPublisher, HmacCredentialHasher, IdTokenVerifier, IdentityDeps, IdentityService,
        JwtService, NumericCodeGenerator, SystemClock, TracingEventPublisher,
        WebhookEventPublisher, GOOGLE_ISSUERS,
    },
    store::PgStore,
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    let store = PgStore::new(pool);

    let jwt = JwtService::new(&config.jwt)?;
    tracing::info!("JWT service initialized");

    let events: Arc<dyn EventPublisher> = match &config.events_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Publishing identity events to webhook");
            Arc::new(WebhookEventPublisher::new(url)?)
        }
        None => {
            tracing::warn!("EVENTS_WEBHOOK_URL not set, identity events are only logged");
            Arc::new(TracingEventPublisher)
        }
    };

    let mut providers = IdTokenVerifier::new()?;
    match &config.providers.google_client_id {
        Some(client_id) => {
            providers = providers.with_jwks(
                Provider::Google,
                &config.providers.google_jwks_url,
                &GOOGLE_ISSUERS,
                client_id,
            );
            tracing::info!("Google sign-in enabled");
        }
        None => tracing::warn!("GOOGLE_CLIENT_ID not set, Google sign-in is disabled"),
    }

    let deps = IdentityDeps {
        clock: Arc::new(SystemClock),
        hasher: Arc::new(HmacCredentialHasher::new(&config.credentials.pepper)?),
        code_generator: Arc::new(NumericCodeGenerator::new(config.verification.code_length)),
        tokens: Arc::new(jwt),
        events,
        providers: Arc::new(providers),
    };
    let identity = IdentityService::new(store, deps, config.identity_settings());

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );

    let state = AppState {
        identity,
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
        request_timeout: Duration::from_secs(config.request_timeout_seconds),
        allowed_origins: config.security.allowed_origins.clone(),
        login_rate_limiter,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Duration::from_secs(
        config.common.shutdown_grace_seconds,
    )))
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tokio::time::sleep(grace).await;
}
