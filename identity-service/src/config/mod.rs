use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::services::{IdentitySettings, GOOGLE_JWKS_URL};

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub credentials: CredentialConfig,
    pub verification: VerificationConfig,
    pub request_timeout_seconds: u64,
    pub events_webhook_url: Option<String>,
    pub providers: ProviderConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Signing material: an RSA key pair (RS256) or a shared secret (HS256).
#[derive(Clone)]
pub struct JwtConfig {
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
    pub secret: Option<String>,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("issuer", &self.issuer)
            .field("access_token_expiry_minutes", &self.access_token_expiry_minutes)
            .field("refresh_token_expiry_days", &self.refresh_token_expiry_days)
            .finish()
    }
}

/// Key for hashing one-time codes and refresh secrets.
#[derive(Clone)]
pub struct CredentialConfig {
    pub pepper: String,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("pepper", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub code_ttl_seconds: i64,
    pub code_length: usize,
    pub max_attempts: i32,
    pub session_on_verify: bool,
}

/// External sign-in providers. Google sign-in is off without a client id.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub google_client_id: Option<String>,
    pub google_jwks_url: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment: Environment = lookup("ENVIRONMENT")
            .unwrap_or_else(|| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let get_env = |key: &str, default: Option<&str>| get_env(&lookup, key, default, is_prod);

        let config = IdentityConfig {
            common,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"))?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None)?,
                max_connections: parse("DATABASE_MAX_CONNECTIONS", get_env("DATABASE_MAX_CONNECTIONS", Some("10"))?)?,
                min_connections: parse("DATABASE_MIN_CONNECTIONS", get_env("DATABASE_MIN_CONNECTIONS", Some("1"))?)?,
            },
            jwt: JwtConfig {
                private_key_path: lookup("JWT_PRIVATE_KEY_PATH").filter(|v| !v.is_empty()),
                public_key_path: lookup("JWT_PUBLIC_KEY_PATH").filter(|v| !v.is_empty()),
                secret: lookup("JWT_SECRET").filter(|v| !v.is_empty()),
                issuer: get_env("JWT_ISSUER", Some("identity-service"))?,
                access_token_expiry_minutes: parse(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    get_env("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", Some("15"))?,
                )?,
                refresh_token_expiry_days: parse(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    get_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", Some("7"))?,
                )?,
            },
            credentials: CredentialConfig {
                pepper: get_env("CREDENTIAL_PEPPER", None)?,
            },
            verification: VerificationConfig {
                code_ttl_seconds: parse(
                    "VERIFICATION_CODE_TTL_SECONDS",
                    get_env("VERIFICATION_CODE_TTL_SECONDS", Some("300"))?,
                )?,
                code_length: parse(
                    "VERIFICATION_CODE_LENGTH",
                    get_env("VERIFICATION_CODE_LENGTH", Some("6"))?,
                )?,
                max_attempts: parse(
                    "VERIFICATION_MAX_ATTEMPTS",
                    get_env("VERIFICATION_MAX_ATTEMPTS", Some("5"))?,
                )?,
                session_on_verify: parse(
                    "SESSION_ON_VERIFY",
                    get_env("SESSION_ON_VERIFY", Some("true"))?,
                )?,
            },
            request_timeout_seconds: parse(
                "REQUEST_TIMEOUT_SECONDS",
                get_env("REQUEST_TIMEOUT_SECONDS", Some("10"))?,
            )?,
            events_webhook_url: lookup("EVENTS_WEBHOOK_URL").filter(|v| !v.is_empty()),
            providers: ProviderConfig {
                google_client_id: lookup("GOOGLE_CLIENT_ID").filter(|v| !v.is_empty()),
                google_jwks_url: lookup("GOOGLE_JWKS_URL")
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| GOOGLE_JWKS_URL.to_string()),
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"))?
                    .parse()
                    .unwrap_or(5),
                login_window_seconds: get_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", Some("900"))?
                    .parse()
                    .unwrap_or(900),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(config_error("JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"));
        }

        let has_key_pair = self.jwt.private_key_path.is_some() && self.jwt.public_key_path.is_some();
        if !has_key_pair && self.jwt.secret.is_none() {
            return Err(config_error(
                "Set JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH, or JWT_SECRET",
            ));
        }

        if self.credentials.pepper.is_empty() {
            return Err(config_error("CREDENTIAL_PEPPER must not be empty"));
        }

        if self.verification.code_ttl_seconds <= 0 {
            return Err(config_error("VERIFICATION_CODE_TTL_SECONDS must be positive"));
        }

        if !(4..=10).contains(&self.verification.code_length) {
            return Err(config_error("VERIFICATION_CODE_LENGTH must be between 4 and 10"));
        }

        if self.verification.max_attempts <= 0 {
            return Err(config_error("VERIFICATION_MAX_ATTEMPTS must be positive"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(config_error("REQUEST_TIMEOUT_SECONDS must be positive"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(config_error(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS",
            ));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(config_error("Wildcard CORS origin not allowed in production"));
        }

        Ok(())
    }

    pub fn identity_settings(&self) -> IdentitySettings {
        IdentitySettings {
            code_ttl: chrono::Duration::seconds(self.verification.code_ttl_seconds),
            max_code_attempts: self.verification.max_attempts,
            session_on_verify: self.verification.session_on_verify,
        }
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn parse<T>(key: &str, value: String) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn get_env<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
