use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{Account, AccountStatus, Role};

/// Mints and verifies the credentials handed to clients.
pub trait TokenIssuer: Send + Sync {
    /// Signed, short-lived access token for the account.
    fn issue_access_token(&self, account: &Account, now: DateTime<Utc>)
        -> Result<String, anyhow::Error>;

    fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error>;

    /// Opaque refresh secret. Only its hash is persisted.
    fn mint_refresh_secret(&self) -> String;

    fn access_token_expiry_seconds(&self) -> i64;

    fn refresh_token_ttl(&self) -> Duration;
}

/// JWT service for token generation and validation
#[derive(Clone)]
pub struct JwtService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (account ID)
    pub sub: String,
    pub role: Role,
    /// Account status at issue time
    pub status: AccountStatus,
    pub iss: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
}

impl AccessTokenClaims {
    pub fn account_id(&self) -> Result<Uuid, anyhow::Error> {
        Uuid::parse_str(&self.sub).map_err(|e| anyhow::anyhow!("Invalid subject: {}", e))
    }
}

/// Token response returned to client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn bearer(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

impl JwtService {
    /// Create a JWT service from configuration.
    ///
    /// RSA key files take precedence over a shared secret.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        match (&config.private_key_path, &config.public_key_path, &config.secret) {
            (Some(private_key_path), Some(public_key_path), _) => {
                Self::from_rsa_files(config, private_key_path, public_key_path)
            }
            (_, _, Some(secret)) => Ok(Self::from_secret(
                secret,
                &config.issuer,
                config.access_token_expiry_minutes,
                config.refresh_token_expiry_days,
            )),
            _ => Err(anyhow::anyhow!(
                "JWT signing requires JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH, or JWT_SECRET"
            )),
        }
    }

    fn from_rsa_files(
        config: &JwtConfig,
        private_key_path: &str,
        public_key_path: &str,
    ) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(private_key_path).map_err(|e| {
            anyhow::anyhow!("Failed to read private key from {}: {}", private_key_path, e)
        })?;

        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
            anyhow::anyhow!("Failed to read public key from {}: {}", public_key_path, e)
        })?;

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        tracing::info!("JWT service initialized with RS256 keys");

        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding_key,
            decoding_key,
            issuer: config.issuer.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    /// HS256 service keyed by a shared secret.
    pub fn from_secret(
        secret: &str,
        issuer: &str,
        access_token_expiry_minutes: i64,
        refresh_token_expiry_days: i64,
    ) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            access_token_expiry_minutes,
            refresh_token_expiry_days,
        }
    }
}

impl TokenIssuer for JwtService {
    fn issue_access_token(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<String, anyhow::Error> {
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: account.account_id.to_string(),
            role: account.role,
            status: account.status,
            iss: self.issuer.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(self.algorithm);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(token)
    }

    fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }

    fn mint_refresh_secret(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    fn refresh_token_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_expiry_days)
    }
}
