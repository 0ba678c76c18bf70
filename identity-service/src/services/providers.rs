//! Verification of identity assertions issued by external providers.
//!
//! Providers that do not use login codes prove a subject with a signed ID
//! token. The engine only ever sees the subject of an assertion that passed
//! signature, issuer, audience and expiry checks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::models::Provider;

/// Turns a provider assertion into the subject it vouches for.
#[async_trait]
pub trait ProviderVerifier: Send + Sync {
    async fn verify(&self, provider: Provider, assertion: &str) -> Result<String, anyhow::Error>;
}

pub const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Minimum spacing between key set downloads triggered by unknown key ids.
const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
}

enum KeySource {
    Static(DecodingKey),
    Jwks {
        url: String,
        cache: RwLock<Option<CachedKeys>>,
    },
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

struct ProviderKeys {
    algorithm: Algorithm,
    issuers: Vec<String>,
    audience: String,
    source: KeySource,
}

/// ID-token verifier with one key source per provider.
///
/// A provider without a registered key source rejects every assertion.
pub struct IdTokenVerifier {
    providers: HashMap<Provider, ProviderKeys>,
    http: reqwest::Client,
}

impl IdTokenVerifier {
    pub fn new() -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build JWKS client: {}", e))?;

        Ok(Self {
            providers: HashMap::new(),
            http,
        })
    }

    /// RS256 tokens checked against keys published at `jwks_url`.
    pub fn with_jwks(
        mut self,
        provider: Provider,
        jwks_url: &str,
        issuers: &[&str],
        audience: &str,
    ) -> Self {
        self.providers.insert(
            provider,
            ProviderKeys {
                algorithm: Algorithm::RS256,
                issuers: issuers.iter().map(|s| s.to_string()).collect(),
                audience: audience.to_string(),
                source: KeySource::Jwks {
                    url: jwks_url.to_string(),
                    cache: RwLock::new(None),
                },
            },
        );
        self
    }

    /// Tokens checked against a single fixed key.
    pub fn with_static_key(
        mut self,
        provider: Provider,
        algorithm: Algorithm,
        key: DecodingKey,
        issuers: &[&str],
        audience: &str,
    ) -> Self {
        self.providers.insert(
            provider,
            ProviderKeys {
                algorithm,
                issuers: issuers.iter().map(|s| s.to_string()).collect(),
                audience: audience.to_string(),
                source: KeySource::Static(key),
            },
        );
        self
    }

    async fn decoding_key(
        &self,
        source: &KeySource,
        kid: Option<&str>,
    ) -> Result<DecodingKey, anyhow::Error> {
        let (url, cache) = match source {
            KeySource::Static(key) => return Ok(key.clone()),
            KeySource::Jwks { url, cache } => (url, cache),
        };
        let kid = kid.ok_or_else(|| anyhow::anyhow!("Assertion header has no key id"))?;

        {
            let cached = cache.read().await;
            if let Some(cached) = cached.as_ref() {
                if let Some(jwk) = cached.keys.find(kid) {
                    return DecodingKey::from_jwk(jwk)
                        .map_err(|e| anyhow::anyhow!("Unusable provider key: {}", e));
                }
                if cached.fetched_at.elapsed() < JWKS_REFRESH_INTERVAL {
                    return Err(anyhow::anyhow!("Unknown key id {}", kid));
                }
            }
        }

        let mut cached = cache.write().await;
        let stale = cached
            .as_ref()
            .map_or(true, |c| c.fetched_at.elapsed() >= JWKS_REFRESH_INTERVAL);
        if stale {
            tracing::debug!(url = %url, "Fetching provider signing keys");
            let keys = self
                .http
                .get(url.as_str())
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| anyhow::anyhow!("Failed to fetch provider keys: {}", e))?
                .json::<JwkSet>()
                .await
                .map_err(|e| anyhow::anyhow!("Invalid provider key set: {}", e))?;
            *cached = Some(CachedKeys {
                keys,
                fetched_at: Instant::now(),
            });
        }

        let jwk = cached
            .as_ref()
            .and_then(|c| c.keys.find(kid))
            .ok_or_else(|| anyhow::anyhow!("Unknown key id {}", kid))?;
        DecodingKey::from_jwk(jwk).map_err(|e| anyhow::anyhow!("Unusable provider key: {}", e))
    }
}

#[async_trait]
impl ProviderVerifier for IdTokenVerifier {
    async fn verify(&self, provider: Provider, assertion: &str) -> Result<String, anyhow::Error> {
        let keys = self
            .providers
            .get(&provider)
            .ok_or_else(|| anyhow::anyhow!("{} sign-in is not configured", provider.as_str()))?;

        let header = decode_header(assertion)
            .map_err(|e| anyhow::anyhow!("Malformed assertion: {}", e))?;
        if header.alg != keys.algorithm {
            return Err(anyhow::anyhow!("Unexpected assertion algorithm {:?}", header.alg));
        }

        let key = self.decoding_key(&keys.source, header.kid.as_deref()).await?;

        let mut validation = Validation::new(keys.algorithm);
        validation.validate_exp = true;
        validation.set_issuer(keys.issuers.as_slice());
        validation.set_audience(&[&keys.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<IdTokenClaims>(assertion, &key, &validation)
            .map_err(|e| anyhow::anyhow!("Assertion rejected: {}", e))?;

        if data.claims.sub.trim().is_empty() {
            return Err(anyhow::anyhow!("Assertion has an empty subject"));
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &[u8] = b"provider-test-key";
    const AUDIENCE: &str = "identity-client";

    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        iss: &'a str,
        aud: &'a str,
        exp: i64,
        iat: i64,
    }

    fn verifier() -> IdTokenVerifier {
        IdTokenVerifier::new().unwrap().with_static_key(
            Provider::Google,
            Algorithm::HS256,
            DecodingKey::from_secret(SECRET),
            &GOOGLE_ISSUERS,
            AUDIENCE,
        )
    }

    fn assertion(sub: &str, iss: &str, aud: &str, key: &[u8], exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub,
            iss,
            aud,
            exp: now + exp_offset,
            iat: now,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(key)).unwrap()
    }

    #[tokio::test]
    async fn test_valid_assertion_yields_subject() {
        let token = assertion("google-sub-1", GOOGLE_ISSUERS[0], AUDIENCE, SECRET, 600);

        let subject = verifier().verify(Provider::Google, &token).await.unwrap();
        assert_eq!(subject, "google-sub-1");
    }

    #[tokio::test]
    async fn test_forged_and_foreign_assertions_rejected() {
        let verifier = verifier();

        let wrong_key = assertion("google-sub-1", GOOGLE_ISSUERS[0], AUDIENCE, b"attacker-key", 600);
        assert!(verifier.verify(Provider::Google, &wrong_key).await.is_err());

        let wrong_audience = assertion("google-sub-1", GOOGLE_ISSUERS[0], "other-app", SECRET, 600);
        assert!(verifier.verify(Provider::Google, &wrong_audience).await.is_err());

        let wrong_issuer = assertion("google-sub-1", "https://evil.example", AUDIENCE, SECRET, 600);
        assert!(verifier.verify(Provider::Google, &wrong_issuer).await.is_err());

        let expired = assertion("google-sub-1", GOOGLE_ISSUERS[0], AUDIENCE, SECRET, -3600);
        assert!(verifier.verify(Provider::Google, &expired).await.is_err());

        assert!(verifier.verify(Provider::Google, "").await.is_err());
        assert!(verifier.verify(Provider::Google, "google-sub-1").await.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_rejects_everything() {
        let token = assertion("someone", GOOGLE_ISSUERS[0], AUDIENCE, SECRET, 600);

        assert!(verifier().verify(Provider::Email, &token).await.is_err());
        assert!(IdTokenVerifier::new()
            .unwrap()
            .verify(Provider::Google, &token)
            .await
            .is_err());
    }
}
