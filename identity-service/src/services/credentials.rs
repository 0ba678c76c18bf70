//! One-time code and refresh secret primitives.
//!
//! Codes and refresh secrets are stored as keyed HMAC-SHA256 digests. The
//! pepper lives in configuration, never in the database.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// One-way hash plus constant-time comparison.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, secret: &str) -> String;

    fn verify(&self, secret: &str, expected_hash: &str) -> bool;
}

#[derive(Clone)]
pub struct HmacCredentialHasher {
    mac: HmacSha256,
}

impl HmacCredentialHasher {
    pub fn new(pepper: &str) -> Result<Self, anyhow::Error> {
        if pepper.is_empty() {
            return Err(anyhow::anyhow!("Credential pepper must not be empty"));
        }
        let mac = HmacSha256::new_from_slice(pepper.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
        Ok(Self { mac })
    }
}

impl CredentialHasher for HmacCredentialHasher {
    fn hash(&self, secret: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(secret.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, secret: &str, expected_hash: &str) -> bool {
        let actual = self.hash(secret);
        let actual_bytes = actual.as_bytes();
        let expected_bytes = expected_hash.as_bytes();

        if actual_bytes.len() != expected_bytes.len() {
            return false;
        }

        actual_bytes.ct_eq(expected_bytes).into()
    }
}

/// Source of plaintext one-time codes.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniform decimal codes of a fixed length.
#[derive(Debug, Clone)]
pub struct NumericCodeGenerator {
    length: usize,
}

impl NumericCodeGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl CodeGenerator for NumericCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}
