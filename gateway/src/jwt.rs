//! Bearer token issuance and verification.
//!
//! Claims are represented as a JSON object rather than a fixed struct: the
//! source builds the token payload from an arbitrary user-record dict merged
//! with an `endpoints` manifest, and callers only ever look a handful of
//! named fields back out of it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::vault::{KeyProvider, ResolvedKeys};

pub type Claims = Map<String, Value>;

/// Outcome of verifying a bearer token. The source never raises out of
/// `validate_token`; it returns a sentinel dict for both failure cases,
/// inspected by the caller. This build keeps that as a typed three-way enum
/// instead of an exception.
pub enum TokenStatus {
    Valid(Claims),
    Expired,
    Invalid,
}

/// Signs, refreshes, and verifies bearer tokens against RSA keys resolved
/// from the vault. Keys are fetched lazily on first use and cached for the
/// lifetime of the process; the source re-fetches on every call, but
/// correctness does not depend on that, only on the keys being consistent.
pub struct JwtManager {
    key_provider: Arc<KeyProvider>,
    algorithm: Algorithm,
    access_token_expire_minutes: i64,
    refresh_token_expire_minutes: i64,
    keys: RwLock<Option<Arc<ResolvedKeys>>>,
}

impl JwtManager {
    pub fn new(
        key_provider: Arc<KeyProvider>,
        algorithm_name: &str,
        access_token_expire_minutes: i64,
        refresh_token_expire_minutes: i64,
    ) -> Result<Self> {
        let algorithm = parse_algorithm(algorithm_name)?;
        Ok(Self {
            key_provider,
            algorithm,
            access_token_expire_minutes,
            refresh_token_expire_minutes,
            keys: RwLock::new(None),
        })
    }

    async fn keys(&self) -> Result<Arc<ResolvedKeys>> {
        if let Some(keys) = self.keys.read().await.as_ref() {
            return Ok(keys.clone());
        }

        let mut guard = self.keys.write().await;
        if let Some(keys) = guard.as_ref() {
            return Ok(keys.clone());
        }

        let resolved = Arc::new(self.key_provider.resolve().await?);
        *guard = Some(resolved.clone());
        Ok(resolved)
    }

    /// Sign `claims` with the access private key, stamping `exp`.
    pub async fn create_token(&self, claims: Claims) -> Result<String> {
        self.sign(claims, self.access_token_expire_minutes, true).await
    }

    /// Sign `claims` with the refresh private key, stamping `exp`.
    pub async fn refresh_token(&self, claims: Claims) -> Result<String> {
        self.sign(claims, self.refresh_token_expire_minutes, false).await
    }

    async fn sign(&self, mut claims: Claims, expire_minutes: i64, access: bool) -> Result<String> {
        let keys = self.keys().await?;
        let exp = now_unix() + expire_minutes * 60;
        claims.insert("exp".to_string(), Value::from(exp));

        let encoding_key = if access {
            &keys.access_encoding
        } else {
            &keys.refresh_encoding
        };

        encode(&Header::new(self.algorithm), &claims, encoding_key).context("failed to sign token")
    }

    /// Verify `token` against the access public key, never raising: failures
    /// are reported through `TokenStatus`.
    pub async fn validate(&self, token: &str) -> Result<TokenStatus> {
        let keys = self.keys().await?;
        let validation = Validation::new(self.algorithm);

        match decode::<Claims>(token, &keys.access_decoding, &validation) {
            Ok(data) => Ok(TokenStatus::Valid(data.claims)),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Ok(TokenStatus::Expired),
                _ => Ok(TokenStatus::Invalid),
            },
        }
    }

    /// Decode `token` without swallowing the error into a sentinel; used
    /// once the signature is already known-good.
    pub async fn extract_token(&self, token: &str) -> Result<Claims> {
        let keys = self.keys().await?;
        let validation = Validation::new(self.algorithm);
        let data = decode::<Claims>(token, &keys.access_decoding, &validation)
            .context("failed to decode token")?;
        Ok(data.claims)
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}

fn parse_algorithm(name: &str) -> Result<Algorithm> {
    match name {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => anyhow::bail!("unsupported JWT algorithm: {other} (must be RSA-family)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_algorithm_is_rejected() {
        assert!(parse_algorithm("HS256").is_err());
        assert!(parse_algorithm("RS256").is_ok());
    }
}
