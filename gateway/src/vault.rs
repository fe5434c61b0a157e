//! Client for the external key-vault RPC.
//!
//! The vault itself is out of scope; this module only implements the unary
//! call and the symmetric decryption of its response, re-expressed as
//! JSON-over-HTTP (see the transport note in the design notes) in place of
//! the source's plaintext gRPC channel.

use anyhow::{anyhow, Context, Result};
use fernet::Fernet;
use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct KeysPairsRequest<'a> {
    system_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct KeysPairsResponse {
    encrypted_data: String,
}

/// The decrypted payload: four base64-encoded PEM blobs keyed by name,
/// matching `KeyCodeHelper.load_pem_keys`.
#[derive(Debug, Deserialize)]
struct KeyPairs {
    private_key: String,
    refresh_private_key: String,
    public_key: String,
    refresh_public_key: String,
}

/// Resolved RSA keys ready for `jsonwebtoken` to sign/verify with.
pub struct ResolvedKeys {
    pub access_encoding: EncodingKey,
    pub refresh_encoding: EncodingKey,
    pub access_decoding: DecodingKey,
    pub refresh_decoding: DecodingKey,
}

/// Fetches and decrypts RSA key pairs from the vault RPC on demand.
///
/// The source re-fetches on every call and does not require caching for
/// correctness; this client does the same.
pub struct KeyProvider {
    http: reqwest::Client,
    endpoint: String,
    system_code: String,
    fernet: Fernet,
}

impl KeyProvider {
    pub fn new(http: reqwest::Client, grpc_server_address: &str, system_code: &str, vault_secret_key: &str) -> Result<Self> {
        let fernet = Fernet::new(vault_secret_key)
            .ok_or_else(|| anyhow!("VAULT_SECRET_KEY is not a valid urlsafe-base64 Fernet key"))?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/keys-pairs", grpc_server_address.trim_end_matches('/')),
            system_code: system_code.to_string(),
            fernet,
        })
    }

    async fn fetch_keys(&self) -> Result<KeyPairs> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&KeysPairsRequest {
                system_code: &self.system_code,
            })
            .send()
            .await
            .context("vault RPC request failed")?;

        let body: KeysPairsResponse = response
            .error_for_status()
            .context("vault RPC returned an error status")?
            .json()
            .await
            .context("vault RPC returned a malformed response")?;

        // `encrypted_data` is the Fernet token itself: a urlsafe-base64 string
        // produced by the vault's `Fernet(key).encrypt(...)`, carried verbatim
        // over the wire rather than base64-wrapped a second time.
        let plaintext = self
            .fernet
            .decrypt(&body.encrypted_data)
            .map_err(|_| anyhow!("failed to decrypt vault key pairs payload"))?;

        serde_json::from_slice(&plaintext).context("decrypted vault payload is not the expected key-pairs shape")
    }

    fn decode_private(pem_b64: &str) -> Result<Vec<u8>> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(pem_b64)
            .context("vault key pair field is not valid base64")
    }

    /// Resolve all four keys from a single vault round trip.
    pub async fn resolve(&self) -> Result<ResolvedKeys> {
        let pairs = self.fetch_keys().await?;

        let private_pem = Self::decode_private(&pairs.private_key)?;
        let refresh_private_pem = Self::decode_private(&pairs.refresh_private_key)?;
        let public_pem = Self::decode_private(&pairs.public_key)?;
        let refresh_public_pem = Self::decode_private(&pairs.refresh_public_key)?;

        Ok(ResolvedKeys {
            access_encoding: EncodingKey::from_rsa_pem(&private_pem)
                .context("vault private_key is not a valid RSA PEM")?,
            refresh_encoding: EncodingKey::from_rsa_pem(&refresh_private_pem)
                .context("vault refresh_private_key is not a valid RSA PEM")?,
            access_decoding: DecodingKey::from_rsa_pem(&public_pem)
                .context("vault public_key is not a valid RSA PEM")?,
            refresh_decoding: DecodingKey::from_rsa_pem(&refresh_public_pem)
                .context("vault refresh_public_key is not a valid RSA PEM")?,
        })
    }
}
