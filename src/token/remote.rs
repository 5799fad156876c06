//! Encrypted remote token store
//!
//! Persists token records in a Redis-compatible KV service. Records are
//! serialized to JSON and encrypted with AES-256-GCM before leaving the
//! process; the stored value is `nonce || ciphertext || tag`. The encryption
//! key is derived once from the deployment's key material via
//! PBKDF2-HMAC-SHA256. TTL is enforced natively by the KV service.

use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use async_trait::async_trait;
use pbkdf2::pbkdf2_hmac;
use redis::AsyncCommands;
use sha2::Sha256;

use crate::error::{GateError, Result};
use crate::token::store::{TokenRecord, TokenStore};

const KDF_ITERATIONS: u32 = 100_000;
/// Fixed per deployment so every worker derives the same key.
const KDF_SALT: &[u8; 16] = b"veilgate.kdf.v1\0";
const NONCE_LEN: usize = 12;
/// Every KV operation is bounded by this deadline.
const OP_DEADLINE: Duration = Duration::from_secs(2);

/// AES-256-GCM envelope for serialized token records.
pub(crate) struct RecordCipher {
    cipher: Aes256Gcm,
}

impl RecordCipher {
    /// Derive the AES key from raw key material.
    pub(crate) fn derive(key_material: &str) -> Result<Self> {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(key_material.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| GateError::Config(format!("Invalid encryption key: {e}")))?;
        Ok(Self { cipher })
    }

    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| GateError::BackendUnavailable(format!("Encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Tag verification failure is a hard error: possible tampering.
    pub(crate) fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() <= NONCE_LEN {
            return Err(GateError::BackendUnavailable(
                "Stored record too short".to_string(),
            ));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                GateError::BackendUnavailable(
                    "Ciphertext authentication failed".to_string(),
                )
            })
    }
}

/// Redis-backed token store with at-rest encryption.
pub struct RemoteTokenStore {
    conn: redis::aio::ConnectionManager,
    cipher: RecordCipher,
}

impl RemoteTokenStore {
    /// Connect to the KV service and derive the encryption key.
    pub async fn connect(url: &str, key_material: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GateError::Config(format!("Invalid REMOTE_URL: {e}")))?;
        let conn = tokio::time::timeout(OP_DEADLINE, client.get_connection_manager())
            .await
            .map_err(|_| deadline_exceeded())?
            .map_err(backend_error)?;
        Ok(Self {
            conn,
            cipher: RecordCipher::derive(key_material)?,
        })
    }

    fn key(handle: &str) -> String {
        format!("tokenmap:{handle}")
    }
}

fn deadline_exceeded() -> GateError {
    GateError::BackendUnavailable("Token store deadline exceeded".to_string())
}

fn backend_error(e: redis::RedisError) -> GateError {
    GateError::BackendUnavailable(e.to_string())
}

#[async_trait]
impl TokenStore for RemoteTokenStore {
    async fn put(&self, record: TokenRecord) -> Result<()> {
        let plaintext = serde_json::to_vec(&record)?;
        let encrypted = self.cipher.encrypt(&plaintext)?;
        let ttl = (record.expires_at - chrono::Utc::now()).num_seconds().max(1) as u64;

        let mut conn = self.conn.clone();
        tokio::time::timeout(
            OP_DEADLINE,
            conn.set_ex::<_, _, ()>(Self::key(&record.handle), encrypted, ttl),
        )
        .await
        .map_err(|_| deadline_exceeded())?
        .map_err(backend_error)
    }

    async fn get(&self, handle: &str) -> Result<Option<TokenRecord>> {
        let mut conn = self.conn.clone();
        let stored: Option<Vec<u8>> =
            tokio::time::timeout(OP_DEADLINE, conn.get::<_, Option<Vec<u8>>>(Self::key(handle)))
                .await
                .map_err(|_| deadline_exceeded())?
                .map_err(backend_error)?;

        let Some(stored) = stored else {
            return Ok(None);
        };
        let plaintext = self.cipher.decrypt(&stored)?;
        let record: TokenRecord = serde_json::from_slice(&plaintext)?;
        Ok(Some(record))
    }

    async fn extend_ttl(&self, handle: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(
            OP_DEADLINE,
            conn.expire::<_, ()>(Self::key(handle), ttl.as_secs() as i64),
        )
        .await
        .map_err(|_| deadline_exceeded())?
        .map_err(backend_error)
    }
}
