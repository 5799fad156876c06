//! Token-record storage
//!
//! A `TokenRecord` maps placeholders back to their original values for one
//! redact call. Records are created by `redact`, read by `detokenize`, and
//! expire after their TTL; they are never updated in place except to extend
//! the TTL on reuse within the same conversation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::Category;

/// One redacted value inside a token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub category: Category,
    pub original: String,
    pub created_at: DateTime<Utc>,
}

/// The placeholder → original map for one redact call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub handle: String,
    pub conversation_id: String,
    pub entries: HashMap<String, TokenEntry>,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(conversation_id: &str, ttl: Duration) -> Self {
        Self {
            handle: new_handle(),
            conversation_id: conversation_id.to_string(),
            entries: HashMap::new(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    pub fn insert(&mut self, placeholder: String, category: Category, original: String) {
        self.entries.insert(
            placeholder,
            TokenEntry {
                category,
                original,
                created_at: Utc::now(),
            },
        );
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Generate an opaque handle: `tm_` + base32 of a random 128-bit value.
pub fn new_handle() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let encoded = base32::encode(base32::Alphabet::RFC4648 { padding: false }, &bytes);
    format!("tm_{}", encoded.to_lowercase())
}

/// Capability set of a token-record backend.
///
/// `put` and `get` are atomic per handle; placeholder determinism makes
/// cross-request coordination unnecessary.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn put(&self, record: TokenRecord) -> Result<()>;
    async fn get(&self, handle: &str) -> Result<Option<TokenRecord>>;
    async fn extend_ttl(&self, handle: &str, ttl: Duration) -> Result<()>;
}

/// Process-local store for single-node deployments.
pub struct MemoryTokenStore {
    records: Arc<RwLock<HashMap<String, TokenRecord>>>,
    ttl: Duration,
}

impl MemoryTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Spawn the background sweep removing expired records every `TTL/10`.
    pub fn spawn_sweeper(&self) {
        let records = self.records.clone();
        let interval = self.ttl / 10;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let mut map = records.write().await;
                let before = map.len();
                map.retain(|_, record| record.expires_at >= now);
                let swept = before - map.len();
                drop(map);
                if swept > 0 {
                    tracing::debug!(swept, "Swept expired token records");
                }
            }
        });
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, record: TokenRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.handle.clone(), record);
        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Option<TokenRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(handle)
            .filter(|record| !record.is_expired())
            .cloned())
    }

    async fn extend_ttl(&self, handle: &str, ttl: Duration) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(handle) {
            record.expires_at = Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(conversation_id: &str, ttl: Duration) -> TokenRecord {
        let mut record = TokenRecord::new(conversation_id, ttl);
        record.insert(
            "«token:PII:deadbeef»".to_string(),
            Category::Pii,
            "alice@ex.com".to_string(),
        );
        record
    }

    #[test]
    fn test_handle_shape_and_uniqueness() {
        let a = new_handle();
        let b = new_handle();
        assert!(a.starts_with("tm_"));
        // 128 bits in base32 -> 26 characters
        assert_eq!(a.len(), 3 + 26);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));
        let record = record_with("c1", Duration::from_secs(60));
        let handle = record.handle.clone();

        store.put(record).await.unwrap();
        let loaded = store.get(&handle).await.unwrap().unwrap();
        assert_eq!(loaded.conversation_id, "c1");
        assert_eq!(loaded.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_handle() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));
        assert!(store.get("tm_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_record_not_returned() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));
        let mut record = record_with("c1", Duration::from_secs(60));
        record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let handle = record.handle.clone();

        store.put(record).await.unwrap();
        assert!(store.get(&handle).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extend_ttl() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));
        let mut record = record_with("c1", Duration::from_secs(60));
        record.expires_at = Utc::now() + chrono::Duration::seconds(1);
        let handle = record.handle.clone();
        store.put(record).await.unwrap();

        store
            .extend_ttl(&handle, Duration::from_secs(3600))
            .await
            .unwrap();
        let loaded = store.get(&handle).await.unwrap().unwrap();
        assert!(loaded.expires_at > Utc::now() + chrono::Duration::seconds(3000));
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired() {
        let store = MemoryTokenStore::new(Duration::from_secs(10));
        let mut expired = record_with("c1", Duration::from_secs(60));
        expired.expires_at = Utc::now() - chrono::Duration::seconds(5);
        let live = record_with("c2", Duration::from_secs(600));

        store.put(expired).await.unwrap();
        store.put(live).await.unwrap();
        assert_eq!(store.len().await, 2);

        store.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.len().await, 1);
    }
}
