//! Audit pipeline
//!
//! Every request produces at least one audit record. Records are appended to
//! a local JSONL file (one JSON object per line, single `write` per record so
//! kernel append semantics keep concurrent writers serialized) and optionally
//! shipped to a SIEM out of the critical path. The raw payload is never part
//! of a record; only counts, types and sizes.

pub mod siem;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::SiemConfig;
use crate::error::Result;
use crate::policy::Decision;
use crate::types::{Context, Observation};

/// A single audit record. Contains no payload content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub context: Context,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<Observation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub redaction_counts: HashMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_count: Option<usize>,
    pub payload_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl AuditRecord {
    pub fn new(action: &str, context: &Context, payload_bytes: usize) -> Self {
        Self {
            ts: Utc::now(),
            action: action.to_string(),
            context: context.clone(),
            categories: Vec::new(),
            decision: None,
            redaction_counts: HashMap::new(),
            restored_count: None,
            payload_bytes,
            upstream_status: None,
            target: None,
        }
    }

    pub fn with_categories(mut self, categories: Vec<Observation>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_redaction_counts(mut self, counts: HashMap<String, usize>) -> Self {
        self.redaction_counts = counts;
        self
    }

    pub fn with_restored_count(mut self, count: usize) -> Self {
        self.restored_count = Some(count);
        self
    }

    pub fn with_upstream_status(mut self, status: u16) -> Self {
        self.upstream_status = Some(status);
        self
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }
}

/// The append-only JSONL file. Opened in append mode per write; each record
/// is one `write_all` of `line + '\n'`.
pub struct LocalAuditLog {
    path: PathBuf,
}

impl LocalAuditLog {
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub async fn append(&self, record: &serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Case-insensitive substring search over the log, newest first.
    pub async fn query(&self, q: Option<&str>, limit: usize) -> Vec<serde_json::Value> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let needle = q.map(str::to_lowercase);

        let mut results = Vec::new();
        for line in content.lines().rev() {
            if results.len() >= limit {
                break;
            }
            if let Some(ref needle) = needle {
                if !line.to_lowercase().contains(needle) {
                    continue;
                }
            }
            if let Ok(value) = serde_json::from_str(line) {
                results.push(value);
            }
        }
        results
    }
}

/// Front door for the audit pipeline: local log first, then a non-blocking
/// enqueue toward the SIEM shipper.
pub struct AuditLogger {
    local: Arc<LocalAuditLog>,
    siem_tx: Option<mpsc::Sender<serde_json::Value>>,
    dropped: Arc<AtomicU64>,
    siem_enabled: bool,
}

impl AuditLogger {
    /// Open the local log and, when configured, start the SIEM shipper.
    pub async fn new(path: &Path, siem_config: &SiemConfig) -> Result<Self> {
        let local = Arc::new(LocalAuditLog::new(path).await?);
        let dropped = Arc::new(AtomicU64::new(0));

        let siem_tx = match siem::create_sink(siem_config).await? {
            Some(sink) => Some(siem::spawn_shipper(
                sink,
                local.clone(),
                siem_config.batch_size,
                siem_config.flush_interval,
                dropped.clone(),
            )),
            None => None,
        };

        Ok(Self {
            siem_enabled: siem_tx.is_some(),
            local,
            siem_tx,
            dropped,
        })
    }

    pub fn siem_enabled(&self) -> bool {
        self.siem_enabled
    }

    /// Write a record. The local log is always written, even on SIEM
    /// failure; a full SIEM queue drops the record and bumps the counter.
    /// Never fails the request path.
    pub async fn write(&self, record: &AuditRecord) {
        let value = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("Failed to serialize audit record: {e}");
                return;
            }
        };

        if let Err(e) = self.local.append(&value).await {
            tracing::error!("Failed to write local audit record: {e}");
        }

        if let Some(tx) = &self.siem_tx {
            if tx.try_send(value).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn query(&self, q: Option<&str>, limit: usize) -> Vec<serde_json::Value> {
        self.local.query(q, limit).await
    }

    #[cfg(test)]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Action;
    use crate::types::Category;
    use std::collections::BTreeSet;

    fn ctx() -> Context {
        Context {
            caller: "user".to_string(),
            region: "us".to_string(),
            env: "prod".to_string(),
            conversation_id: "c1".to_string(),
        }
    }

    fn decision(action: Action) -> Decision {
        Decision {
            action,
            target_model: Some("openai:gpt-4o".to_string()),
            requires_redaction: action == Action::Redact,
            allowed_detokenize_categories: BTreeSet::new(),
            policy_version: 3,
            reason: "matched test route".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path, &SiemConfig::default()).await.unwrap();

        let record = AuditRecord::new("classify", &ctx(), 42)
            .with_categories(vec![Observation {
                category: Category::Pii,
                confidence: 0.85,
            }])
            .with_decision(decision(Action::Redact));
        logger.write(&record).await;
        logger
            .write(&AuditRecord::new("route", &ctx(), 10).with_decision(decision(Action::Allow)))
            .await;

        let all = logger.query(None, 100).await;
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0]["action"], "route");

        let filtered = logger.query(Some("classify"), 100).await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["action"], "classify");
        assert_eq!(filtered[0]["payload_bytes"], 42);
    }

    #[tokio::test]
    async fn test_query_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path, &SiemConfig::default()).await.unwrap();

        for _ in 0..5 {
            logger.write(&AuditRecord::new("redact", &ctx(), 1)).await;
        }
        assert_eq!(logger.query(None, 3).await.len(), 3);
    }

    #[tokio::test]
    async fn test_record_never_contains_payload() {
        let record = AuditRecord::new("redact", &ctx(), 64).with_redaction_counts(
            [("pii".to_string(), 2)].into_iter().collect(),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("redaction_counts"));
        assert!(json.contains("payload_bytes"));
        // Only structural fields exist; there is no payload field to leak
        assert!(!json.contains("payload\":"));
    }

    #[tokio::test]
    async fn test_query_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = LocalAuditLog::new(&dir.path().join("missing.jsonl"))
            .await
            .unwrap();
        assert!(log.query(None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_ts_is_rfc3339() {
        let record = AuditRecord::new("route", &ctx(), 0);
        let value = serde_json::to_value(&record).unwrap();
        let ts = value["ts"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
