//! SIEM shippers
//!
//! Pluggable sinks (Splunk HEC, Elasticsearch bulk, Datadog logs, syslog UDP)
//! behind a bounded in-memory queue. Shipping is out of the request path: the
//! logger enqueues without blocking, a background worker drains the queue
//! into batches, and a full queue drops records while counting the drops so
//! the worker can audit them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::audit::LocalAuditLog;
use crate::config::SiemConfig;
use crate::error::{GateError, Result};

/// Capacity of the in-memory shipping queue.
const QUEUE_CAPACITY: usize = 1000;

/// A destination for audit record batches.
#[async_trait]
pub trait SiemSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn ship_batch(&self, records: &[serde_json::Value]) -> Result<()>;
}

/// Splunk HTTP Event Collector.
pub struct SplunkHecSink {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl SplunkHecSink {
    pub fn new(hec_url: &str, token: &str) -> Self {
        Self {
            endpoint: format!("{}/services/collector/event", hec_url.trim_end_matches('/')),
            token: token.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SiemSink for SplunkHecSink {
    fn name(&self) -> &'static str {
        "splunk"
    }

    async fn ship_batch(&self, records: &[serde_json::Value]) -> Result<()> {
        // HEC accepts concatenated event objects in one request body
        let mut body = String::new();
        for record in records {
            let event = serde_json::json!({
                "time": record.get("ts"),
                "host": hostname(),
                "source": "veilgate",
                "sourcetype": "_json",
                "event": record,
            });
            body.push_str(&serde_json::to_string(&event)?);
            body.push('\n');
        }

        self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Splunk {}", self.token))
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Elasticsearch `_bulk` API with daily indices.
pub struct ElasticsearchSink {
    base_url: String,
    index: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ElasticsearchSink {
    pub fn new(url: &str, index: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SiemSink for ElasticsearchSink {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn ship_batch(&self, records: &[serde_json::Value]) -> Result<()> {
        let index = format!("{}-{}", self.index, Utc::now().format("%Y.%m.%d"));

        let mut body = String::new();
        for record in records {
            let mut doc = record.clone();
            if let Some(map) = doc.as_object_mut() {
                map.insert("@timestamp".to_string(), record["ts"].clone());
            }
            body.push_str(&serde_json::to_string(
                &serde_json::json!({"index": {"_index": index}}),
            )?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&doc)?);
            body.push('\n');
        }

        let mut request = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("ApiKey {key}"));
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Datadog Logs intake.
pub struct DatadogSink {
    intake_url: String,
    api_key: String,
    service: String,
    client: reqwest::Client,
}

impl DatadogSink {
    pub fn new(api_key: &str, site: &str, service: &str) -> Self {
        Self {
            intake_url: format!("https://http-intake.logs.{site}/api/v2/logs"),
            api_key: api_key.to_string(),
            service: service.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SiemSink for DatadogSink {
    fn name(&self) -> &'static str {
        "datadog"
    }

    async fn ship_batch(&self, records: &[serde_json::Value]) -> Result<()> {
        let payloads: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                let env = record["context"]["env"].as_str().unwrap_or("unknown");
                let caller = record["context"]["caller"].as_str().unwrap_or("unknown");
                serde_json::json!({
                    "ddsource": "veilgate",
                    "ddtags": format!("env:{env},caller:{caller}"),
                    "hostname": hostname(),
                    "message": record.to_string(),
                    "service": self.service,
                })
            })
            .collect();

        self.client
            .post(&self.intake_url)
            .header("DD-API-KEY", &self.api_key)
            .json(&payloads)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// RFC 5424 syslog over UDP.
pub struct SyslogUdpSink {
    socket: UdpSocket,
    target: String,
    facility: u8,
}

impl SyslogUdpSink {
    pub async fn new(host: &str, port: u16, facility: u8) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target: format!("{host}:{port}"),
            facility,
        })
    }
}

#[async_trait]
impl SiemSink for SyslogUdpSink {
    fn name(&self) -> &'static str {
        "syslog"
    }

    async fn ship_batch(&self, records: &[serde_json::Value]) -> Result<()> {
        // facility * 8 + severity INFO(6)
        let priority = self.facility as u16 * 8 + 6;
        for record in records {
            let message = format!(
                "<{priority}>1 {} {} veilgate - - - {record}",
                Utc::now().to_rfc3339(),
                hostname(),
            );
            self.socket
                .send_to(message.as_bytes(), &self.target)
                .await?;
        }
        Ok(())
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "veilgate".to_string())
}

/// Build the configured sink, if any. Missing per-sink settings are fatal.
pub async fn create_sink(config: &SiemConfig) -> Result<Option<Arc<dyn SiemSink>>> {
    let sink: Arc<dyn SiemSink> = match config.siem_type.as_str() {
        "" | "none" => return Ok(None),
        "splunk" => {
            let (Some(url), Some(token)) = (&config.splunk_hec_url, &config.splunk_hec_token)
            else {
                return Err(GateError::Config(
                    "SPLUNK_HEC_URL and SPLUNK_HEC_TOKEN required for splunk".to_string(),
                ));
            };
            Arc::new(SplunkHecSink::new(url, token))
        }
        "elasticsearch" | "elk" => {
            let Some(url) = &config.elasticsearch_url else {
                return Err(GateError::Config(
                    "ELASTICSEARCH_URL required for elasticsearch".to_string(),
                ));
            };
            Arc::new(ElasticsearchSink::new(
                url,
                &config.elasticsearch_index,
                config.elasticsearch_api_key.clone(),
            ))
        }
        "datadog" => {
            let Some(api_key) = &config.datadog_api_key else {
                return Err(GateError::Config(
                    "DATADOG_API_KEY required for datadog".to_string(),
                ));
            };
            Arc::new(DatadogSink::new(
                api_key,
                &config.datadog_site,
                &config.datadog_service,
            ))
        }
        "syslog" => {
            let Some(host) = &config.syslog_host else {
                return Err(GateError::Config(
                    "SYSLOG_HOST required for syslog".to_string(),
                ));
            };
            Arc::new(SyslogUdpSink::new(host, config.syslog_port, config.syslog_facility).await?)
        }
        other => {
            return Err(GateError::Config(format!("Unknown SIEM_TYPE: {other}")));
        }
    };
    Ok(Some(sink))
}

/// Start the background worker and return the bounded queue's sender.
///
/// Batches flush at `batch_size` records or every `flush_interval`,
/// whichever comes first. Drops recorded in `dropped` are audited to the
/// local log on the next tick.
pub fn spawn_shipper(
    sink: Arc<dyn SiemSink>,
    local: Arc<LocalAuditLog>,
    batch_size: usize,
    flush_interval: Duration,
    dropped: Arc<AtomicU64>,
) -> mpsc::Sender<serde_json::Value> {
    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(QUEUE_CAPACITY);

    tokio::spawn(async move {
        let mut batch: Vec<serde_json::Value> = Vec::with_capacity(batch_size);
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= batch_size {
                            flush(&*sink, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&*sink, &mut batch).await;
                        tracing::info!(sink = sink.name(), "SIEM shipper stopped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let drops = dropped.swap(0, Ordering::Relaxed);
                    if drops > 0 {
                        let record = serde_json::json!({
                            "ts": Utc::now(),
                            "action": "siem_drop",
                            "dropped_records": drops,
                            "sink": sink.name(),
                        });
                        if let Err(e) = local.append(&record).await {
                            tracing::error!("Failed to audit SIEM drops: {e}");
                        }
                    }
                    if !batch.is_empty() {
                        flush(&*sink, &mut batch).await;
                    }
                }
            }
        }
    });

    tx
}

async fn flush(sink: &dyn SiemSink, batch: &mut Vec<serde_json::Value>) {
    if batch.is_empty() {
        return;
    }
    let records = std::mem::take(batch);
    if let Err(e) = sink.ship_batch(&records).await {
        // Shipping failures never surface to the caller
        tracing::error!(sink = sink.name(), count = records.len(), "SIEM ship failed: {e}");
    }
}
