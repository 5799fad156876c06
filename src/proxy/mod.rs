//! Transparent proxy
//!
//! Drives the redact → forward → detokenize pipeline behind provider-shaped
//! endpoints. Per request: derive the context from headers, redact every
//! message into a single token record, enforce the policy decision, forward
//! the sanitized body with credentials passed through verbatim, and restore
//! allowed placeholders on the way back — incrementally for SSE responses.

pub mod adapter;
pub mod anthropic;
pub mod google;
pub mod openai;
pub mod stream;

pub use adapter::{collect_texts, ProviderAdapter};
pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::audit::{AuditLogger, AuditRecord};
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::pipeline::GatePipeline;
use crate::policy::Action;
use crate::safety::SafetyFilter;
use crate::token::store::TokenEntry;
use crate::token::TokenRecord;
use crate::types::{Category, Context, Observation};
use stream::{SseSplitter, StreamDetokenizer, SSE_DONE};

/// Stateless adapter instances shared across requests.
pub static OPENAI: OpenAiAdapter = OpenAiAdapter;
pub static ANTHROPIC: AnthropicAdapter = AnthropicAdapter;
pub static GOOGLE: GoogleAdapter = GoogleAdapter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum silence between upstream SSE frames.
const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Headers never forwarded upstream.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "expect",
    "te",
    "trailer",
    "proxy-authorization",
    "proxy-connection",
    "accept-encoding",
];

/// The provider-facing proxy pipeline.
pub struct ProxyService {
    pipeline: Arc<GatePipeline>,
    audit: Arc<AuditLogger>,
    config: Arc<GateConfig>,
    safety: Arc<SafetyFilter>,
    client: reqwest::Client,
}

impl ProxyService {
    pub fn new(
        pipeline: Arc<GatePipeline>,
        audit: Arc<AuditLogger>,
        config: Arc<GateConfig>,
        safety: Arc<SafetyFilter>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            pipeline,
            audit,
            config,
            safety,
            client,
        })
    }

    /// Derive the request context from the `X-MCP-*` headers.
    pub fn context_from_headers(
        &self,
        adapter: &dyn ProviderAdapter,
        headers: &HeaderMap,
    ) -> Context {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Context {
            caller: get("x-mcp-caller").unwrap_or_else(|| format!("{}-proxy", adapter.name())),
            region: get("x-mcp-region").unwrap_or_else(|| self.config.default_region.clone()),
            env: get("x-mcp-env").unwrap_or_else(|| self.config.default_env.clone()),
            conversation_id: get("x-mcp-conversation-id")
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Entry point for the provider route handlers.
    pub async fn handle(
        &self,
        adapter: &'static dyn ProviderAdapter,
        upstream_base: &str,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let context = self.context_from_headers(adapter, &headers);
        match self
            .process(adapter, upstream_base, path_and_query, &headers, body, &context)
            .await
        {
            Ok(response) => response,
            Err(err) => provider_error_response(adapter, &err),
        }
    }

    async fn process(
        &self,
        adapter: &'static dyn ProviderAdapter,
        upstream_base: &str,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        context: &Context,
    ) -> Result<Response> {
        if body.len() > self.config.max_payload_bytes {
            return Err(GateError::InvalidInput(
                "Payload exceeds MAX_PAYLOAD_BYTES".to_string(),
            ));
        }
        let mut body_json: Value = serde_json::from_slice(&body)
            .map_err(|e| GateError::InvalidInput(format!("Malformed JSON body: {e}")))?;

        // Scan every message, union the observed categories
        let texts = collect_texts(adapter, &body_json, false);
        let mut scans = Vec::with_capacity(texts.len());
        let mut categories: BTreeSet<Category> = BTreeSet::new();
        let mut observations: Vec<Observation> = Vec::new();
        for text in &texts {
            let scan = self.pipeline.scan(text)?;
            categories.extend(scan.categories.iter().copied());
            merge_observations(&mut observations, &scan.observations);
            scans.push(scan);
        }

        let decision = self.pipeline.policy().decide(&categories, context);
        self.audit
            .write(
                &AuditRecord::new("route", context, body.len())
                    .with_categories(observations.clone())
                    .with_decision(decision.clone())
                    .with_target(decision.target_model.clone()),
            )
            .await;

        // Block before any upstream contact; no token record is created
        if decision.action == Action::Block {
            return Err(GateError::PolicyBlocked(decision.reason));
        }

        // Redact every message into a single record: one handle per request,
        // and placeholder determinism merges repeats across messages
        let mut record = TokenRecord::new(&context.conversation_id, self.pipeline.token_ttl());
        let mut sanitized = Vec::with_capacity(texts.len());
        let mut counts: HashMap<String, usize> = HashMap::new();
        for (text, scan) in texts.iter().zip(&scans) {
            let (clean, events) = self.pipeline.apply_spans(text, &scan.spans, &mut record);
            for event in &events {
                *counts.entry(event.category.as_str().to_string()).or_insert(0) += 1;
            }
            sanitized.push(clean);
        }

        let mut replacements = sanitized.into_iter();
        adapter.rewrite_request_texts(&mut body_json, &mut |_| replacements.next());

        self.audit
            .write(
                &AuditRecord::new("redact", context, body.len())
                    .with_categories(observations)
                    .with_redaction_counts(counts),
            )
            .await;

        let entries = record.entries.clone();
        let handle = record.handle.clone();
        self.pipeline.store().put(record).await?;

        // Model override for internal-only routing
        let mut path = path_and_query.to_string();
        if decision.action == Action::InternalOnly {
            if let Some(target) = &decision.target_model {
                if adapter.model(&body_json).as_deref() != Some(target.as_str()) {
                    adapter.set_model(&mut body_json, target);
                }
                path = adapter.rewrite_path(&path, target);
            }
        }

        let stream_requested =
            adapter.is_stream(&body_json) || path.contains(":streamGenerateContent");

        let url = format!("{}{}", upstream_base.trim_end_matches('/'), path);
        let upstream = self
            .client
            .post(&url)
            .headers(forwarded_headers(headers))
            .json(&body_json)
            .send()
            .await?;

        let status = upstream.status();
        if !status.is_success() {
            // Relay status and body verbatim, no detokenization on error
            // bodies, but still audit the status code
            let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
            let bytes = upstream.bytes().await.unwrap_or_default();
            self.audit
                .write(
                    &AuditRecord::new("upstream_error", context, bytes.len())
                        .with_upstream_status(status.as_u16()),
                )
                .await;
            let mut response = Response::builder().status(status.as_u16());
            if let Some(ct) = content_type {
                response = response.header(header::CONTENT_TYPE, ct);
            }
            return Ok(response.body(Body::from(bytes)).unwrap_or_default());
        }

        // The same placeholders can reappear later in this conversation;
        // keep the record alive
        self.pipeline
            .store()
            .extend_ttl(&handle, self.pipeline.token_ttl())
            .await?;

        let allowed = decision.allowed_detokenize_categories.clone();
        let model = adapter.model(&body_json).unwrap_or_default();

        if stream_requested {
            tracing::debug!(provider = adapter.name(), "Relaying streaming response");
            Ok(self.relay_stream(adapter, upstream, entries, allowed, model))
        } else {
            let mut response_json: Value = upstream.json().await?;
            adapter.rewrite_response_texts(&mut response_json, &mut |text| {
                let (restored, _) = self.pipeline.restore(text, &entries, &allowed);
                Some(self.safety.annotate(&restored))
            });
            Ok((StatusCode::OK, axum::Json(response_json)).into_response())
        }
    }

    /// Relay an SSE response, detokenizing textual deltas through the
    /// rolling buffer. Frame boundaries are preserved; the buffer remainder
    /// is flushed as one synthesized delta frame before the terminator.
    fn relay_stream(
        &self,
        adapter: &'static dyn ProviderAdapter,
        upstream: reqwest::Response,
        entries: HashMap<String, TokenEntry>,
        allowed: BTreeSet<Category>,
        model: String,
    ) -> Response {
        let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, std::convert::Infallible>>(16);
        let mut detok = StreamDetokenizer::new(
            self.pipeline.placeholder_regex().clone(),
            entries,
            allowed,
        );

        tokio::spawn(async move {
            let mut splitter = SseSplitter::new();
            let mut upstream_bytes = upstream.bytes_stream();

            loop {
                let chunk =
                    match tokio::time::timeout(IDLE_READ_TIMEOUT, upstream_bytes.next()).await {
                        Err(_) => {
                            tracing::warn!(provider = adapter.name(), "Upstream idle timeout");
                            let err = adapter.error_body(
                                504,
                                "Upstream idle timeout between frames",
                                "upstream_timeout",
                            );
                            let _ = tx.send(Ok(data_frame(&err))).await;
                            return;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            tracing::warn!(provider = adapter.name(), "Upstream stream error: {e}");
                            let err =
                                adapter.error_body(502, &e.to_string(), "upstream_error");
                            let _ = tx.send(Ok(data_frame(&err))).await;
                            return;
                        }
                        Ok(Some(Ok(chunk))) => chunk,
                    };

                for frame in splitter.push(&chunk) {
                    let (out, is_done) = process_frame(adapter, &mut detok, &frame);
                    if is_done {
                        // Flush held bytes before forwarding the terminator
                        let rest = detok.finish();
                        if !rest.is_empty() {
                            let synth = adapter.delta_frame(&model, &rest);
                            if tx.send(Ok(data_frame(&synth))).await.is_err() {
                                return;
                            }
                        }
                    }
                    if tx.send(Ok(frame_bytes(&out))).await.is_err() {
                        // Client went away; dropping the upstream response
                        // closes the connection
                        return;
                    }
                }
            }

            // Stream ended without a terminator frame: flush what remains
            if let Some(tail) = splitter.finish() {
                let (out, _) = process_frame(adapter, &mut detok, &tail);
                if tx.send(Ok(frame_bytes(&out))).await.is_err() {
                    return;
                }
            }
            let rest = detok.finish();
            if !rest.is_empty() {
                let synth = adapter.delta_frame(&model, &rest);
                let _ = tx.send(Ok(data_frame(&synth))).await;
            }
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(ReceiverStream::new(rx)))
            .unwrap_or_default()
    }
}

/// Rewrite one SSE frame: every `data:` JSON line flows its textual delta
/// through the detokenizer; `[DONE]` and non-JSON lines pass through.
fn process_frame(
    adapter: &dyn ProviderAdapter,
    detok: &mut StreamDetokenizer,
    frame: &str,
) -> (String, bool) {
    let mut lines = Vec::new();
    let mut done = false;

    for line in frame.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            lines.push(line.to_string());
            continue;
        };
        let data = data.trim_start();
        if data == SSE_DONE {
            done = true;
            lines.push(line.to_string());
            continue;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(mut json) => {
                adapter.rewrite_delta_text(&mut json, &mut |text| Some(detok.push(text)));
                lines.push(format!("data: {json}"));
            }
            Err(_) => lines.push(line.to_string()),
        }
    }
    (lines.join("\n"), done)
}

fn frame_bytes(frame: &str) -> Bytes {
    Bytes::from(format!("{frame}\n\n"))
}

fn data_frame(json: &Value) -> Bytes {
    Bytes::from(format!("data: {json}\n\n"))
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn provider_error_response(adapter: &dyn ProviderAdapter, err: &GateError) -> Response {
    let status = err.status();
    let kind = match err {
        GateError::InvalidInput(_) => "invalid_request_error",
        GateError::PolicyBlocked(_) => "policy_blocked",
        GateError::Forbidden(_) => "forbidden",
        GateError::BackendUnavailable(_) => "backend_unavailable",
        GateError::Http(_) | GateError::Upstream { .. } => "upstream_error",
        _ => "server_error",
    };
    let body = adapter.error_body(status.as_u16(), &err.to_string(), kind);
    (status, axum::Json(body)).into_response()
}

fn merge_observations(into: &mut Vec<Observation>, add: &[Observation]) {
    for obs in add {
        match into.iter_mut().find(|o| o.category == obs.category) {
            Some(existing) => {
                if obs.confidence > existing.confidence {
                    existing.confidence = obs.confidence;
                }
            }
            None => into.push(obs.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{placeholder, PLACEHOLDER_PATTERN};
    use regex::Regex;

    fn empty_detok() -> StreamDetokenizer {
        StreamDetokenizer::new(
            Regex::new(PLACEHOLDER_PATTERN).unwrap(),
            HashMap::new(),
            BTreeSet::new(),
        )
    }

    fn detok_with(category: Category, original: &str) -> (StreamDetokenizer, String) {
        let salt = b"0123456789abcdef-salt";
        let ph = placeholder(salt, "c1", category, original);
        let mut entries = HashMap::new();
        entries.insert(
            ph.clone(),
            TokenEntry {
                category,
                original: original.to_string(),
                created_at: chrono::Utc::now(),
            },
        );
        let allowed: BTreeSet<Category> = [category].into_iter().collect();
        (
            StreamDetokenizer::new(Regex::new(PLACEHOLDER_PATTERN).unwrap(), entries, allowed),
            ph,
        )
    }

    #[test]
    fn test_process_frame_rewrites_delta() {
        let (mut detok, ph) = detok_with(Category::Pii, "alice@ex.com");
        let frame = format!(
            r#"data: {{"choices":[{{"index":0,"delta":{{"content":"mail {ph} ok"}}}}]}}"#
        );
        let (out, done) = process_frame(&OPENAI, &mut detok, &frame);
        assert!(!done);
        assert!(out.contains("alice@ex.com"));
        assert!(!out.contains(&ph));
    }

    #[test]
    fn test_process_frame_done_marker() {
        let mut detok = empty_detok();
        let (out, done) = process_frame(&OPENAI, &mut detok, "data: [DONE]");
        assert!(done);
        assert_eq!(out, "data: [DONE]");
    }

    #[test]
    fn test_process_frame_passes_event_lines() {
        let mut detok = empty_detok();
        let frame = "event: message_start\ndata: {\"type\":\"message_start\"}";
        let (out, done) = process_frame(&ANTHROPIC, &mut detok, frame);
        assert!(!done);
        assert!(out.starts_with("event: message_start\n"));
    }

    #[test]
    fn test_process_frame_keeps_non_json_data() {
        let mut detok = empty_detok();
        let (out, done) = process_frame(&OPENAI, &mut detok, "data: not json");
        assert!(!done);
        assert_eq!(out, "data: not json");
    }

    #[test]
    fn test_forwarded_headers_filter() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-test".parse().unwrap());
        headers.insert("host", "proxy.local".parse().unwrap());
        headers.insert("content-length", "42".parse().unwrap());
        headers.insert("x-api-key", "anthropic-key".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());

        let forwarded = forwarded_headers(&headers);
        assert_eq!(forwarded.get("authorization").unwrap(), "Bearer sk-test");
        assert_eq!(forwarded.get("x-api-key").unwrap(), "anthropic-key");
        assert!(forwarded.get("host").is_none());
        assert!(forwarded.get("content-length").is_none());
        assert!(forwarded.get("connection").is_none());
    }

    #[test]
    fn test_merge_observations_keeps_max_confidence() {
        let mut into = vec![Observation {
            category: Category::Pii,
            confidence: 0.5,
        }];
        merge_observations(
            &mut into,
            &[
                Observation {
                    category: Category::Pii,
                    confidence: 0.9,
                },
                Observation {
                    category: Category::Secret,
                    confidence: 0.95,
                },
            ],
        );
        assert_eq!(into.len(), 2);
        assert!((into[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_provider_error_response_shapes() {
        let response = provider_error_response(
            &OPENAI,
            &GateError::PolicyBlocked("matched block-secrets".to_string()),
        );
        assert_eq!(response.status().as_u16(), 451);

        let response =
            provider_error_response(&GOOGLE, &GateError::InvalidInput("bad json".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
