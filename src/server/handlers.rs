//! HTTP handlers for the core API surface
//!
//! Request bodies are parsed from raw bytes so malformed JSON and missing
//! context fields map to `InvalidInput` (400) instead of the framework's
//! default rejection.

use std::collections::BTreeSet;
use std::collections::HashMap;

use axum::extract::{OriginalUri, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::audit::AuditRecord;
use crate::error::{GateError, Result};
use crate::pipeline::RedactionEvent;
use crate::policy::{Action, Decision};
use crate::proxy;
use crate::types::{Category, Context, Observation};

use super::state::AppState;

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub payload: Value,
    pub context: Context,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub ok: bool,
    pub categories: Vec<Observation>,
    pub decision: Decision,
    pub suggested_action: Action,
}

#[derive(Debug, Deserialize)]
pub struct RedactRequest {
    pub payload: Value,
    pub context: Context,
}

#[derive(Debug, Serialize)]
pub struct RedactResponse {
    pub ok: bool,
    pub sanitized_payload: String,
    pub token_map_handle: String,
    pub redactions: Vec<RedactionEvent>,
}

#[derive(Debug, Deserialize)]
pub struct DetokenizeRequest {
    pub payload: Value,
    pub token_map_handle: String,
    #[serde(default)]
    pub allow_categories: Vec<Category>,
    pub context: Context,
}

#[derive(Debug, Serialize)]
pub struct DetokenizeResponse {
    pub ok: bool,
    pub restored_payload: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub model_request: ModelRequest,
    pub context: Context,
}

#[derive(Debug, Serialize)]
pub struct ExecutionStep {
    pub tool: String,
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub ok: bool,
    pub decision: Decision,
    pub pre_steps: Vec<ExecutionStep>,
    pub post_steps: Vec<ExecutionStep>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQueryRequest {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default = "default_query_limit")]
    pub limit: usize,
}

fn default_query_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub token_backend: &'static str,
    pub policy_version: u32,
    pub siem_enabled: bool,
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_request<T: DeserializeOwned>(state: &AppState, body: &Bytes) -> Result<T> {
    if body.len() > state.config.max_payload_bytes {
        return Err(GateError::InvalidInput(
            "Payload exceeds MAX_PAYLOAD_BYTES".to_string(),
        ));
    }
    serde_json::from_slice(body).map_err(|e| GateError::InvalidInput(format!("{e}")))
}

/// String payloads are used as-is; structured payloads are serialized.
fn payload_text(payload: &Value) -> Result<String> {
    match payload {
        Value::String(text) => Ok(text.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

// ============================================================================
// Core endpoints
// ============================================================================

/// GET /health - liveness and configuration summary.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        token_backend: state.config.token_backend.as_str(),
        policy_version: state.pipeline.policy().version(),
        siem_enabled: state.audit.siem_enabled(),
    })
}

/// POST /classify - categories and suggested action, payload untouched.
pub async fn classify(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ClassifyResponse>> {
    let request: ClassifyRequest = parse_request(&state, &body)?;
    let text = payload_text(&request.payload)?;

    let scan = state.pipeline.scan(&text)?;
    let decision = state.pipeline.decide(&scan, &request.context);

    state
        .audit
        .write(
            &AuditRecord::new("classify", &request.context, text.len())
                .with_categories(scan.observations.clone())
                .with_decision(decision.clone()),
        )
        .await;

    Ok(Json(ClassifyResponse {
        ok: true,
        categories: scan.observations,
        suggested_action: decision.action,
        decision,
    }))
}

/// POST /redact - sanitized payload plus a token map handle; 451 on block.
pub async fn redact(State(state): State<AppState>, body: Bytes) -> Result<Json<RedactResponse>> {
    let request: RedactRequest = parse_request(&state, &body)?;
    let text = payload_text(&request.payload)?;

    let scan = state.pipeline.scan(&text)?;
    let decision = state.pipeline.decide(&scan, &request.context);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for span in &scan.spans {
        *counts.entry(span.category.as_str().to_string()).or_insert(0) += 1;
    }
    state
        .audit
        .write(
            &AuditRecord::new("redact", &request.context, text.len())
                .with_categories(scan.observations.clone())
                .with_decision(decision.clone())
                .with_redaction_counts(counts),
        )
        .await;

    if decision.action == Action::Block {
        return Err(GateError::PolicyBlocked(decision.reason));
    }

    let (sanitized, handle, redactions) = state
        .pipeline
        .commit(&text, &scan.spans, &request.context.conversation_id)
        .await?;

    Ok(Json(RedactResponse {
        ok: true,
        sanitized_payload: sanitized,
        token_map_handle: handle,
        redactions,
    }))
}

/// POST /detokenize - restore allowed tokens; 403 untrusted, 410 expired.
pub async fn detokenize(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DetokenizeResponse>> {
    let request: DetokenizeRequest = parse_request(&state, &body)?;
    let text = payload_text(&request.payload)?;
    let allow: BTreeSet<Category> = request.allow_categories.iter().copied().collect();

    let (restored, count) = state
        .pipeline
        .detokenize(&text, &request.token_map_handle, &allow, &request.context.caller)
        .await?;

    state
        .audit
        .write(
            &AuditRecord::new("detokenize", &request.context, text.len())
                .with_restored_count(count),
        )
        .await;

    Ok(Json(DetokenizeResponse {
        ok: true,
        restored_payload: restored,
    }))
}

/// POST /route - dry-run of the policy with an execution plan.
pub async fn route_plan(State(state): State<AppState>, body: Bytes) -> Result<Json<RouteResponse>> {
    let request: RouteRequest = parse_request(&state, &body)?;
    let text = &request.model_request.text;

    let scan = state.pipeline.scan(text)?;
    let decision = state.pipeline.decide(&scan, &request.context);

    state
        .audit
        .write(
            &AuditRecord::new("route", &request.context, text.len())
                .with_categories(scan.observations.clone())
                .with_decision(decision.clone())
                .with_target(decision.target_model.clone()),
        )
        .await;

    if decision.action == Action::Block {
        return Ok(Json(RouteResponse {
            ok: false,
            decision,
            pre_steps: Vec::new(),
            post_steps: Vec::new(),
        }));
    }

    let mut pre_steps = Vec::new();
    let mut post_steps = Vec::new();
    if decision.requires_redaction {
        pre_steps.push(ExecutionStep {
            tool: "redact".to_string(),
            args: serde_json::json!({}),
        });
        if !decision.allowed_detokenize_categories.is_empty() {
            post_steps.push(ExecutionStep {
                tool: "detokenize".to_string(),
                args: serde_json::json!({
                    "allow_categories": &decision.allowed_detokenize_categories
                }),
            });
        }
    }
    post_steps.push(ExecutionStep {
        tool: "output_safety".to_string(),
        args: serde_json::json!({ "mode": state.config.safety_mode }),
    });

    Ok(Json(RouteResponse {
        ok: true,
        decision,
        pre_steps,
        post_steps,
    }))
}

/// POST /audit/query - substring search over the local audit log.
pub async fn audit_query(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request: AuditQueryRequest = parse_request(&state, &body)?;
    let records = state.audit.query(request.q.as_deref(), request.limit).await;
    Ok(Json(serde_json::json!({ "records": records })).into_response())
}

// ============================================================================
// Proxy endpoints
// ============================================================================

/// POST /v1/chat/completions - OpenAI proxy, streaming and non-streaming.
pub async fn proxy_openai(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map_or("/v1/chat/completions", |pq| pq.as_str());
    state
        .proxy
        .handle(
            &proxy::OPENAI,
            &state.config.upstream_openai_url,
            path,
            headers,
            body,
        )
        .await
}

/// POST /v1/messages - Anthropic proxy.
pub async fn proxy_anthropic(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map_or("/v1/messages", |pq| pq.as_str());
    state
        .proxy
        .handle(
            &proxy::ANTHROPIC,
            &state.config.upstream_anthropic_url,
            path,
            headers,
            body,
        )
        .await
}

/// POST /v1{beta,}/models/{model}:generateContent - Google proxy.
pub async fn proxy_google(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str()).to_string();
    state
        .proxy
        .handle(
            &proxy::GOOGLE,
            &state.config.upstream_google_url,
            &path,
            headers,
            body,
        )
        .await
}
