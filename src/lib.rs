//! # veilgate
//!
//! A pre-flight / post-flight firewall for LLM traffic. Veilgate sits
//! between applications and third-party LLM providers, detects sensitive
//! content in outbound prompts, replaces it with reversible placeholders,
//! enforces a per-caller / per-region policy, forwards sanitized requests to
//! the matching upstream, and selectively restores non-secret placeholders
//! on the return path. Every decision lands in an append-only local audit
//! log, optionally shipped to a SIEM.
//!
//! ## Pipeline
//!
//! - **detect** — sensitive-span finder with checksum validators and overlap
//!   resolution
//! - **classify** — export-control keyword scorer
//! - **policy** — geo × caller × category decision machine
//! - **token** — deterministic placeholders and encrypted token storage
//! - **proxy** — streaming-aware adapters for the OpenAI, Anthropic and
//!   Google wire formats
//! - **audit** — local JSONL log plus buffered SIEM shipping
//! - **safety** — dangerous-command filter for model output

pub mod audit;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod proxy;
pub mod safety;
pub mod server;
pub mod token;
pub mod types;

// Re-export core types
pub use config::{GateConfig, TokenBackend};
pub use error::{GateError, Result};
pub use pipeline::{GatePipeline, RedactOutcome, ScanOutcome};
pub use policy::{Action, Decision, PolicyDocument, PolicyEngine};
pub use types::{Category, Context, Observation, Span};
