//! Process configuration
//!
//! All options are read once from the environment at startup and shared
//! read-only across workers. A missing required variable is a fatal
//! `GateError::Config`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Which token-store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenBackend {
    Memory,
    Remote,
}

impl TokenBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenBackend::Memory => "memory",
            TokenBackend::Remote => "remote",
        }
    }
}

/// SIEM sink selection plus per-sink settings.
#[derive(Debug, Clone, Default)]
pub struct SiemConfig {
    /// `none`, `splunk`, `elasticsearch`, `datadog` or `syslog`
    pub siem_type: String,
    pub splunk_hec_url: Option<String>,
    pub splunk_hec_token: Option<String>,
    pub elasticsearch_url: Option<String>,
    pub elasticsearch_api_key: Option<String>,
    pub elasticsearch_index: String,
    pub datadog_api_key: Option<String>,
    pub datadog_site: String,
    pub datadog_service: String,
    pub syslog_host: Option<String>,
    pub syslog_port: u16,
    pub syslog_facility: u8,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl SiemConfig {
    pub fn enabled(&self) -> bool {
        !self.siem_type.is_empty() && self.siem_type != "none"
    }
}

/// User-configurable settings for the gateway.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Host address for the HTTP server (default: 127.0.0.1)
    pub host: String,
    /// Port for the HTTP server (default: 8019)
    pub port: u16,
    /// Process-wide HMAC salt for placeholder generation (>= 16 bytes)
    pub salt: Vec<u8>,
    /// Token-store backend
    pub token_backend: TokenBackend,
    /// KV service address, required for the remote backend
    pub remote_url: Option<String>,
    /// Key material for remote-store encryption, required for remote
    pub encryption_key: Option<String>,
    /// Path to the policy YAML document
    pub policy_path: PathBuf,
    /// Path to the append-only audit log
    pub audit_path: PathBuf,
    /// Reject payloads larger than this many bytes
    pub max_payload_bytes: usize,
    /// Token record lifetime
    pub token_ttl: Duration,
    /// Whether the transparent proxy endpoints are served
    pub proxy_enabled: bool,
    pub upstream_openai_url: String,
    pub upstream_anthropic_url: String,
    pub upstream_google_url: String,
    /// Region assumed when a proxy request carries no X-MCP-Region header
    pub default_region: String,
    /// Environment assumed when a proxy request carries no X-MCP-Env header
    pub default_env: String,
    /// Extra internal DNS suffixes for the detector
    pub internal_domain_suffixes: Vec<String>,
    /// Output safety filter mode: warning | block | silent
    pub safety_mode: String,
    pub siem: SiemConfig,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GateError::Config(format!("{name} is not a valid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str) -> bool {
    matches!(
        std::env::var(name).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl GateConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    /// Returns `GateError::Config` when `SALT_ENV` is missing or too short,
    /// when the remote backend is selected without `REMOTE_URL` /
    /// `ENCRYPTION_KEY`, or when a numeric variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let salt = std::env::var("SALT_ENV")
            .map_err(|_| GateError::Config("SALT_ENV is required".to_string()))?
            .into_bytes();
        if salt.len() < 16 {
            return Err(GateError::Config(
                "SALT_ENV must be at least 16 bytes".to_string(),
            ));
        }

        let token_backend = match env_or("TOKEN_BACKEND", "memory").as_str() {
            "memory" => TokenBackend::Memory,
            "remote" => TokenBackend::Remote,
            other => {
                return Err(GateError::Config(format!(
                    "Unknown TOKEN_BACKEND: {other}"
                )))
            }
        };

        let remote_url = env_opt("REMOTE_URL");
        let encryption_key = env_opt("ENCRYPTION_KEY");
        if token_backend == TokenBackend::Remote {
            if remote_url.is_none() {
                return Err(GateError::Config(
                    "REMOTE_URL is required when TOKEN_BACKEND=remote".to_string(),
                ));
            }
            if encryption_key.is_none() {
                return Err(GateError::Config(
                    "ENCRYPTION_KEY is required when TOKEN_BACKEND=remote".to_string(),
                ));
            }
        }

        let mut internal_domain_suffixes: Vec<String> =
            vec!["internal".to_string(), "local".to_string(), "corp".to_string()];
        if let Some(extra) = env_opt("INTERNAL_DOMAIN_SUFFIXES") {
            for suffix in extra.split(',') {
                let suffix = suffix.trim().trim_start_matches('.');
                if !suffix.is_empty() {
                    internal_domain_suffixes.push(suffix.to_string());
                }
            }
        }

        let siem = SiemConfig {
            siem_type: env_or("SIEM_TYPE", "none").to_lowercase(),
            splunk_hec_url: env_opt("SPLUNK_HEC_URL"),
            splunk_hec_token: env_opt("SPLUNK_HEC_TOKEN"),
            elasticsearch_url: env_opt("ELASTICSEARCH_URL"),
            elasticsearch_api_key: env_opt("ELASTICSEARCH_API_KEY"),
            elasticsearch_index: env_or("ELASTICSEARCH_INDEX", "veilgate-audit"),
            datadog_api_key: env_opt("DATADOG_API_KEY"),
            datadog_site: env_or("DATADOG_SITE", "datadoghq.com"),
            datadog_service: env_or("DATADOG_SERVICE", "veilgate"),
            syslog_host: env_opt("SYSLOG_HOST"),
            syslog_port: env_parse("SYSLOG_PORT", 514u16)?,
            syslog_facility: env_parse("SYSLOG_FACILITY", 16u8)?,
            batch_size: env_parse("SIEM_BATCH_SIZE", 100usize)?,
            flush_interval: Duration::from_secs(env_parse("SIEM_FLUSH_INTERVAL_SECS", 5u64)?),
        };

        Ok(Self {
            host: env_or("HOST", "127.0.0.1"),
            port: env_parse("PORT", 8019u16)?,
            salt,
            token_backend,
            remote_url,
            encryption_key,
            policy_path: PathBuf::from(env_or("POLICY_PATH", "policy.yaml")),
            audit_path: PathBuf::from(env_or("AUDIT_PATH", "audit/audit.jsonl")),
            max_payload_bytes: env_parse("MAX_PAYLOAD_BYTES", 262_144usize)?,
            token_ttl: Duration::from_secs(env_parse("TOKEN_TTL_SECS", 86_400u64)?),
            proxy_enabled: env_bool("PROXY_ENABLED"),
            upstream_openai_url: env_or("UPSTREAM_OPENAI_URL", "https://api.openai.com"),
            upstream_anthropic_url: env_or("UPSTREAM_ANTHROPIC_URL", "https://api.anthropic.com"),
            upstream_google_url: env_or(
                "UPSTREAM_GOOGLE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            default_region: env_or("DEFAULT_REGION", "us"),
            default_env: env_or("DEFAULT_ENV", "prod"),
            internal_domain_suffixes,
            safety_mode: env_or("SAFETY_MODE", "warning"),
            siem,
        })
    }

    /// Returns the server bind address string (e.g., "127.0.0.1:8019").
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global, so everything lives in one test.
    #[test]
    fn test_from_env() {
        std::env::set_var("SALT_ENV", "0123456789abcdef-salt");
        std::env::remove_var("TOKEN_BACKEND");
        std::env::remove_var("PORT");

        let config = GateConfig::from_env().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8019);
        assert_eq!(config.token_backend, TokenBackend::Memory);
        assert_eq!(config.max_payload_bytes, 262_144);
        assert_eq!(config.token_ttl, Duration::from_secs(86_400));
        assert!(!config.proxy_enabled);
        assert!(!config.siem.enabled());
        assert_eq!(config.bind_address(), "127.0.0.1:8019");
        assert!(config
            .internal_domain_suffixes
            .contains(&"corp".to_string()));

        // Short salt is rejected
        std::env::set_var("SALT_ENV", "short");
        assert!(matches!(
            GateConfig::from_env(),
            Err(GateError::Config(_))
        ));

        // Remote backend requires url + key
        std::env::set_var("SALT_ENV", "0123456789abcdef-salt");
        std::env::set_var("TOKEN_BACKEND", "remote");
        std::env::remove_var("REMOTE_URL");
        assert!(matches!(
            GateConfig::from_env(),
            Err(GateError::Config(_))
        ));

        std::env::set_var("REMOTE_URL", "redis://127.0.0.1:6379/0");
        std::env::set_var("ENCRYPTION_KEY", "k3y-material");
        let config = GateConfig::from_env().unwrap();
        assert_eq!(config.token_backend, TokenBackend::Remote);

        std::env::remove_var("SALT_ENV");
        std::env::remove_var("TOKEN_BACKEND");
        std::env::remove_var("REMOTE_URL");
        std::env::remove_var("ENCRYPTION_KEY");
    }
}
