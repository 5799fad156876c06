//! The fixed pattern battery for candidate generation.
//!
//! Each pattern carries a category, a finer type label and a confidence.
//! Patterns whose label requires a checksum (`CREDIT_CARD`, `SSN`, `JWT`,
//! `IP_ADDRESS`) are gated by the validators in `validators.rs` before a
//! candidate is emitted.

use crate::types::Category;

/// A single detection rule before compilation.
pub struct PatternDef {
    pub name: &'static str,
    pub category: Category,
    pub confidence: f32,
    pub pattern: &'static str,
}

/// The fixed rule table, secrets first.
pub const PATTERNS: &[PatternDef] = &[
    // -- Cloud credentials -------------------------------------------------
    PatternDef {
        name: "AWS_ACCESS_KEY",
        category: Category::Secret,
        confidence: 0.95,
        pattern: r"\bAKIA[0-9A-Z]{16}\b",
    },
    PatternDef {
        name: "AWS_SECRET_KEY",
        category: Category::Secret,
        confidence: 0.6,
        pattern: r"\b[A-Za-z0-9/+=]{40}\b",
    },
    PatternDef {
        name: "AZURE_STORAGE_KEY",
        category: Category::Secret,
        confidence: 0.95,
        pattern: r"\bAccountKey=[A-Za-z0-9+/=]{86,88}",
    },
    PatternDef {
        name: "AZURE_CONN_STRING",
        category: Category::Secret,
        confidence: 0.98,
        pattern: r"DefaultEndpointsProtocol=https?;AccountName=[^;]+;AccountKey=[^;]+",
    },
    PatternDef {
        name: "AZURE_SAS_TOKEN",
        category: Category::Secret,
        confidence: 0.9,
        pattern: r"\?sv=\d{4}-\d{2}-\d{2}&[^\s]*sig=[A-Za-z0-9%]+",
    },
    PatternDef {
        name: "GCP_API_KEY",
        category: Category::Secret,
        confidence: 0.95,
        pattern: r"\bAIza[0-9A-Za-z_\-]{35}\b",
    },
    PatternDef {
        name: "GCP_OAUTH_CLIENT",
        category: Category::Secret,
        confidence: 0.9,
        pattern: r"\b[0-9]+-[0-9a-z]{32}\.apps\.googleusercontent\.com\b",
    },
    // -- Tokens ------------------------------------------------------------
    PatternDef {
        name: "OAUTH_BEARER",
        category: Category::Secret,
        confidence: 0.85,
        pattern: r"\b[Bb]earer\s+[A-Za-z0-9_\-.~+/]{20,}=*",
    },
    PatternDef {
        name: "OAUTH_TOKEN",
        category: Category::Secret,
        confidence: 0.85,
        pattern: r#"access_token['"]?\s*[:=]\s*['"]?[A-Za-z0-9_\-.~+/]{20,}"#,
    },
    PatternDef {
        name: "JWT",
        category: Category::Secret,
        confidence: 0.9,
        pattern: r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\b",
    },
    // -- Key material ------------------------------------------------------
    PatternDef {
        name: "PEM_PRIVATE_KEY",
        category: Category::Secret,
        confidence: 0.99,
        pattern: r"-----BEGIN (?:RSA |EC |DSA |ENCRYPTED |)PRIVATE KEY-----",
    },
    PatternDef {
        name: "PKCS12",
        category: Category::Secret,
        confidence: 0.99,
        pattern: r"-----BEGIN PKCS12-----",
    },
    PatternDef {
        name: "KUBE_CONFIG",
        category: Category::Secret,
        confidence: 0.9,
        pattern: r"apiVersion:\s*v1\s*\n\s*kind:\s*Config",
    },
    PatternDef {
        name: "KUBE_TOKEN",
        category: Category::Secret,
        confidence: 0.8,
        pattern: r"\btoken:\s*[A-Za-z0-9_\-.]{20,}",
    },
    // -- Connection strings ------------------------------------------------
    PatternDef {
        name: "BASIC_AUTH_URL",
        category: Category::Secret,
        confidence: 0.7,
        pattern: r"\b[a-zA-Z0-9._%+\-]+:[^@\s]{6,}@",
    },
    PatternDef {
        name: "DB_CONN_STRING",
        category: Category::Secret,
        confidence: 0.95,
        pattern: r"(?i)\b(?:postgres(?:ql)?|mysql|mongodb|redis|amqps?)://[^\s]+",
    },
    PatternDef {
        name: "API_KEY_ASSIGNMENT",
        category: Category::Secret,
        confidence: 0.85,
        pattern: r#"(?i)['"]?(?:api[_\-]?key|apikey)['"]?\s*[:=]\s*['"]?[A-Za-z0-9_\-]{20,}"#,
    },
    // -- PII ---------------------------------------------------------------
    PatternDef {
        name: "CREDIT_CARD",
        category: Category::Pii,
        confidence: 0.85,
        // 13-19 digits with optional space/dash separators; Luhn-gated
        pattern: r"\b\d(?:[ \-]?\d){12,18}\b",
    },
    PatternDef {
        name: "SSN",
        category: Category::Pii,
        confidence: 0.85,
        pattern: r"\b\d{3}-\d{2}-\d{4}\b",
    },
    PatternDef {
        name: "EMAIL",
        category: Category::Pii,
        confidence: 0.85,
        pattern: r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
    },
    PatternDef {
        name: "PHONE",
        category: Category::Pii,
        confidence: 0.7,
        pattern: r"\b(?:\+?1[\-.\s]?)?\(?\d{3}\)?[\-.\s]?\d{3}[\-.\s]?\d{4}\b",
    },
    PatternDef {
        name: "PHONE_E164",
        category: Category::Pii,
        confidence: 0.75,
        pattern: r"\+[1-9]\d{7,14}\b",
    },
    PatternDef {
        name: "IP_ADDRESS",
        category: Category::Pii,
        confidence: 0.7,
        // Post-classified: private ranges become ops_sensitive PRIVATE_IP
        pattern: r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
    },
];

/// Type label given to IPv4 candidates that fall in a private range.
pub const PRIVATE_IP: &str = "PRIVATE_IP";

/// Type label for internal DNS suffix matches.
pub const INTERNAL_DOMAIN: &str = "INTERNAL_DOMAIN";

/// Build the internal-domain pattern from configured DNS suffixes.
pub fn internal_domain_pattern(suffixes: &[String]) -> String {
    let escaped: Vec<String> = suffixes.iter().map(|s| regex::escape(s)).collect();
    format!(r"\b[\w.\-]+\.(?:{})\b", escaped.join("|"))
}
