//! Shared request-scoped types

use serde::{Deserialize, Serialize};

/// Sensitivity category of a detected span.
///
/// Priority order (used by the overlap resolver and the policy engine):
/// `secret > pii > ops_sensitive > export_control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Secret,
    Pii,
    OpsSensitive,
    ExportControl,
}

impl Category {
    /// Numeric priority; higher wins during overlap resolution.
    pub fn priority(&self) -> u8 {
        match self {
            Category::Secret => 3,
            Category::Pii => 2,
            Category::OpsSensitive => 1,
            Category::ExportControl => 0,
        }
    }

    /// Upper-case label used inside placeholders.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Secret => "SECRET",
            Category::Pii => "PII",
            Category::OpsSensitive => "OPS_SENSITIVE",
            Category::ExportControl => "EXPORT_CONTROL",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Secret => "secret",
            Category::Pii => "pii",
            Category::OpsSensitive => "ops_sensitive",
            Category::ExportControl => "export_control",
        }
    }

    /// Parse the upper-case placeholder label back into a category.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "SECRET" => Some(Category::Secret),
            "PII" => Some(Category::Pii),
            "OPS_SENSITIVE" => Some(Category::OpsSensitive),
            "EXPORT_CONTROL" => Some(Category::ExportControl),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for Category {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Category {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

/// A detected sensitive span: closed-open byte interval over the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub category: Category,
    /// Finer label, e.g. `AWS_ACCESS_KEY`, `CREDIT_CARD`, `INTERNAL_DOMAIN`
    pub span_type: &'static str,
    pub confidence: f32,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A category observation surfaced to callers and audit records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "type")]
    pub category: Category,
    pub confidence: f32,
}

/// Request context. All four fields are required at the JSON boundary;
/// the proxy derives missing values from headers or defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub caller: String,
    pub region: String,
    pub env: String,
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_priority_order() {
        assert!(Category::Secret > Category::Pii);
        assert!(Category::Pii > Category::OpsSensitive);
        assert!(Category::OpsSensitive > Category::ExportControl);
    }

    #[test]
    fn test_category_labels_roundtrip() {
        for cat in [
            Category::Secret,
            Category::Pii,
            Category::OpsSensitive,
            Category::ExportControl,
        ] {
            assert_eq!(Category::from_label(cat.label()), Some(cat));
        }
        assert_eq!(Category::from_label("NOT_A_LABEL"), None);
    }

    #[test]
    fn test_category_serde_snake_case() {
        let json = serde_json::to_string(&Category::OpsSensitive).unwrap();
        assert_eq!(json, r#""ops_sensitive""#);
        let parsed: Category = serde_json::from_str(r#""export_control""#).unwrap();
        assert_eq!(parsed, Category::ExportControl);
    }

    #[test]
    fn test_span_overlap() {
        let a = Span {
            start: 0,
            end: 5,
            category: Category::Pii,
            span_type: "EMAIL",
            confidence: 0.9,
        };
        let mut b = a.clone();
        b.start = 5;
        b.end = 8;
        // Touching closed-open intervals do not overlap
        assert!(!a.overlaps(&b));
        b.start = 4;
        assert!(a.overlaps(&b));
    }

    #[test]
    fn test_context_requires_all_fields() {
        let err = serde_json::from_str::<Context>(r#"{"caller":"a","region":"us"}"#);
        assert!(err.is_err());
    }
}
