//! Export-control keyword classifier
//!
//! Counts case-insensitive matches against a fixed aviation/ITAR vocabulary
//! and emits a single advisory `export_control` span covering the whole
//! payload when the count reaches the threshold. The classifier never rejects
//! or modifies the payload.

use regex::Regex;

use crate::error::{GateError, Result};
use crate::types::{Category, Span};

/// Minimum keyword matches before the payload counts as export-controlled.
pub const DEFAULT_THRESHOLD: usize = 2;

/// Aviation program vocabulary, ITAR/EAR sensitive.
const KEYWORD_PATTERNS: &[&str] = &[
    // Aircraft design and performance
    r"\b(?:eVTOL|vertical[\s\-]?take[\s\-]?off|VTOL)\b",
    r"\b(?:aircraft[\s\-]?design|airframe|propulsion[\s\-]?system)\b",
    r"\b(?:flight[\s\-]?control|avionics|autopilot)\b",
    r"\b(?:aerodynamic|aerodynamics|lift[\s\-]?coefficient)\b",
    // Regulatory and certification
    r"\b(?:FAA|Federal[\s\-]?Aviation[\s\-]?Administration)\b",
    r"\b(?:Part[\s\-]?23|Part[\s\-]?27|Part[\s\-]?29|Part[\s\-]?33)\b",
    r"\b(?:type[\s\-]?certificate|STC|airworthiness)\b",
    r"\b(?:ITAR|International[\s\-]?Traffic[\s\-]?in[\s\-]?Arms)\b",
    r"\b(?:EAR|Export[\s\-]?Administration[\s\-]?Regulations)\b",
    r"\b(?:ECCN|export[\s\-]?control)\b",
    // Propulsion and power systems
    r"\b(?:battery[\s\-]?management|BMS|power[\s\-]?distribution)\b",
    r"\b(?:electric[\s\-]?motor|propeller|rotor[\s\-]?blade)\b",
    r"\b(?:energy[\s\-]?density|specific[\s\-]?power)\b",
    // Flight operations
    r"\b(?:flight[\s\-]?envelope|V-speed|cruise[\s\-]?speed)\b",
    r"\b(?:payload[\s\-]?capacity|range[\s\-]?calculation)\b",
    r"\b(?:takeoff[\s\-]?weight|MTOW|maximum[\s\-]?takeoff)\b",
    // Manufacturing and materials
    r"\b(?:composite[\s\-]?material|carbon[\s\-]?fiber|CFRP)\b",
    r"\b(?:manufacturing[\s\-]?process|tooling|assembly[\s\-]?jig)\b",
    r"\b(?:quality[\s\-]?assurance|AS9100|aerospace[\s\-]?standard)\b",
];

/// Result of an export-control scan.
#[derive(Debug, Clone)]
pub struct ExportScan {
    pub match_count: usize,
    /// First matched keywords, capped at 10 for diagnostics
    pub matched_keywords: Vec<String>,
    pub confidence: f32,
    pub is_controlled: bool,
}

/// Keyword scorer over the aviation vocabulary.
pub struct ExportControlClassifier {
    patterns: Vec<Regex>,
    threshold: usize,
}

impl ExportControlClassifier {
    pub fn new() -> Result<Self> {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Result<Self> {
        let patterns = KEYWORD_PATTERNS
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}")).map_err(|e| {
                    GateError::Config(format!("Invalid classifier pattern: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            threshold,
        })
    }

    /// Count keyword matches and score the payload.
    pub fn classify(&self, text: &str) -> ExportScan {
        let mut match_count = 0usize;
        let mut matched_keywords = Vec::new();

        for pattern in &self.patterns {
            for m in pattern.find_iter(text) {
                match_count += 1;
                if matched_keywords.len() < 10 {
                    matched_keywords.push(m.as_str().to_string());
                }
            }
        }

        let confidence = if match_count == 0 {
            0.0
        } else {
            (match_count as f32 / (self.threshold * 3) as f32).min(1.0)
        };

        ExportScan {
            match_count,
            matched_keywords,
            confidence,
            is_controlled: match_count >= self.threshold,
        }
    }

    /// Advisory span covering the whole payload, present only when the match
    /// count reaches the threshold.
    pub fn advisory_span(&self, text: &str) -> Option<Span> {
        let scan = self.classify(text);
        scan.is_controlled.then(|| Span {
            start: 0,
            end: text.len(),
            category: Category::ExportControl,
            span_type: "EXPORT_CONTROL",
            confidence: scan.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ExportControlClassifier {
        ExportControlClassifier::new().unwrap()
    }

    #[test]
    fn test_below_threshold_is_advisory_free() {
        let c = classifier();
        let scan = c.classify("The autopilot branch needs a rebase.");
        assert_eq!(scan.match_count, 1);
        assert!(!scan.is_controlled);
        assert!(c
            .advisory_span("The autopilot branch needs a rebase.")
            .is_none());
    }

    #[test]
    fn test_threshold_reached() {
        let text = "Review the eVTOL flight control laws before the FAA audit";
        let c = classifier();
        let scan = c.classify(text);
        assert!(scan.match_count >= 2);
        assert!(scan.is_controlled);

        let span = c.advisory_span(text).unwrap();
        assert_eq!(span.start, 0);
        assert_eq!(span.end, text.len());
        assert_eq!(span.category, Category::ExportControl);
    }

    #[test]
    fn test_case_insensitive() {
        let scan = classifier().classify("itar and eccn compliance review");
        assert_eq!(scan.match_count, 2);
        assert!(scan.is_controlled);
    }

    #[test]
    fn test_confidence_scaling() {
        let c = classifier();

        // Exactly threshold matches: 2 / 6
        let scan = c.classify("ITAR and EAR");
        assert_eq!(scan.match_count, 2);
        assert!((scan.confidence - 2.0 / 6.0).abs() < f32::EPSILON);

        // Saturates at 1.0
        let busy = "ITAR EAR ECCN FAA airworthiness avionics autopilot airframe \
                    propulsion system composite material MTOW";
        let scan = c.classify(busy);
        assert!(scan.match_count >= 6);
        assert!((scan.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_matched_keywords_capped() {
        let text = "ITAR ".repeat(30);
        let scan = classifier().classify(&text);
        assert_eq!(scan.match_count, 30);
        assert_eq!(scan.matched_keywords.len(), 10);
    }

    #[test]
    fn test_plain_text_scores_zero() {
        let scan = classifier().classify("lunch menu for tuesday");
        assert_eq!(scan.match_count, 0);
        assert!((scan.confidence - 0.0).abs() < f32::EPSILON);
        assert!(!scan.is_controlled);
    }
}
