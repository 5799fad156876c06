//! Policy engine
//!
//! Composes detector + classifier output with the request context and the
//! policy document into a routing decision. The document is loaded once at
//! startup from YAML and never mutated; the engine is pure over
//! `(categories, context, policy)`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};
use crate::types::{Category, Context};

/// Region the policy engine substitutes for any restricted region code.
pub const RESTRICTED_REGION: &str = "restricted";

/// What to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Block,
    Redact,
    InternalOnly,
    Allow,
}

/// Per-region routing constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRouting {
    #[serde(default = "default_true")]
    pub allow_external: bool,
    #[serde(default)]
    pub preferred_models: Vec<String>,
    #[serde(default)]
    pub internal_fallback: Vec<String>,
    #[serde(default)]
    pub data_residency: Option<String>,
}

/// Per-caller constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerRouting {
    #[serde(default)]
    pub allow_categories: HashSet<Category>,
    #[serde(default = "default_true")]
    pub max_detokenize: bool,
    #[serde(default)]
    pub force_redact: bool,
}

fn default_true() -> bool {
    true
}

/// The category a route matches, or null for "no category present".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchClause {
    #[serde(default)]
    pub category: Option<Category>,
}

fn default_wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

/// Region / caller filter on a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliesTo {
    #[serde(default = "default_wildcard")]
    pub regions: Vec<String>,
    #[serde(default = "default_wildcard")]
    pub callers: Vec<String>,
}

impl Default for AppliesTo {
    fn default() -> Self {
        Self {
            regions: default_wildcard(),
            callers: default_wildcard(),
        }
    }
}

/// One ordered routing rule; first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "match", default)]
    pub matcher: MatchClause,
    pub action: Action,
    #[serde(default)]
    pub applies_to: AppliesTo,
    #[serde(default)]
    pub allow_models: Vec<String>,
    #[serde(default)]
    pub allow_categories: Vec<Category>,
}

/// The policy document, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub restricted_regions: HashSet<String>,
    #[serde(default)]
    pub region_routing: HashMap<String, RegionRouting>,
    #[serde(default)]
    pub trusted_callers: HashSet<String>,
    #[serde(default)]
    pub caller_routing: HashMap<String, CallerRouting>,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

fn default_version() -> u32 {
    1
}

/// The outcome of a policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub target_model: Option<String>,
    pub requires_redaction: bool,
    pub allowed_detokenize_categories: BTreeSet<Category>,
    pub policy_version: u32,
    pub reason: String,
}

/// Geo × caller × category decision machine.
pub struct PolicyEngine {
    doc: PolicyDocument,
}

impl PolicyEngine {
    /// Load the policy document from a YAML file. Malformed or unreadable
    /// files are fatal configuration errors.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("Cannot read policy file {}: {e}", path.display()))
        })?;
        let doc: PolicyDocument = serde_yaml::from_str(&raw).map_err(|e| {
            GateError::Config(format!("Malformed policy file {}: {e}", path.display()))
        })?;
        Ok(Self { doc })
    }

    pub fn from_document(doc: PolicyDocument) -> Self {
        Self { doc }
    }

    pub fn version(&self) -> u32 {
        self.doc.version
    }

    pub fn is_trusted(&self, caller: &str) -> bool {
        self.doc.trusted_callers.contains(caller)
    }

    /// Caller-level detokenize categories, already honoring `max_detokenize`.
    /// `None` means the caller carries no constraint of its own.
    pub fn caller_allow_categories(&self, caller: &str) -> Option<HashSet<Category>> {
        let rules = self.doc.caller_routing.get(caller)?;
        if !rules.max_detokenize {
            return Some(HashSet::new());
        }
        Some(rules.allow_categories.clone())
    }

    /// Evaluate the routes for the given categories and context.
    pub fn decide(&self, categories: &BTreeSet<Category>, context: &Context) -> Decision {
        let region = context.region.to_lowercase();
        let effective_region = if self.doc.restricted_regions.contains(&region) {
            RESTRICTED_REGION
        } else {
            region.as_str()
        };
        let region_rules = self.doc.region_routing.get(effective_region);
        let caller_rules = self.doc.caller_routing.get(&context.caller);

        let matched = self
            .doc
            .routes
            .iter()
            .enumerate()
            .find(|(_, route)| route_matches(route, categories, effective_region, &context.caller));

        let (mut action, route, mut reason) = match &matched {
            Some((index, route)) => {
                let name = route
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("route #{index}"));
                (route.action, Some(*route), format!("matched {name}"))
            }
            None => (
                Action::Allow,
                None,
                "default allow (no matching route)".to_string(),
            ),
        };

        // Caller-level force_redact upgrades a plain allow
        if action == Action::Allow && caller_rules.map(|c| c.force_redact).unwrap_or(false) {
            action = Action::Redact;
            reason.push_str("; caller forces redaction");
        }

        let requires_redaction = action == Action::Redact;
        let mut target_model = None;

        match action {
            Action::Block => {}
            Action::InternalOnly => {
                target_model = first_model(route.map(|r| &r.allow_models[..]))
                    .or_else(|| region_rules.and_then(|r| r.internal_fallback.first().cloned()));
            }
            Action::Redact | Action::Allow => {
                let allow_external = region_rules.map(|r| r.allow_external).unwrap_or(true);
                if allow_external {
                    target_model = first_model(route.map(|r| &r.allow_models[..]))
                        .or_else(|| region_rules.and_then(|r| r.preferred_models.first().cloned()));
                } else {
                    action = Action::InternalOnly;
                    target_model =
                        region_rules.and_then(|r| r.internal_fallback.first().cloned());
                    reason.push_str("; region forbids external egress");
                }
            }
        }

        let allowed_detokenize_categories = if action == Action::Block {
            BTreeSet::new()
        } else {
            self.allowed_categories(route, &context.caller)
        };

        Decision {
            action,
            target_model,
            requires_redaction,
            allowed_detokenize_categories,
            policy_version: self.doc.version,
            reason,
        }
    }

    /// Intersection of the route's categories with the caller's, with
    /// `secret` unconditionally removed.
    fn allowed_categories(
        &self,
        route: Option<&RouteRule>,
        caller: &str,
    ) -> BTreeSet<Category> {
        let route_categories: HashSet<Category> = match route {
            Some(r) if !r.allow_categories.is_empty() => {
                r.allow_categories.iter().copied().collect()
            }
            _ => [Category::Pii, Category::OpsSensitive].into_iter().collect(),
        };

        let mut allowed: BTreeSet<Category> = match self.caller_allow_categories(caller) {
            Some(caller_categories) => route_categories
                .intersection(&caller_categories)
                .copied()
                .collect(),
            None => route_categories.into_iter().collect(),
        };
        allowed.remove(&Category::Secret);
        allowed
    }
}

fn first_model(models: Option<&[String]>) -> Option<String> {
    models.and_then(|m| m.first().cloned())
}

fn route_matches(
    route: &RouteRule,
    categories: &BTreeSet<Category>,
    effective_region: &str,
    caller: &str,
) -> bool {
    let category_hit = match route.matcher.category {
        Some(category) => categories.contains(&category),
        None => categories.is_empty(),
    };
    if !category_hit {
        return false;
    }

    let regions = &route.applies_to.regions;
    if !regions.iter().any(|r| r == "*" || r == effective_region) {
        return false;
    }

    let callers = &route.applies_to.callers;
    callers.iter().any(|c| c == "*" || c == caller)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(caller: &str, region: &str) -> Context {
        Context {
            caller: caller.to_string(),
            region: region.to_string(),
            env: "prod".to_string(),
            conversation_id: "c1".to_string(),
        }
    }

    fn cats(list: &[Category]) -> BTreeSet<Category> {
        list.iter().copied().collect()
    }

    fn test_policy() -> PolicyEngine {
        let yaml = r#"
version: 3
restricted_regions: [cn, ru]
region_routing:
  us:
    allow_external: true
    preferred_models: ["openai:gpt-4o"]
    internal_fallback: ["internal:balanced"]
    data_residency: us
  eu:
    allow_external: false
    preferred_models: ["openai:gpt-4o"]
    internal_fallback: ["internal:eu-sovereign"]
  restricted:
    allow_external: false
    internal_fallback: ["internal:restricted"]
trusted_callers: [incident-mgr, runbook-executor]
caller_routing:
  incident-mgr:
    allow_categories: [pii, ops_sensitive]
    max_detokenize: true
    force_redact: false
  batch-job:
    allow_categories: [pii]
    max_detokenize: false
    force_redact: true
routes:
  - name: block-secrets
    match: { category: secret }
    action: block
  - name: redact-pii
    match: { category: pii }
    action: redact
    allow_models: ["openai:gpt-4o"]
    allow_categories: [pii, ops_sensitive]
  - name: keep-export-internal
    match: { category: export_control }
    action: internal_only
    allow_models: ["internal:itar"]
  - name: default-allow
    match: { category: null }
    action: allow
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        PolicyEngine::from_document(doc)
    }

    #[test]
    fn test_block_on_secret() {
        let engine = test_policy();
        let decision = engine.decide(&cats(&[Category::Secret]), &context("user", "us"));
        assert_eq!(decision.action, Action::Block);
        assert!(decision.allowed_detokenize_categories.is_empty());
        assert!(decision.reason.contains("block-secrets"));
        assert_eq!(decision.policy_version, 3);
    }

    #[test]
    fn test_redact_route_with_detokenize_intersection() {
        let engine = test_policy();
        let decision = engine.decide(&cats(&[Category::Pii]), &context("incident-mgr", "us"));
        assert_eq!(decision.action, Action::Redact);
        assert!(decision.requires_redaction);
        assert_eq!(decision.target_model.as_deref(), Some("openai:gpt-4o"));
        assert_eq!(
            decision.allowed_detokenize_categories,
            cats(&[Category::Pii, Category::OpsSensitive])
        );
    }

    #[test]
    fn test_secret_never_in_allowed_categories() {
        let yaml = r#"
version: 1
routes:
  - name: leaky
    match: { category: pii }
    action: redact
    allow_categories: [secret, pii]
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        let engine = PolicyEngine::from_document(doc);
        let decision = engine.decide(&cats(&[Category::Pii]), &context("anyone", "us"));
        assert!(!decision
            .allowed_detokenize_categories
            .contains(&Category::Secret));
        assert!(decision
            .allowed_detokenize_categories
            .contains(&Category::Pii));
    }

    #[test]
    fn test_null_match_requires_empty_categories() {
        let engine = test_policy();

        // Clean payload matches the default-allow route
        let decision = engine.decide(&cats(&[]), &context("user", "us"));
        assert_eq!(decision.action, Action::Allow);
        assert!(decision.reason.contains("default-allow"));

        // ops_sensitive alone matches no route: falls through to default allow
        let decision = engine.decide(&cats(&[Category::OpsSensitive]), &context("user", "us"));
        assert_eq!(decision.action, Action::Allow);
        assert!(decision.reason.contains("no matching route"));
        assert_eq!(decision.target_model.as_deref(), Some("openai:gpt-4o"));
    }

    #[test]
    fn test_restricted_region_forces_internal() {
        let engine = test_policy();
        let decision = engine.decide(&cats(&[]), &context("user", "cn"));
        assert_eq!(decision.action, Action::InternalOnly);
        assert_eq!(decision.target_model.as_deref(), Some("internal:restricted"));
    }

    #[test]
    fn test_region_without_external_rewrites_allow() {
        let engine = test_policy();
        let decision = engine.decide(&cats(&[]), &context("user", "eu"));
        assert_eq!(decision.action, Action::InternalOnly);
        assert_eq!(
            decision.target_model.as_deref(),
            Some("internal:eu-sovereign")
        );
        assert!(decision.reason.contains("external egress"));
    }

    #[test]
    fn test_internal_only_route_model_selection() {
        let engine = test_policy();
        let decision = engine.decide(
            &cats(&[Category::ExportControl]),
            &context("user", "us"),
        );
        assert_eq!(decision.action, Action::InternalOnly);
        assert_eq!(decision.target_model.as_deref(), Some("internal:itar"));
    }

    #[test]
    fn test_force_redact_upgrades_allow() {
        let engine = test_policy();
        let decision = engine.decide(&cats(&[]), &context("batch-job", "us"));
        assert_eq!(decision.action, Action::Redact);
        assert!(decision.requires_redaction);
    }

    #[test]
    fn test_max_detokenize_false_empties_categories() {
        let engine = test_policy();
        let decision = engine.decide(&cats(&[Category::Pii]), &context("batch-job", "us"));
        assert_eq!(decision.action, Action::Redact);
        assert!(decision.allowed_detokenize_categories.is_empty());
    }

    #[test]
    fn test_applies_to_filters() {
        let yaml = r#"
version: 2
routes:
  - name: eu-only-block
    match: { category: pii }
    action: block
    applies_to: { regions: [eu], callers: ["*"] }
  - name: fallback-redact
    match: { category: pii }
    action: redact
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        let engine = PolicyEngine::from_document(doc);

        let eu = engine.decide(&cats(&[Category::Pii]), &context("user", "eu"));
        assert_eq!(eu.action, Action::Block);

        let us = engine.decide(&cats(&[Category::Pii]), &context("user", "us"));
        assert_eq!(us.action, Action::Redact);
    }

    #[test]
    fn test_decision_is_pure() {
        let engine = test_policy();
        let categories = cats(&[Category::Pii, Category::OpsSensitive]);
        let ctx = context("incident-mgr", "us");
        let a = engine.decide(&categories, &ctx);
        let b = engine.decide(&categories, &ctx);
        assert_eq!(a.action, b.action);
        assert_eq!(a.target_model, b.target_model);
        assert_eq!(
            a.allowed_detokenize_categories,
            b.allowed_detokenize_categories
        );
        assert_eq!(a.reason, b.reason);
    }

    #[test]
    fn test_trusted_callers() {
        let engine = test_policy();
        assert!(engine.is_trusted("incident-mgr"));
        assert!(!engine.is_trusted("random-caller"));
    }

    #[test]
    fn test_region_case_insensitive() {
        let engine = test_policy();
        let decision = engine.decide(&cats(&[]), &context("user", "CN"));
        assert_eq!(decision.action, Action::InternalOnly);
    }
}
