//! Output safety filter
//!
//! Scans model output for destructive command patterns and annotates it
//! before it reaches the caller. Advisory by default: `warning` appends a
//! banner, `block` replaces the matched command, `silent` passes output
//! through untouched.

use regex::Regex;

use crate::error::{GateError, Result};

/// How detected commands are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyMode {
    Warning,
    Block,
    Silent,
}

impl SafetyMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "block" => SafetyMode::Block,
            "silent" => SafetyMode::Silent,
            _ => SafetyMode::Warning,
        }
    }
}

/// A single dangerous-command hit.
#[derive(Debug, Clone)]
pub struct SafetyIssue {
    pub description: &'static str,
    pub start: usize,
    pub end: usize,
}

const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    // Filesystem destruction
    (r"rm\s+-rf\s+/", "Recursive delete from root directory"),
    (r"rm\s+-[rf]+\s+~/", "Delete home directory"),
    (r"mkfs\.\w+\s+/dev/", "Format disk or partition"),
    (r"dd\s+if=.*\s+of=/dev/[sh]d[a-z]", "Direct disk write"),
    // System control
    (r"shutdown\s+-[hr]\s+now", "Immediate system shutdown or reboot"),
    (r"init\s+[06]", "System halt or reboot via init"),
    (r"systemctl\s+poweroff", "System poweroff"),
    // Kubernetes / container teardown
    (
        r"kubectl\s+delete\s+(?:namespace|ns)\s+--all",
        "Delete all Kubernetes namespaces",
    ),
    (
        r"kubectl\s+drain\s+.*--delete-(?:local-data|emptydir-data)",
        "Forcefully drain node",
    ),
    (
        r"docker\s+system\s+prune\s+-a\s+--volumes\s+--force",
        "Prune all Docker data",
    ),
    // Database destruction
    (r"DROP\s+DATABASE\s+\w+", "Drop database"),
    (r"TRUNCATE\s+TABLE", "Truncate table"),
    (r"DELETE\s+FROM\s+\w+\s+WHERE\s+1=1", "Delete all rows from table"),
    // Cloud infrastructure teardown
    (r"aws\s+s3\s+rb\s+s3://.*--force", "Force delete S3 bucket"),
    (
        r"az\s+group\s+delete\s+--name\s+.*--yes\s+--no-wait",
        "Delete Azure resource group",
    ),
    (r"gcloud\s+projects\s+delete", "Delete GCP project"),
    (
        r"terraform\s+destroy\s+-auto-approve",
        "Auto-approved Terraform destroy",
    ),
    // Network / firewall
    (r"iptables\s+-[FX]", "Flush or delete iptables rules"),
    (r"ufw\s+disable", "Disable firewall"),
    // Users and permissions
    (r"chmod\s+777\s+/", "World-writable permissions on root"),
    (r"chown\s+-R\s+\w+:\w+\s+/\s", "Recursive ownership change from root"),
    (r"userdel\s+-r\s+root", "Delete root user"),
    // Services
    (r"systemctl\s+(?:stop|disable)\s+sshd?", "Stop or disable SSH service"),
    // Resource exhaustion
    (r":\(\)\{\s*:\|:&\s*\};:", "Fork bomb"),
    (r"yes\s+>\s+/dev/", "Resource exhaustion via /dev write"),
    // Scheduled tasks
    (r"crontab\s+-r", "Remove all cron jobs"),
    (r"\*\s+\*\s+\*\s+\*\s+\*\s+rm\s+-rf", "Scheduled recursive delete"),
];

/// Compiled dangerous-command scanner.
pub struct SafetyFilter {
    patterns: Vec<(Regex, &'static str)>,
    mode: SafetyMode,
}

impl SafetyFilter {
    pub fn new(mode: SafetyMode) -> Result<Self> {
        let patterns = DANGEROUS_PATTERNS
            .iter()
            .map(|(pattern, description)| {
                Regex::new(&format!("(?im){pattern}"))
                    .map(|re| (re, *description))
                    .map_err(|e| GateError::Config(format!("Invalid safety pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns, mode })
    }

    pub fn mode(&self) -> SafetyMode {
        self.mode
    }

    /// Scan text for dangerous command patterns.
    pub fn scan(&self, text: &str) -> Vec<SafetyIssue> {
        let mut issues = Vec::new();
        for (pattern, description) in &self.patterns {
            for m in pattern.find_iter(text) {
                issues.push(SafetyIssue {
                    description,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
        issues.sort_by_key(|issue| issue.start);
        issues
    }

    /// Apply the configured mode to `text`.
    pub fn annotate(&self, text: &str) -> String {
        if self.mode == SafetyMode::Silent {
            return text.to_string();
        }
        let issues = self.scan(text);
        if issues.is_empty() {
            return text.to_string();
        }

        match self.mode {
            SafetyMode::Silent => text.to_string(),
            SafetyMode::Block => {
                let mut result = text.to_string();
                for issue in issues.iter().rev() {
                    result.replace_range(
                        issue.start..issue.end,
                        &format!("[BLOCKED: {}]", issue.description),
                    );
                }
                result
            }
            SafetyMode::Warning => {
                let mut warning = if issues.len() == 1 {
                    format!(
                        "\n\n[SAFETY WARNING] Potentially destructive command detected:\n  - {}",
                        issues[0].description
                    )
                } else {
                    let listed: Vec<String> = issues
                        .iter()
                        .take(5)
                        .map(|issue| format!("  - {}", issue.description))
                        .collect();
                    format!(
                        "\n\n[SAFETY WARNING] {} potentially destructive commands detected:\n{}",
                        issues.len(),
                        listed.join("\n")
                    )
                };
                if issues.len() > 5 {
                    warning.push_str(&format!("\n  ... and {} more", issues.len() - 5));
                }
                format!("{text}{warning}")
            }
        }
    }
}
