//! Diagnostics and auto-repair
//!
//! `DiagnosticsEngine` runs a fixed battery of probes and produces a
//! severity-ranked [`DiagnosticReport`]. `AutoRepairEngine` maps each
//! auto-fixable issue to one action from a fixed catalog and applies it.

pub mod engine;
pub mod repair;

pub use engine::DiagnosticsEngine;
pub use repair::{
    plan_repair, run_repair_cycle, AutoRepairEngine, RepairAction, RepairCycle, RepairRecord,
    RepairSummary,
};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Issue titles. Repair planning matches on these.
pub mod titles {
    pub const BRIDGE_TOOL_MISSING: &str = "Device bridge tool not found";
    pub const BRIDGE_UNRESPONSIVE: &str = "Device bridge not responding";
    pub const DEVICE_OFFLINE: &str = "Target device offline";
    pub const DEVICE_UNAUTHORIZED: &str = "Target device unauthorized";
    pub const DEVICE_NOT_FOUND: &str = "Target device not connected";
    pub const NO_DEVICES: &str = "No device connected";
    pub const ZOMBIE_CONNECTIONS: &str = "Stale device connections";
    pub const SERVER_NOT_RUNNING: &str = "Automation server not running";
    pub const SERVER_UNREACHABLE: &str = "Automation server unreachable";
    pub const SERVER_TIMEOUT: &str = "Automation server status timed out";
    pub const SERVER_SLOW: &str = "Automation server slow to respond";
    pub const SERVER_NOT_READY: &str = "Automation server not ready";
    pub const SERVER_HTTP_ERROR: &str = "Automation server returned an error";
    pub const SERVER_READY: &str = "Automation server ready";
    pub const DEVICE_PORT_UNREACHABLE: &str = "Device port unreachable";
    pub const SERVER_PORT_UNREACHABLE: &str = "Automation server port unreachable";
    pub const HIGH_CPU: &str = "High CPU usage";
    pub const HIGH_MEMORY: &str = "High memory usage";
    pub const LOW_DISK: &str = "Low disk space";
    pub const HOST_SAMPLING_FAILED: &str = "Host resources unavailable";
    pub const SESSION_LOST: &str = "Automation session lost";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    Bridge,
    AutomationServer,
    Network,
    Host,
    Other,
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bridge => "Bridge",
            Self::AutomationServer => "AutomationServer",
            Self::Network => "Network",
            Self::Host => "Host",
            Self::Other => "Other",
        };
        f.write_str(s)
    }
}

/// Ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub possible_causes: Vec<String>,
    pub fix_suggestions: Vec<String>,
    pub auto_fixable: bool,
    /// Address or endpoint the issue is about, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl DiagnosticIssue {
    pub fn new(
        category: IssueCategory,
        severity: Severity,
        title: &str,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            title: title.to_string(),
            description: description.into(),
            possible_causes: Vec::new(),
            fix_suggestions: Vec::new(),
            auto_fixable: false,
            subject: None,
        }
    }

    pub fn causes(mut self, causes: &[&str]) -> Self {
        self.possible_causes = causes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn fixes(mut self, fixes: &[&str]) -> Self {
        self.fix_suggestions = fixes.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn auto_fixable(mut self) -> Self {
        self.auto_fixable = true;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub issues: Vec<DiagnosticIssue>,
    /// subsystem → key → value
    pub status: BTreeMap<String, BTreeMap<String, String>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DiagnosticReport {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            issues: Vec::new(),
            status: BTreeMap::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn push(&mut self, issue: DiagnosticIssue) {
        self.issues.push(issue);
    }

    pub fn set_status(&mut self, subsystem: &str, key: &str, value: impl ToString) {
        self.status
            .entry(subsystem.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Stable sort by severity and stamp the end time.
    pub fn finish(&mut self) {
        self.issues.sort_by_key(|i| i.severity);
        self.finished_at = Utc::now();
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_critical(&self) -> bool {
        self.count(Severity::Critical) > 0
    }

    /// No critical or warning issues.
    pub fn is_healthy(&self) -> bool {
        self.issues.iter().all(|i| i.severity == Severity::Info)
    }

    pub fn auto_fixable_issues(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues.iter().filter(|i| i.auto_fixable)
    }

    pub fn find(&self, title: &str) -> Option<&DiagnosticIssue> {
        self.issues.iter().find(|i| i.title == title)
    }

    pub fn contains(&self, title: &str) -> bool {
        self.find(title).is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        out.push_str(&format!(
            "{} {} critical, {} warning, {} info ({} ms)\n",
            "Diagnostics:".bold(),
            self.count(Severity::Critical).to_string().bright_red(),
            self.count(Severity::Warning).to_string().bright_yellow(),
            self.count(Severity::Info).to_string().bright_blue(),
            elapsed
        ));

        for issue in &self.issues {
            let marker = match issue.severity {
                Severity::Critical => "✗".bright_red(),
                Severity::Warning => "!".bright_yellow(),
                Severity::Info => "✓".bright_green(),
            };
            let fixable = if issue.auto_fixable {
                " [auto-fixable]".bright_cyan().to_string()
            } else {
                String::new()
            };
            out.push_str(&format!(
                "\n{} [{}] {}{}\n  {}\n",
                marker,
                issue.category,
                issue.title.bold(),
                fixable,
                issue.description
            ));
            if !issue.possible_causes.is_empty() {
                out.push_str(&format!("  {}\n", "Possible causes:".bright_black()));
                for cause in &issue.possible_causes {
                    out.push_str(&format!("    - {}\n", cause));
                }
            }
            if !issue.fix_suggestions.is_empty() {
                out.push_str(&format!("  {}\n", "Suggested fixes:".bright_black()));
                for (i, fix) in issue.fix_suggestions.iter().enumerate() {
                    out.push_str(&format!("    {}. {}\n", i + 1, fix));
                }
            }
        }

        if !self.status.is_empty() {
            out.push_str(&format!("\n{}\n", "Status:".bold()));
            for (subsystem, values) in &self.status {
                let joined: Vec<String> = values.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                out.push_str(&format!("  {:<10} {}\n", subsystem, joined.join(" ")));
            }
        }
        out
    }
}

impl Default for DiagnosticReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: Severity, title: &str) -> DiagnosticIssue {
        DiagnosticIssue::new(IssueCategory::Other, severity, title, "d")
    }

    #[test]
    fn test_finish_sorts_by_severity_stably() {
        let mut report = DiagnosticReport::new();
        report.push(issue(Severity::Info, "i"));
        report.push(issue(Severity::Warning, "w1"));
        report.push(issue(Severity::Critical, "c"));
        report.push(issue(Severity::Warning, "w2"));
        report.finish();

        let titles: Vec<_> = report.issues.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "w1", "w2", "i"]);
        assert!(report.has_critical());
        assert!(!report.is_healthy());
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_builder_and_lookup() {
        let mut report = DiagnosticReport::new();
        report.push(
            DiagnosticIssue::new(IssueCategory::Bridge, Severity::Critical, titles::DEVICE_OFFLINE, "x")
                .causes(&["emulator crashed"])
                .fixes(&["restart"])
                .auto_fixable()
                .subject("127.0.0.1:62001"),
        );
        let found = report.find(titles::DEVICE_OFFLINE).unwrap();
        assert!(found.auto_fixable);
        assert_eq!(found.subject.as_deref(), Some("127.0.0.1:62001"));
        assert_eq!(report.auto_fixable_issues().count(), 1);
    }

    #[test]
    fn test_render_and_json() {
        colored::control::set_override(false);
        let mut report = DiagnosticReport::new();
        report.push(issue(Severity::Critical, "Broken").fixes(&["Fix it"]));
        report.set_status("server", "status", "refused");
        report.finish();

        let text = report.render_text();
        assert!(text.contains("1 critical"));
        assert!(text.contains("Broken"));
        assert!(text.contains("1. Fix it"));
        assert!(text.contains("status=refused"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["issues"][0]["severity"], "Critical");
        assert_eq!(json["status"]["server"]["status"], "refused");
    }
}
