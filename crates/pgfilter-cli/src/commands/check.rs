//! `pgfilterproxy check` command implementation.
//!
//! Validates a config file the same way `serve` and a reload would, and
//! points out settings that are valid but probably not what was meant.

use anyhow::Result;
use pgfilter_core::ProxyConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ============================================================================
// Check Result Types
// ============================================================================

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational message.
    Info,
    /// Warning - may indicate a potential issue.
    Warning,
    /// Error - configuration is invalid.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: String,
    pub message: String,
    /// Config key the finding refers to (e.g. "allowed_fingerprints[2]").
    pub location: Option<String>,
}

impl CheckFinding {
    fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Results from running all checks.
#[derive(Debug)]
pub struct CheckResults {
    pub file: PathBuf,
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            findings: Vec::new(),
        }
    }

    fn add(&mut self, finding: CheckFinding) {
        self.findings.push(finding);
    }

    /// Returns true if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Print human-readable summary, most severe first.
    pub fn print_summary(&self) {
        let mut findings: Vec<_> = self.findings.iter().collect();
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.category.cmp(&b.category))
        });

        println!("Checked {}", self.file.display());
        println!("{}", "─".repeat(60));
        for finding in findings {
            print_finding(finding);
        }

        println!("{}", "═".repeat(60));
        if self.error_count() == 0 && self.warning_count() == 0 {
            println!("✅ All checks passed!");
        } else {
            println!(
                "Summary: {} error(s), {} warning(s)",
                self.error_count(),
                self.warning_count()
            );
        }
    }
}

fn print_finding(finding: &CheckFinding) {
    let icon = match finding.severity {
        Severity::Error => "✗",
        Severity::Warning => "⚠",
        Severity::Info => "ℹ",
    };

    let location = finding
        .location
        .as_ref()
        .map(|l| format!(" [{l}]"))
        .unwrap_or_default();

    println!(
        "  {} {} [{}]{}: {}",
        icon, finding.severity, finding.category, location, finding.message
    );
}

// ============================================================================
// Checks
// ============================================================================

/// Run every check against the file at `path`.
pub fn check(path: &Path) -> CheckResults {
    let mut results = CheckResults::new(path);

    let config = match ProxyConfig::from_path(path) {
        Ok(config) => config,
        Err(e) => {
            results.add(CheckFinding::error("config", e.to_string()));
            return results;
        }
    };

    check_policy(&config, &mut results);
    check_fingerprints(&config, &mut results);
    check_commands(&config, &mut results);
    check_audit(&config, &mut results);
    results
}

fn check_policy(config: &ProxyConfig, results: &mut CheckResults) {
    match config.to_policy() {
        Ok(policy) => {
            if policy.listen_address == policy.target_address {
                results.add(
                    CheckFinding::error("addresses", "proxy would forward to itself")
                        .with_location("target_server"),
                );
            }
            if policy.ignore_unix_timestamps {
                results.add(CheckFinding::info(
                    "fingerprints",
                    "runs of 9 to 15 digits are ignored when fingerprinting",
                ));
            }
        }
        Err(e) => results.add(CheckFinding::error("policy", e.to_string())),
    }
}

fn check_fingerprints(config: &ProxyConfig, results: &mut CheckResults) {
    if config.allowed_fingerprints.is_empty() {
        results.add(
            CheckFinding::warning("fingerprints", "no fingerprints allowed; every query will be rejected")
                .with_location("allowed_fingerprints"),
        );
        return;
    }

    let mut seen = HashSet::new();
    for (i, raw) in config.allowed_fingerprints.iter().enumerate() {
        let fingerprint = raw.trim().to_ascii_lowercase();
        let location = format!("allowed_fingerprints[{i}]");

        if fingerprint.len() != 16 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            results.add(
                CheckFinding::warning(
                    "fingerprints",
                    format!("'{raw}' is not a 16 digit hex fingerprint and will never match"),
                )
                .with_location(location),
            );
        } else if !seen.insert(fingerprint) {
            results.add(
                CheckFinding::warning("fingerprints", format!("'{raw}' is listed more than once"))
                    .with_location(location),
            );
        }
    }
}

fn check_commands(config: &ProxyConfig, results: &mut CheckResults) {
    let allows = |tag: &str| config.allowed_commands.iter().any(|c| c == tag);

    if !allows("X") {
        results.add(
            CheckFinding::warning(
                "commands",
                "Terminate ('X') is not allowed; clients cannot disconnect cleanly",
            )
            .with_location("allowed_commands"),
        );
    }
    if allows("Q") {
        results.add(
            CheckFinding::info(
                "commands",
                "'Q' is listed but simple queries are always judged by fingerprint",
            )
            .with_location("allowed_commands"),
        );
    }
}

fn check_audit(config: &ProxyConfig, results: &mut CheckResults) {
    let audit = &config.audit;
    if !audit.enabled {
        return;
    }

    if !audit.stdout && audit.file.is_none() {
        results.add(
            CheckFinding::error("audit", "audit is enabled but has no output")
                .with_location("audit"),
        );
    }

    if let Some(file) = &audit.file {
        let parent = file.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent
            && !parent.is_dir()
        {
            results.add(
                CheckFinding::error(
                    "audit",
                    format!("directory {} does not exist", parent.display()),
                )
                .with_location("audit.file"),
            );
        }
    }
}

/// Run the checks, print the findings, and fail if any are errors.
pub fn run_check(path: &Path) -> Result<()> {
    let results = check(path);
    results.print_summary();

    if results.has_errors() {
        anyhow::bail!(
            "{} has {} error(s)",
            path.display(),
            results.error_count()
        );
    }
    Ok(())
}
