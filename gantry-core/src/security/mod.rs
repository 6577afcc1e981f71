//! Security policy engine.
//!
//! Scans a resolved container configuration for hazards before anything is
//! created on a host. The audit never errors; it returns an ordered list of
//! violations, and deployment is blocked only when at least one is critical.

mod policy;

pub use policy::{audit, blocks, PolicyEngine};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a security violation.
///
/// Ordering is by hazard level, so `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// One level lower, saturating at `Info`. Used for read-only mount relief.
    pub fn step_down(&self) -> Severity {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low | Severity::Info => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One configuration hazard found by the audit.
///
/// Transient value object; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub severity: Severity,
    /// Configuration field the violation applies to (e.g. "privileged").
    pub field: String,
    pub message: String,
}

impl SecurityViolation {
    pub fn new(severity: Severity, field: &str, message: impl Into<String>) -> Self {
        Self { severity, field: field.to_string(), message: message.into() }
    }
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn test_step_down_is_exactly_one_level() {
        assert_eq!(Severity::Critical.step_down(), Severity::High);
        assert_eq!(Severity::High.step_down(), Severity::Medium);
        assert_eq!(Severity::Medium.step_down(), Severity::Low);
        assert_eq!(Severity::Low.step_down(), Severity::Info);
        assert_eq!(Severity::Info.step_down(), Severity::Info);
    }
}
