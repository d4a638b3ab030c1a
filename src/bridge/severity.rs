//! Severity classification for bridge notifications
//!
//! Severity drives routing, rate limiting and escalation:
//! - CRITICAL / HIGH: routed to live channels, may require acknowledgement
//! - MEDIUM: user should know (SLO at risk, degraded telemetry)
//! - LOW: informational only

/// Ordered severity scale. Derived `Ord` makes `>=high` rule
/// comparisons ordinal instead of string-based.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse a severity name (case-insensitive)
    pub fn parse(s: &str) -> Option<Severity> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Classify an SLO status report into a severity.
///
/// Only non-`ok` statuses reach this point. A breached SLO with the
/// whole error budget burned is critical; a breach with budget left is
/// high; anything else non-ok (at_risk, warn, ...) is medium.
pub fn slo_severity(status: &str, error_budget_used_pct: f64) -> Severity {
    match status {
        "breached" if error_budget_used_pct >= 100.0 => Severity::Critical,
        "breached" => Severity::High,
        _ => Severity::Medium,
    }
}

/// Classify a telemetry alert level into a severity.
///
/// Only `error` level alerts are processed by the bridge; the mapping
/// still degrades gracefully for anything else that slips through.
pub fn telemetry_severity(level: &str) -> Severity {
    match level {
        "error" => Severity::High,
        "warn" | "warning" => Severity::Medium,
        _ => Severity::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_ordinal() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::High >= Severity::High);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse(" medium "), Some(Severity::Medium));
        assert_eq!(Severity::parse("nope"), None);
    }

    #[test]
    fn test_display_and_as_str() {
        assert_eq!(Severity::Critical.as_str(), "critical");
        assert_eq!(format!("{}", Severity::Low), "low");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(back, Severity::Critical);
    }

    #[test]
    fn test_slo_severity() {
        assert_eq!(slo_severity("breached", 120.0), Severity::Critical);
        assert_eq!(slo_severity("breached", 100.0), Severity::Critical);
        assert_eq!(slo_severity("breached", 64.0), Severity::High);
        assert_eq!(slo_severity("at_risk", 80.0), Severity::Medium);
        assert_eq!(slo_severity("warn", 10.0), Severity::Medium);
    }

    #[test]
    fn test_telemetry_severity() {
        assert_eq!(telemetry_severity("error"), Severity::High);
        assert_eq!(telemetry_severity("warn"), Severity::Medium);
        assert_eq!(telemetry_severity("info"), Severity::Low);
    }
}
