pub mod command;

pub use command::classify_command;

use std::fmt;

/// How dangerous a generated command is. Variants are ordered by severity,
/// so `max` picks the verdict that wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Safe,
    Destructive,
    Blocked,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Safe => "safe",
            Severity::Destructive => "destructive",
            Severity::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(Severity::Safe),
            "destructive" => Some(Severity::Destructive),
            "blocked" => Some(Severity::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Safe => write!(f, "SAFE"),
            Severity::Destructive => write!(f, "DESTRUCTIVE"),
            Severity::Blocked => write!(f, "BLOCKED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub severity: Severity,
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            severity: Severity::Safe,
            reason: None,
        }
    }

    pub fn destructive(reason: impl Into<String>) -> Self {
        Self {
            severity: Severity::Destructive,
            reason: Some(reason.into()),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            severity: Severity::Blocked,
            reason: Some(reason.into()),
        }
    }

    /// Keep whichever verdict is more severe. On a tie the existing reason wins,
    /// so the first rule that fired is the one reported.
    pub fn escalate(self, other: SafetyVerdict) -> SafetyVerdict {
        if other.severity > self.severity {
            other
        } else {
            self
        }
    }

    pub fn is_safe(&self) -> bool {
        self.severity == Severity::Safe
    }

    pub fn is_blocked(&self) -> bool {
        self.severity == Severity::Blocked
    }

    pub fn needs_confirmation(&self) -> bool {
        self.severity == Severity::Destructive
    }
}

impl fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.severity, reason),
            None => write!(f, "{}", self.severity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Blocked > Severity::Destructive);
        assert!(Severity::Destructive > Severity::Safe);
    }

    #[test]
    fn test_escalate_picks_most_severe() {
        let v = SafetyVerdict::safe()
            .escalate(SafetyVerdict::destructive("rm"))
            .escalate(SafetyVerdict::blocked("root"))
            .escalate(SafetyVerdict::destructive("later"));
        assert_eq!(v.severity, Severity::Blocked);
        assert_eq!(v.reason.as_deref(), Some("root"));
    }

    #[test]
    fn test_escalate_tie_keeps_first_reason() {
        let v = SafetyVerdict::destructive("first").escalate(SafetyVerdict::destructive("second"));
        assert_eq!(v.reason.as_deref(), Some("first"));
    }

    #[test]
    fn test_severity_str_roundtrip() {
        for s in [Severity::Safe, Severity::Destructive, Severity::Blocked] {
            assert_eq!(Severity::parse(s.as_str()), Some(s));
        }
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(SafetyVerdict::safe().to_string(), "SAFE");
        assert_eq!(
            SafetyVerdict::blocked("nope").to_string(),
            "BLOCKED: nope"
        );
    }
}
