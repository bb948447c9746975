//! Spam types and data structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AntispamError;

/// Classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Ham,
    Spam,
    Unknown,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Label::Ham => "ham",
            Label::Spam => "spam",
            Label::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for Label {
    type Err = AntispamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ham" => Ok(Label::Ham),
            "spam" => Ok(Label::Spam),
            "unknown" => Ok(Label::Unknown),
            other => Err(AntispamError::InvalidLabel(other.to_string())),
        }
    }
}

/// Geo policy action for a country
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoAction {
    #[default]
    Allow,
    /// Add the configured flag score
    Flag,
    /// Force spam
    Deny,
}

impl fmt::Display for GeoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GeoAction::Allow => "allow",
            GeoAction::Flag => "flag",
            GeoAction::Deny => "deny",
        };
        f.write_str(s)
    }
}

impl FromStr for GeoAction {
    type Err = AntispamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(GeoAction::Allow),
            "flag" => Ok(GeoAction::Flag),
            "deny" => Ok(GeoAction::Deny),
            other => Err(AntispamError::Config(format!("unknown geo action: {}", other))),
        }
    }
}

/// The check a reason came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    Honeypot,
    Blacklist,
    Wordlist,
    Geo,
    Classifier,
    Aggregate,
}

/// One entry of a verdict's reason trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub check: Check,
    pub message: String,
    /// Score contribution of this reason
    pub score: f64,
    /// The check ran with reduced inputs (missing database, poisoned store)
    #[serde(default)]
    pub degraded: bool,
}

impl Reason {
    pub fn new(check: Check, message: impl Into<String>) -> Self {
        Self {
            check,
            message: message.into(),
            score: 0.0,
            degraded: false,
        }
    }

    pub fn scored(check: Check, message: impl Into<String>, score: f64) -> Self {
        Self {
            score,
            ..Self::new(check, message)
        }
    }

    pub fn degraded(check: Check, message: impl Into<String>) -> Self {
        Self {
            degraded: true,
            ..Self::new(check, message)
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.score != 0.0 {
            write!(f, "{} ({:+.2})", self.message, self.score)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Final decision for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    /// Aggregate score at the point the decision was taken
    pub score: f64,
    /// Ordered, never empty
    pub reasons: Vec<Reason>,
}

impl Verdict {
    pub fn is_spam(&self) -> bool {
        self.label == Label::Spam
    }

    /// At least one check ran degraded
    pub fn is_degraded(&self) -> bool {
        self.reasons.iter().any(|r| r.degraded)
    }

    /// Human-readable trail, one line per reason
    pub fn reason_trail(&self) -> Vec<String> {
        self.reasons.iter().map(|r| r.to_string()).collect()
    }

    /// Whether any reason message contains `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.reasons.iter().any(|r| r.message.contains(needle))
    }
}

/// Result of applying a human correction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainOutcome {
    Trained {
        label: Label,
        /// Sender address promoted to the blacklist by this correction
        promoted: Option<String>,
    },
    /// This submission was already trained with this label
    AlreadyTrained,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_and_display() {
        assert_eq!("SPAM".parse::<Label>().unwrap(), Label::Spam);
        assert_eq!(" ham ".parse::<Label>().unwrap(), Label::Ham);
        assert!("maybe".parse::<Label>().is_err());
        assert_eq!(Label::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_geo_action_parse() {
        assert_eq!("Deny".parse::<GeoAction>().unwrap(), GeoAction::Deny);
        assert!(matches!(
            "block".parse::<GeoAction>(),
            Err(AntispamError::Config(_))
        ));
    }

    #[test]
    fn test_reason_display() {
        let r = Reason::scored(Check::Wordlist, "wordlist match: viagra", 10.0);
        assert_eq!(r.to_string(), "wordlist match: viagra (+10.00)");

        let r = Reason::new(Check::Aggregate, "no signals matched");
        assert_eq!(r.to_string(), "no signals matched");
    }

    #[test]
    fn test_verdict_helpers() {
        let verdict = Verdict {
            label: Label::Ham,
            score: 0.0,
            reasons: vec![
                Reason::degraded(Check::Geo, "geo check skipped: database unavailable"),
                Reason::new(Check::Aggregate, "no signals matched"),
            ],
        };
        assert!(!verdict.is_spam());
        assert!(verdict.is_degraded());
        assert!(verdict.mentions("database unavailable"));
        assert_eq!(verdict.reason_trail().len(), 2);
    }
}
