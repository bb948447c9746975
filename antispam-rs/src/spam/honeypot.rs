//! Honeypot check
//!
//! The decoy field is hidden from people, so only automated fillers ever
//! populate it.

use super::scorer::{Stage, StageOutcome};
use super::types::{Check, Reason};
use crate::submission::Submission;

pub struct HoneypotValidator {
    field: String,
}

impl HoneypotValidator {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// A missing field counts as empty
    pub fn is_tampered(&self, submission: &Submission) -> bool {
        submission
            .field(&self.field)
            .is_some_and(|value| !value.trim().is_empty())
    }
}

impl Stage for HoneypotValidator {
    fn name(&self) -> &'static str {
        "honeypot"
    }

    fn evaluate(&self, submission: &Submission) -> StageOutcome {
        if self.is_tampered(submission) {
            StageOutcome::Conclusive {
                reasons: vec![Reason::new(Check::Honeypot, "honeypot")],
            }
        } else {
            StageOutcome::neutral()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_honeypot_passes() {
        let validator = HoneypotValidator::new("honeypot");
        let submission = Submission::new("f", "192.0.2.1")
            .with_field("honeypot", "")
            .with_field("message", "hello");
        assert!(!validator.is_tampered(&submission));
        assert_eq!(validator.evaluate(&submission), StageOutcome::neutral());
    }

    #[test]
    fn test_missing_and_whitespace_honeypot_pass() {
        let validator = HoneypotValidator::new("honeypot");
        assert!(!validator.is_tampered(&Submission::new("f", "192.0.2.1")));
        assert!(!validator.is_tampered(
            &Submission::new("f", "192.0.2.1").with_field("honeypot", "   ")
        ));
    }

    #[test]
    fn test_filled_honeypot_is_conclusive() {
        let validator = HoneypotValidator::new("website");
        let submission = Submission::new("f", "192.0.2.1").with_field("website", "http://x.example");
        match validator.evaluate(&submission) {
            StageOutcome::Conclusive { reasons } => {
                assert_eq!(reasons.len(), 1);
                assert_eq!(reasons[0].check, Check::Honeypot);
                assert!(reasons[0].message.contains("honeypot"));
            }
            other => panic!("expected conclusive outcome, got {:?}", other),
        }
    }
}
