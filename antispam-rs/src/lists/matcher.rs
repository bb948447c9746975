use std::sync::Arc;
use tracing::{debug, warn};

use super::{BlacklistStore, WordlistStore};
use crate::spam::scorer::{Stage, StageOutcome};
use crate::spam::types::{Check, Reason};
use crate::submission::Submission;

/// Blacklist short-circuit followed by wordlist scoring
pub struct ListMatcher {
    blacklist: Arc<BlacklistStore>,
    wordlist: Arc<WordlistStore>,
    honeypot_field: String,
}

impl ListMatcher {
    pub fn new(
        blacklist: Arc<BlacklistStore>,
        wordlist: Arc<WordlistStore>,
        honeypot_field: impl Into<String>,
    ) -> Self {
        Self {
            blacklist,
            wordlist,
            honeypot_field: honeypot_field.into(),
        }
    }
}

impl Stage for ListMatcher {
    fn name(&self) -> &'static str {
        "lists"
    }

    fn evaluate(&self, submission: &Submission) -> StageOutcome {
        let mut reasons = Vec::new();

        match self.blacklist.find_match(submission) {
            Ok(Some(entry)) => {
                debug!("Submission {} hit blacklist entry {}", submission.id(), entry.identifier);
                return StageOutcome::Conclusive {
                    reasons: vec![Reason::new(
                        Check::Blacklist,
                        format!("blacklist match: {}", entry.identifier),
                    )],
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Blacklist check skipped for {}: {}", submission.id(), e);
                reasons.push(Reason::degraded(
                    Check::Blacklist,
                    "blacklist check skipped: list store unavailable",
                ));
            }
        }

        let mut score = 0.0;
        match self.wordlist.matches(submission, &self.honeypot_field) {
            Ok(matches) => {
                for m in matches {
                    let weight = f64::from(m.weight);
                    score += weight;
                    reasons.push(Reason::scored(
                        Check::Wordlist,
                        format!("wordlist match: {} in {}", m.pattern, m.field),
                        weight,
                    ));
                }
            }
            Err(e) => {
                warn!("Wordlist check skipped for {}: {}", submission.id(), e);
                reasons.push(Reason::degraded(
                    Check::Wordlist,
                    "wordlist check skipped: list store unavailable",
                ));
            }
        }

        StageOutcome::Continue { score, reasons }
    }
}
