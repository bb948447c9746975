//! Score aggregation
//!
//! The verdict comes from a fixed, ordered list of stages: honeypot,
//! lists (blacklist then wordlist), geo policy, classifier. The first
//! conclusive stage decides spam; otherwise the summed score is compared
//! with the spam threshold.

use tracing::debug;

use super::types::{Check, Label, Reason, Verdict};
use crate::submission::Submission;

/// What one stage contributes to a verdict
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Add `score` and keep evaluating
    Continue { score: f64, reasons: Vec<Reason> },
    /// Stop here, the submission is spam
    Conclusive { reasons: Vec<Reason> },
}

impl StageOutcome {
    /// Nothing to report
    pub fn neutral() -> Self {
        StageOutcome::Continue {
            score: 0.0,
            reasons: Vec::new(),
        }
    }
}

/// One step of the evaluation pipeline. Stages must not fail: degraded
/// inputs are reported as degraded reasons.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, submission: &Submission) -> StageOutcome;
}

/// Runs the stages in order and folds their outcomes into a verdict
pub struct ScoreAggregator {
    stages: Vec<Box<dyn Stage>>,
    spam_threshold: f64,
}

impl ScoreAggregator {
    pub fn new(stages: Vec<Box<dyn Stage>>, spam_threshold: f64) -> Self {
        Self {
            stages,
            spam_threshold,
        }
    }

    pub fn spam_threshold(&self) -> f64 {
        self.spam_threshold
    }

    /// Stage names in evaluation order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn evaluate(&self, submission: &Submission) -> Verdict {
        let mut total_score = 0.0;
        let mut reasons = Vec::new();

        for stage in &self.stages {
            match stage.evaluate(submission) {
                StageOutcome::Conclusive {
                    reasons: stage_reasons,
                } => {
                    debug!("Stage {} is conclusive for {}", stage.name(), submission.id());
                    reasons.extend(stage_reasons);
                    return Verdict {
                        label: Label::Spam,
                        score: total_score,
                        reasons,
                    };
                }
                StageOutcome::Continue {
                    score,
                    reasons: stage_reasons,
                } => {
                    debug!("Stage {} added {:.2} for {}", stage.name(), score, submission.id());
                    total_score += score;
                    reasons.extend(stage_reasons);
                }
            }
        }

        let label = if total_score >= self.spam_threshold {
            Label::Spam
        } else {
            Label::Ham
        };

        if !reasons.iter().any(|r| r.score != 0.0) && label == Label::Ham {
            reasons.push(Reason::new(Check::Aggregate, "no signals matched"));
        }
        reasons.push(Reason::new(
            Check::Aggregate,
            format!(
                "total score {:.2} {} threshold {:.2}",
                total_score,
                if label == Label::Spam { ">=" } else { "<" },
                self.spam_threshold
            ),
        ));

        Verdict {
            label,
            score: total_score,
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, StageOutcome);

    impl Stage for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn evaluate(&self, _submission: &Submission) -> StageOutcome {
            self.1.clone()
        }
    }

    fn scored(score: f64) -> StageOutcome {
        StageOutcome::Continue {
            score,
            reasons: vec![Reason::scored(Check::Wordlist, "match", score)],
        }
    }

    fn submission() -> Submission {
        Submission::new("f", "192.0.2.1")
    }

    #[test]
    fn test_sum_meets_threshold_is_spam() {
        let aggregator = ScoreAggregator::new(
            vec![Box::new(Fixed("a", scored(4.0))), Box::new(Fixed("b", scored(6.0)))],
            10.0,
        );
        let verdict = aggregator.evaluate(&submission());
        assert_eq!(verdict.label, Label::Spam);
        assert_eq!(verdict.score, 10.0);
    }

    #[test]
    fn test_below_threshold_is_ham() {
        let aggregator = ScoreAggregator::new(vec![Box::new(Fixed("a", scored(4.0)))], 10.0);
        let verdict = aggregator.evaluate(&submission());
        assert_eq!(verdict.label, Label::Ham);
        assert!(!verdict.mentions("no signals matched"));
    }

    #[test]
    fn test_clean_ham_has_reason() {
        let aggregator = ScoreAggregator::new(vec![Box::new(Fixed("a", StageOutcome::neutral()))], 5.0);
        let verdict = aggregator.evaluate(&submission());
        assert_eq!(verdict.label, Label::Ham);
        assert!(verdict.mentions("no signals matched"));
    }

    #[test]
    fn test_empty_pipeline_still_explains() {
        let aggregator = ScoreAggregator::new(Vec::new(), 5.0);
        let verdict = aggregator.evaluate(&submission());
        assert!(!verdict.reasons.is_empty());
    }

    #[test]
    fn test_conclusive_stops_pipeline() {
        let conclusive = StageOutcome::Conclusive {
            reasons: vec![Reason::new(Check::Honeypot, "honeypot")],
        };
        let aggregator = ScoreAggregator::new(
            vec![
                Box::new(Fixed("honeypot", conclusive)),
                Box::new(Fixed("never", scored(-100.0))),
            ],
            5.0,
        );
        let verdict = aggregator.evaluate(&submission());
        assert_eq!(verdict.label, Label::Spam);
        assert_eq!(verdict.reasons.len(), 1);
        assert_eq!(verdict.score, 0.0);
        assert_eq!(aggregator.stage_names(), vec!["honeypot", "never"]);
    }
}
