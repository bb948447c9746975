//! Spam detection
//!
//! Honeypot, list, geo and statistical checks composed into one ordered
//! pipeline, plus the feedback loop that retrains the model from human
//! corrections.

pub mod bayes;
pub mod honeypot;
pub mod manager;
pub mod scorer;
pub mod trainer;
pub mod types;

pub use bayes::{Classification, ClassifierModel, ModelSnapshot, StatisticalClassifier, TokenCounts};
pub use honeypot::HoneypotValidator;
pub use manager::{BootstrapSummary, SpamEngine, SpamStats};
pub use scorer::{ScoreAggregator, Stage, StageOutcome};
pub use trainer::{FeedbackTrainer, LedgerEntry, LedgerSnapshot};
pub use types::*;
