//! Bayesian token classifier
//!
//! Token spamicity uses add-one (Laplace) smoothed per-class likelihoods:
//!
//! ```text
//! p_s = (spam_count + 1) / (spam_documents + 2)
//! p_h = (ham_count + 1)  / (ham_documents + 2)
//! p   = clamp(p_s / (p_s + p_h), 0.01, 0.99)
//! ```
//!
//! Known tokens are combined with the Bayes chain rule in log-odds space,
//! `P = 1 / (1 + exp(-Σ ln(p / (1 - p))))`, with a neutral prior. Tokens the
//! model has never seen are skipped. Smoothing keeps the estimate defined
//! when only one class has been trained.

use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::scorer::{Stage, StageOutcome};
use super::types::{Check, Label, Reason};
use crate::error::{AntispamError, Result};
use crate::submission::Submission;
use crate::utils::lock;

const MIN_TOKEN_LEN: usize = 3;
const MAX_TOKEN_LEN: usize = 25;
const MIN_SPAMICITY: f64 = 0.01;
const MAX_SPAMICITY: f64 = 0.99;

/// Per-token occurrence counts (documents containing the token)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub spam: u64,
    pub ham: u64,
}

/// Serializable copy of the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub tokens: BTreeMap<String, TokenCounts>,
    pub spam_documents: u64,
    pub ham_documents: u64,
}

#[derive(Debug, Default)]
struct ModelState {
    tokens: HashMap<String, TokenCounts>,
    spam_documents: u64,
    ham_documents: u64,
}

/// Classifier output for one document
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Spam probability in [0, 1]; 0.5 when there is no evidence
    pub probability: f64,
    /// Tokens of the document the model knows
    pub known_tokens: usize,
    /// The model has learned at least one document
    pub trained: bool,
}

impl Classification {
    fn neutral(trained: bool) -> Self {
        Self {
            probability: 0.5,
            known_tokens: 0,
            trained,
        }
    }
}

/// Token frequency model shared by evaluation and training.
///
/// Reads take the read lock; training one document takes the write lock
/// once, so concurrent corrections never interleave on a token's counters.
pub struct ClassifierModel {
    state: RwLock<ModelState>,
    stemmer: Stemmer,
}

impl ClassifierModel {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ModelState::default()),
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Distinct lower-cased, stemmed words of 3 to 25 characters
    pub fn tokenize(&self, text: &str) -> BTreeSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| {
                let len = s.chars().count();
                (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&len)
            })
            .map(|s| self.stemmer.stem(s).into_owned())
            .collect()
    }

    /// Tokens of every content field of a submission
    pub fn tokenize_submission(&self, submission: &Submission, honeypot_field: &str) -> BTreeSet<String> {
        submission
            .content_fields(honeypot_field)
            .flat_map(|f| self.tokenize(&f.value))
            .collect()
    }

    /// Count one document under `label`
    pub fn learn(&self, tokens: &BTreeSet<String>, label: Label) -> Result<()> {
        if label == Label::Unknown {
            return Err(AntispamError::InvalidLabel(
                "cannot train on an unknown label".to_string(),
            ));
        }

        let mut state = lock::write(&self.state, "classifier model")?;
        for token in tokens {
            let counts = state.tokens.entry(token.clone()).or_default();
            match label {
                Label::Spam => counts.spam = counts.spam.saturating_add(1),
                _ => counts.ham = counts.ham.saturating_add(1),
            }
        }
        match label {
            Label::Spam => state.spam_documents = state.spam_documents.saturating_add(1),
            _ => state.ham_documents = state.ham_documents.saturating_add(1),
        }

        debug!("Learned {} document with {} tokens", label, tokens.len());
        Ok(())
    }

    /// Tokenize and learn a free-text document
    pub fn learn_text(&self, text: &str, label: Label) -> Result<()> {
        let tokens = self.tokenize(text);
        self.learn(&tokens, label)
    }

    /// Spam probability of a token set
    pub fn classify(&self, tokens: &BTreeSet<String>) -> Result<Classification> {
        let state = lock::read(&self.state, "classifier model")?;

        if state.spam_documents == 0 && state.ham_documents == 0 {
            return Ok(Classification::neutral(false));
        }

        let mut log_odds = 0.0f64;
        let mut known_tokens = 0;

        for token in tokens {
            if let Some(counts) = state.tokens.get(token) {
                let p = spamicity(counts, state.spam_documents, state.ham_documents);
                log_odds += (p / (1.0 - p)).ln();
                known_tokens += 1;
            }
        }

        if known_tokens == 0 {
            return Ok(Classification::neutral(true));
        }

        Ok(Classification {
            probability: 1.0 / (1.0 + (-log_odds).exp()),
            known_tokens,
            trained: true,
        })
    }

    pub fn classify_text(&self, text: &str) -> Result<Classification> {
        let tokens = self.tokenize(text);
        self.classify(&tokens)
    }

    /// Smoothed spamicity of a single word, `None` if the model never saw it
    pub fn token_probability(&self, word: &str) -> Result<Option<f64>> {
        let token = self.stemmer.stem(&word.to_lowercase()).into_owned();
        let state = lock::read(&self.state, "classifier model")?;
        Ok(state
            .tokens
            .get(&token)
            .map(|counts| spamicity(counts, state.spam_documents, state.ham_documents)))
    }

    pub fn token_counts(&self, word: &str) -> Result<Option<TokenCounts>> {
        let token = self.stemmer.stem(&word.to_lowercase()).into_owned();
        let state = lock::read(&self.state, "classifier model")?;
        Ok(state.tokens.get(&token).copied())
    }

    /// Spam and ham documents learned
    pub fn training_counts(&self) -> (u64, u64) {
        lock::read(&self.state, "classifier model")
            .map(|s| (s.spam_documents, s.ham_documents))
            .unwrap_or((0, 0))
    }

    pub fn token_count(&self) -> usize {
        lock::read(&self.state, "classifier model")
            .map(|s| s.tokens.len())
            .unwrap_or(0)
    }

    /// Forget everything
    pub fn reset(&self) -> Result<()> {
        let mut state = lock::write(&self.state, "classifier model")?;
        *state = ModelState::default();
        Ok(())
    }

    pub fn snapshot(&self) -> Result<ModelSnapshot> {
        let state = lock::read(&self.state, "classifier model")?;
        Ok(ModelSnapshot {
            tokens: state
                .tokens
                .iter()
                .map(|(token, counts)| (token.clone(), *counts))
                .collect(),
            spam_documents: state.spam_documents,
            ham_documents: state.ham_documents,
        })
    }

    /// Replace the model with a stored snapshot (bootstrap seeding)
    pub fn load(&self, snapshot: ModelSnapshot) -> Result<()> {
        let mut state = lock::write(&self.state, "classifier model")?;
        *state = ModelState {
            tokens: snapshot.tokens.into_iter().collect(),
            spam_documents: snapshot.spam_documents,
            ham_documents: snapshot.ham_documents,
        };
        Ok(())
    }
}

impl Default for ClassifierModel {
    fn default() -> Self {
        Self::new()
    }
}

fn spamicity(counts: &TokenCounts, spam_documents: u64, ham_documents: u64) -> f64 {
    let p_spam = (counts.spam as f64 + 1.0) / (spam_documents as f64 + 2.0);
    let p_ham = (counts.ham as f64 + 1.0) / (ham_documents as f64 + 2.0);
    (p_spam / (p_spam + p_ham)).clamp(MIN_SPAMICITY, MAX_SPAMICITY)
}

/// Pipeline stage turning the model's probability into a score
pub struct StatisticalClassifier {
    model: Arc<ClassifierModel>,
    honeypot_field: String,
    /// Probability at or above which spam is recommended
    threshold: f64,
    /// Contribution of a fully confident result
    weight: f64,
}

impl StatisticalClassifier {
    pub fn new(
        model: Arc<ClassifierModel>,
        honeypot_field: impl Into<String>,
        threshold: f64,
        weight: f64,
    ) -> Self {
        Self {
            model,
            honeypot_field: honeypot_field.into(),
            threshold,
            weight,
        }
    }

    /// Score added for `probability`, in `[0, weight]`
    pub fn contribution(&self, probability: f64) -> f64 {
        probability.clamp(0.0, 1.0) * self.weight
    }
}

impl Stage for StatisticalClassifier {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn evaluate(&self, submission: &Submission) -> StageOutcome {
        let tokens = self.model.tokenize_submission(submission, &self.honeypot_field);

        let classification = match self.model.classify(&tokens) {
            Ok(c) => c,
            Err(e) => {
                warn!("Classifier skipped for {}: {}", submission.id(), e);
                return StageOutcome::Continue {
                    score: 0.0,
                    reasons: vec![Reason::degraded(
                        Check::Classifier,
                        "classifier skipped: model unavailable",
                    )],
                };
            }
        };

        if !classification.trained {
            return StageOutcome::Continue {
                score: 0.0,
                reasons: vec![Reason::new(
                    Check::Classifier,
                    "classifier: no training data",
                )],
            };
        }

        if classification.known_tokens == 0 {
            return StageOutcome::Continue {
                score: 0.0,
                reasons: vec![Reason::new(Check::Classifier, "classifier: no known tokens")],
            };
        }

        let score = self.contribution(classification.probability);
        let mut reasons = vec![Reason::scored(
            Check::Classifier,
            format!("classifier probability {:.2}", classification.probability),
            score,
        )];
        if classification.probability >= self.threshold {
            reasons.push(Reason::new(Check::Classifier, "classifier recommends spam"));
        }

        StageOutcome::Continue { score, reasons }
    }
}
