//! Human feedback
//!
//! Corrections retrain the classifier and, for spam, count repeat offenses
//! per sender address. A sender reaching the configured number of confirmed
//! spam submissions is promoted to the blacklist. Ham corrections never
//! remove list entries.
//!
//! A submission is learned at most once per label. Flipping it back to a
//! label it was already learned under only moves its current label.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::bayes::ClassifierModel;
use super::types::{Label, TrainOutcome};
use crate::error::{AntispamError, Result};
use crate::lists::{BlacklistEntry, BlacklistStore, IdentifierKind};
use crate::submission::Submission;
use crate::utils::lock;

/// Training state of one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Latest human label
    pub label: Label,
    /// The model holds this submission as a spam document
    pub spam_learned: bool,
    /// The model holds this submission as a ham document
    pub ham_learned: bool,
    /// The submission already counted toward its sender's offenses
    pub offense_counted: bool,
}

impl LedgerEntry {
    fn new(label: Label) -> Self {
        Self {
            label,
            spam_learned: false,
            ham_learned: false,
            offense_counted: false,
        }
    }

    pub fn has_learned(&self, label: Label) -> bool {
        match label {
            Label::Spam => self.spam_learned,
            Label::Ham => self.ham_learned,
            Label::Unknown => false,
        }
    }

    fn mark_learned(&mut self, label: Label) {
        match label {
            Label::Spam => self.spam_learned = true,
            Label::Ham => self.ham_learned = true,
            Label::Unknown => {}
        }
    }
}

/// Serializable copy of the training ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub trained: BTreeMap<String, LedgerEntry>,
    pub offenses: BTreeMap<String, u32>,
}

/// Applies human labels to the model and the blacklist
pub struct FeedbackTrainer {
    model: Arc<ClassifierModel>,
    blacklist: Arc<BlacklistStore>,
    ledger: Mutex<LedgerSnapshot>,
    auto_blacklist_threshold: u32,
}

impl FeedbackTrainer {
    pub fn new(
        model: Arc<ClassifierModel>,
        blacklist: Arc<BlacklistStore>,
        auto_blacklist_threshold: u32,
    ) -> Self {
        Self {
            model,
            blacklist,
            ledger: Mutex::new(LedgerSnapshot::default()),
            auto_blacklist_threshold,
        }
    }

    /// Train on `submission` with a human `label`.
    ///
    /// The ledger lock is held across the check and the update, so two
    /// concurrent corrections of the same submission train it once.
    pub fn train(&self, submission: &Submission, label: Label, honeypot_field: &str) -> Result<TrainOutcome> {
        if label == Label::Unknown {
            return Err(AntispamError::InvalidLabel(
                "submissions can only be trained as ham or spam".to_string(),
            ));
        }

        let mut ledger = lock::lock(&self.ledger, "training ledger")?;
        let mut entry = ledger
            .trained
            .get(submission.id())
            .copied()
            .unwrap_or_else(|| LedgerEntry::new(label));

        if entry.has_learned(label) {
            if entry.label != label {
                entry.label = label;
                ledger.trained.insert(submission.id().to_string(), entry);
                debug!("Submission {} relabelled {}, already learned", submission.id(), label);
            } else {
                debug!("Submission {} already trained as {}", submission.id(), label);
            }
            return Ok(TrainOutcome::AlreadyTrained);
        }

        let tokens = self.model.tokenize_submission(submission, honeypot_field);
        self.model.learn(&tokens, label)?;

        entry.label = label;
        entry.mark_learned(label);
        let sender = match label {
            Label::Spam if !entry.offense_counted => self.offender_key(submission),
            _ => None,
        };
        if sender.is_some() {
            entry.offense_counted = true;
        }
        ledger.trained.insert(submission.id().to_string(), entry);

        let mut promoted = None;
        if let Some(sender) = sender {
            let count = ledger.offenses.entry(sender.clone()).or_insert(0);
            *count = count.saturating_add(1);
            let count = *count;
            debug!("Sender {} has {} confirmed spam submissions", sender, count);

            if count >= self.auto_blacklist_threshold {
                match self.promote(&sender, count) {
                    Ok(true) => promoted = Some(sender),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to promote {} to the blacklist: {}", sender, e),
                }
            }
        }

        info!("Trained submission {} as {}", submission.id(), label);
        Ok(TrainOutcome::Trained { label, promoted })
    }

    /// Blacklist `sender` unless a live entry already covers it
    fn promote(&self, sender: &str, count: u32) -> Result<bool> {
        if self.blacklist.is_blacklisted(sender, Utc::now())? {
            return Ok(false);
        }
        let entry = BlacklistEntry::new(sender, self.blacklist.case_sensitive())?
            .with_reason(format!("auto-promoted after {} spam confirmations", count));
        self.blacklist.add(entry)?;
        info!("Sender {} promoted to blacklist", sender);
        Ok(true)
    }

    /// Canonical sender address, if the sender is an IP address
    fn offender_key(&self, submission: &Submission) -> Option<String> {
        match IdentifierKind::detect(submission.sender(), self.blacklist.case_sensitive()) {
            Ok((IdentifierKind::Address, key)) => Some(key),
            _ => {
                debug!(
                    "Sender {:?} of {} is not an address, no offense recorded",
                    submission.sender(),
                    submission.id()
                );
                None
            }
        }
    }

    pub fn trained_label(&self, submission_id: &str) -> Result<Option<Label>> {
        let ledger = lock::lock(&self.ledger, "training ledger")?;
        Ok(ledger.trained.get(submission_id).map(|entry| entry.label))
    }

    /// Confirmed spam submissions of `sender`, in any address notation
    pub fn offenses(&self, sender: &str) -> Result<u32> {
        let key = match IdentifierKind::detect(sender, self.blacklist.case_sensitive()) {
            Ok((IdentifierKind::Address, key)) => key,
            _ => return Ok(0),
        };
        let ledger = lock::lock(&self.ledger, "training ledger")?;
        Ok(ledger.offenses.get(&key).copied().unwrap_or(0))
    }

    pub fn trained_count(&self) -> usize {
        lock::lock(&self.ledger, "training ledger")
            .map(|l| l.trained.len())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        let ledger = lock::lock(&self.ledger, "training ledger")?;
        Ok(ledger.clone())
    }

    pub fn load(&self, snapshot: LedgerSnapshot) -> Result<()> {
        let mut ledger = lock::lock(&self.ledger, "training ledger")?;
        *ledger = snapshot;
        Ok(())
    }

    /// Forget which submissions were trained and every offense count
    pub fn reset(&self) -> Result<()> {
        let mut ledger = lock::lock(&self.ledger, "training ledger")?;
        *ledger = LedgerSnapshot::default();
        Ok(())
    }
}
