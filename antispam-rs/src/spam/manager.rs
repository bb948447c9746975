//! Spam engine
//!
//! Owns the shared stores, composes the evaluation pipeline and exposes the
//! administrative operations (list management, reclassification, model
//! maintenance). Every operation takes `&self`; the engine is meant to be
//! shared behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use super::bayes::{ClassifierModel, StatisticalClassifier};
use super::honeypot::HoneypotValidator;
use super::scorer::{ScoreAggregator, Stage};
use super::trainer::FeedbackTrainer;
use super::types::{GeoAction, Label, TrainOutcome, Verdict};
use crate::archive::{ArchiveRecord, MessageArchive};
use crate::config::{Config, EngineConfig};
use crate::error::{AntispamError, Result};
use crate::geo::{GeoPolicy, GeoPolicyCheck, GeoResolver};
use crate::lists::{BlacklistEntry, BlacklistStore, ListMatcher, WordlistEntry, WordlistStore};
use crate::submission::Submission;
use crate::utils::lock;

/// Engine statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpamStats {
    /// Submissions evaluated since start
    pub evaluated: u64,
    /// Submissions classified as spam
    pub spam_detected: u64,
    /// Submissions classified as ham
    pub ham_detected: u64,
    /// Verdicts with at least one degraded check
    pub degraded: u64,
    /// Classifier training: spam documents learned
    pub spam_learned: u64,
    /// Classifier training: ham documents learned
    pub ham_learned: u64,
    /// Distinct tokens in the model
    pub tokens: usize,
    pub trained_submissions: usize,
    pub wordlist_entries: usize,
    pub blacklist_entries: usize,
    pub geo_rules: usize,
    pub geo_available: bool,
}

/// Result of seeding the model from the archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapSummary {
    pub trained: usize,
    /// Already trained with the same label
    pub skipped: usize,
    /// Records without a usable label
    pub unlabeled: usize,
}

#[derive(Debug, Default)]
struct Counters {
    evaluated: AtomicU64,
    spam: AtomicU64,
    ham: AtomicU64,
    degraded: AtomicU64,
}

/// Anti-spam decision engine
pub struct SpamEngine {
    config: EngineConfig,
    aggregator: ScoreAggregator,
    model: Arc<ClassifierModel>,
    wordlist: Arc<WordlistStore>,
    blacklist: Arc<BlacklistStore>,
    geo_policy: Arc<RwLock<GeoPolicy>>,
    resolver: Arc<GeoResolver>,
    trainer: FeedbackTrainer,
    archive: Option<Arc<dyn MessageArchive>>,
    counters: Counters,
}

impl SpamEngine {
    /// Build an engine from a validated configuration
    pub fn new(
        config: EngineConfig,
        resolver: GeoResolver,
        archive: Option<Arc<dyn MessageArchive>>,
    ) -> Result<Self> {
        config.validate()?;

        let model = Arc::new(ClassifierModel::new());
        let wordlist = Arc::new(WordlistStore::new(config.case_sensitive));
        let blacklist = Arc::new(BlacklistStore::new(config.case_sensitive));
        let geo_policy = Arc::new(RwLock::new(GeoPolicy::from_config(&config)?));
        let resolver = Arc::new(resolver);

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(HoneypotValidator::new(config.honeypot_field.clone())),
            Box::new(ListMatcher::new(
                Arc::clone(&blacklist),
                Arc::clone(&wordlist),
                config.honeypot_field.clone(),
            )),
            Box::new(GeoPolicyCheck::new(
                Arc::clone(&resolver),
                Arc::clone(&geo_policy),
                config.geo_flag_score,
            )),
            Box::new(StatisticalClassifier::new(
                Arc::clone(&model),
                config.honeypot_field.clone(),
                config.classifier_threshold,
                config.classifier_weight,
            )),
        ];
        let aggregator = ScoreAggregator::new(stages, config.spam_threshold);

        let trainer = FeedbackTrainer::new(
            Arc::clone(&model),
            Arc::clone(&blacklist),
            config.auto_blacklist_threshold,
        );

        info!(
            "Spam engine ready: threshold {:.2}, stages {:?}, geo {}",
            config.spam_threshold,
            aggregator.stage_names(),
            if resolver.is_available() { "available" } else { "unavailable" }
        );

        Ok(Self {
            config,
            aggregator,
            model,
            wordlist,
            blacklist,
            geo_policy,
            resolver,
            trainer,
            archive,
            counters: Counters::default(),
        })
    }

    /// Build an engine from the full configuration, opening the GeoIP database
    pub fn from_config(config: &Config, archive: Option<Arc<dyn MessageArchive>>) -> Result<Self> {
        config.validate()?;
        let resolver = GeoResolver::open(config.geo.database_path.as_deref(), config.geo.cache_capacity);
        Self::new(config.engine.clone(), resolver, archive)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify a submission. Never fails: unavailable checks are recorded
    /// as degraded reasons in the verdict.
    pub fn evaluate(&self, submission: &Submission) -> Verdict {
        let verdict = self.aggregator.evaluate(submission);

        self.counters.evaluated.fetch_add(1, Ordering::Relaxed);
        match verdict.label {
            Label::Spam => self.counters.spam.fetch_add(1, Ordering::Relaxed),
            _ => self.counters.ham.fetch_add(1, Ordering::Relaxed),
        };
        if verdict.is_degraded() {
            self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            "Submission {} on form {:?}: {} (score {:.2})",
            submission.id(),
            submission.form_id(),
            verdict.label,
            verdict.score
        );

        if let Some(archive) = &self.archive {
            let summary = submission.without_field(&self.config.honeypot_field);
            if let Err(e) = archive.store(ArchiveRecord::new(summary, verdict.clone())) {
                warn!("Failed to archive submission {}: {}", submission.id(), e);
            }
        }

        verdict
    }

    /// Apply a human correction to an archived submission
    pub fn reclassify(&self, submission_id: &str, label: Label) -> Result<TrainOutcome> {
        let archive = self
            .archive
            .as_ref()
            .ok_or_else(|| AntispamError::NotFound("no message archive configured".to_string()))?;

        let record = archive
            .get(submission_id)?
            .ok_or_else(|| AntispamError::NotFound(format!("submission {}", submission_id)))?;

        let outcome = self.train(&record.submission, label)?;
        if record.label != label {
            if let Err(e) = archive.set_label(submission_id, label) {
                warn!("Failed to update archived label of {}: {}", submission_id, e);
            }
        }
        Ok(outcome)
    }

    /// Apply a human correction to a submission the caller holds
    pub fn train(&self, submission: &Submission, label: Label) -> Result<TrainOutcome> {
        self.trainer.train(submission, label, &self.config.honeypot_field)
    }

    /// Train on every archived record labelled ham or spam
    pub fn bootstrap_from_archive(&self) -> Result<BootstrapSummary> {
        let archive = self
            .archive
            .as_ref()
            .ok_or_else(|| AntispamError::NotFound("no message archive configured".to_string()))?;

        let mut summary = BootstrapSummary::default();
        for record in archive.records()? {
            if record.label == Label::Unknown {
                summary.unlabeled += 1;
                continue;
            }
            match self.train(&record.submission, record.label)? {
                TrainOutcome::Trained { .. } => summary.trained += 1,
                TrainOutcome::AlreadyTrained => summary.skipped += 1,
            }
        }

        info!(
            "Bootstrap finished: {} trained, {} skipped, {} unlabeled",
            summary.trained, summary.skipped, summary.unlabeled
        );
        Ok(summary)
    }

    /// Forget the classifier model and the training ledger
    pub fn reset_model(&self) -> Result<()> {
        self.model.reset()?;
        self.trainer.reset()?;
        info!("Classifier model reset");
        Ok(())
    }

    pub fn add_wordlist_entry(&self, entry: WordlistEntry) -> Result<()> {
        self.wordlist.add(entry)
    }

    pub fn remove_wordlist_entry(&self, pattern: &str) -> Result<bool> {
        self.wordlist.remove(pattern)
    }

    pub fn wordlist_entries(&self) -> Result<Vec<WordlistEntry>> {
        self.wordlist.entries()
    }

    pub fn add_blacklist_entry(&self, entry: BlacklistEntry) -> Result<()> {
        self.blacklist.add(entry)
    }

    pub fn remove_blacklist_entry(&self, identifier: &str) -> Result<bool> {
        self.blacklist.remove(identifier)
    }

    pub fn expire_blacklist_entry(&self, identifier: &str, at: DateTime<Utc>) -> Result<()> {
        self.blacklist.expire(identifier, at)
    }

    pub fn purge_expired_blacklist(&self, now: DateTime<Utc>) -> Result<usize> {
        let purged = self.blacklist.purge_expired(now)?;
        if purged > 0 {
            info!("Purged {} expired blacklist entries", purged);
        }
        Ok(purged)
    }

    pub fn blacklist_entries(&self) -> Result<Vec<BlacklistEntry>> {
        self.blacklist.entries()
    }

    pub fn set_geo_action(&self, country: &str, action: GeoAction) -> Result<()> {
        let mut policy = lock::write(&self.geo_policy, "geo policy")?;
        policy.set(country, action)?;
        info!("Geo policy for {} set to {}", country.trim().to_uppercase(), action);
        Ok(())
    }

    pub fn remove_geo_action(&self, country: &str) -> Result<bool> {
        let mut policy = lock::write(&self.geo_policy, "geo policy")?;
        policy.remove(country)
    }

    /// Action applied to senders without a resolvable country
    pub fn set_geo_default(&self, action: GeoAction) -> Result<()> {
        let mut policy = lock::write(&self.geo_policy, "geo policy")?;
        policy.set_default(action);
        Ok(())
    }

    pub fn geo_policy(&self) -> Result<GeoPolicy> {
        let policy = lock::read(&self.geo_policy, "geo policy")?;
        Ok(policy.clone())
    }

    pub fn load_geo_policy(&self, new_policy: GeoPolicy) -> Result<()> {
        let mut policy = lock::write(&self.geo_policy, "geo policy")?;
        *policy = new_policy;
        Ok(())
    }

    pub fn model(&self) -> &ClassifierModel {
        &self.model
    }

    pub fn trainer(&self) -> &FeedbackTrainer {
        &self.trainer
    }

    pub fn wordlist(&self) -> &WordlistStore {
        &self.wordlist
    }

    pub fn blacklist(&self) -> &BlacklistStore {
        &self.blacklist
    }

    pub fn archive(&self) -> Option<&Arc<dyn MessageArchive>> {
        self.archive.as_ref()
    }

    pub fn stats(&self) -> SpamStats {
        let (spam_learned, ham_learned) = self.model.training_counts();
        let geo_rules = lock::read(&self.geo_policy, "geo policy")
            .map(|p| p.actions().len())
            .unwrap_or(0);

        SpamStats {
            evaluated: self.counters.evaluated.load(Ordering::Relaxed),
            spam_detected: self.counters.spam.load(Ordering::Relaxed),
            ham_detected: self.counters.ham.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            spam_learned,
            ham_learned,
            tokens: self.model.token_count(),
            trained_submissions: self.trainer.trained_count(),
            wordlist_entries: self.wordlist.len(),
            blacklist_entries: self.blacklist.len(),
            geo_rules,
            geo_available: self.resolver.is_available(),
        }
    }
}
