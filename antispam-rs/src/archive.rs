//! Message archive boundary
//!
//! The engine hands every verdict to a [`MessageArchive`] and reads
//! submissions back from it when an administrator reclassifies one. Storage
//! policy belongs to the archive; [`InMemoryArchive`] is the bundled
//! implementation used by the CLI and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{AntispamError, Result};
use crate::spam::types::{Label, Verdict};
use crate::submission::Submission;
use crate::utils::lock;

/// One archived evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Submission with the honeypot field removed
    pub submission: Submission,
    pub verdict: Verdict,
    pub reasons: Vec<String>,
    /// Current status, starts as the verdict label and follows
    /// reclassification
    pub label: Label,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveRecord {
    pub fn new(submission: Submission, verdict: Verdict) -> Self {
        Self {
            reasons: verdict.reason_trail(),
            label: verdict.label,
            submission,
            verdict,
            archived_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        self.submission.id()
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait MessageArchive: Send + Sync {
    fn store(&self, record: ArchiveRecord) -> Result<()>;

    fn get(&self, submission_id: &str) -> Result<Option<ArchiveRecord>>;

    /// Record a human reclassification
    fn set_label(&self, submission_id: &str, label: Label) -> Result<()>;

    fn records(&self) -> Result<Vec<ArchiveRecord>>;
}

/// Archive kept in memory, keyed by submission id
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    records: RwLock<BTreeMap<String, ArchiveRecord>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ArchiveRecord>) -> Self {
        Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.id().to_string(), r))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        lock::read(&self.records, "archive")
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageArchive for InMemoryArchive {
    fn store(&self, record: ArchiveRecord) -> Result<()> {
        let mut records = lock::write(&self.records, "archive")?;
        records.insert(record.id().to_string(), record);
        Ok(())
    }

    fn get(&self, submission_id: &str) -> Result<Option<ArchiveRecord>> {
        let records = lock::read(&self.records, "archive")?;
        Ok(records.get(submission_id).cloned())
    }

    fn set_label(&self, submission_id: &str, label: Label) -> Result<()> {
        let mut records = lock::write(&self.records, "archive")?;
        match records.get_mut(submission_id) {
            Some(record) => {
                record.label = label;
                Ok(())
            }
            None => Err(AntispamError::NotFound(format!("submission {}", submission_id))),
        }
    }

    fn records(&self) -> Result<Vec<ArchiveRecord>> {
        let records = lock::read(&self.records, "archive")?;
        Ok(records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spam::types::{Check, Reason};

    fn record(id: &str) -> ArchiveRecord {
        let submission = Submission::new("contact", "8.8.8.8")
            .with_id(id)
            .with_field("message", "hello");
        let verdict = Verdict {
            label: Label::Ham,
            score: 0.0,
            reasons: vec![Reason::new(Check::Aggregate, "no signals matched")],
        };
        ArchiveRecord::new(submission, verdict)
    }

    #[test]
    fn test_record_new() {
        let r = record("a");
        assert_eq!(r.id(), "a");
        assert_eq!(r.label, Label::Ham);
        assert_eq!(r.reasons, vec!["no signals matched".to_string()]);
    }

    #[test]
    fn test_store_get_and_relabel() {
        let archive = InMemoryArchive::new();
        archive.store(record("a")).unwrap();
        archive.store(record("b")).unwrap();
        assert_eq!(archive.len(), 2);

        archive.set_label("a", Label::Spam).unwrap();
        assert_eq!(archive.get("a").unwrap().unwrap().label, Label::Spam);
        assert!(archive.get("missing").unwrap().is_none());
        assert!(matches!(
            archive.set_label("missing", Label::Ham),
            Err(AntispamError::NotFound(_))
        ));
    }

    #[test]
    fn test_with_records() {
        let archive = InMemoryArchive::with_records(vec![record("x"), record("y")]);
        let ids: Vec<String> = archive
            .records()
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["x", "y"]);
    }
}
