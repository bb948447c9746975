//! Inbound form submission

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::validate_email;

/// One named form field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionField {
    pub name: String,
    pub value: String,
}

/// A form submission as handed over by the host form system.
///
/// Built once with the `with_*` constructors and read-only afterwards; the
/// pipeline only ever borrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default = "new_submission_id")]
    id: String,
    #[serde(default)]
    form_id: String,
    /// Sender network address as reported by the host, unparsed
    #[serde(default)]
    sender: String,
    #[serde(default = "Utc::now")]
    submitted_at: DateTime<Utc>,
    #[serde(default)]
    fields: Vec<SubmissionField>,
}

fn new_submission_id() -> String {
    Uuid::new_v4().to_string()
}

impl Submission {
    /// Create a submission with a fresh id, stamped now
    pub fn new(form_id: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            id: new_submission_id(),
            form_id: form_id.into(),
            sender: sender.into(),
            submitted_at: Utc::now(),
            fields: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(SubmissionField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn fields(&self) -> &[SubmissionField] {
        &self.fields
    }

    /// First value submitted under `name`
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Values of fields that carry an email address: either the field name
    /// says so or the value parses as one
    pub fn email_values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| {
            let value = f.value.trim();
            if value.is_empty() {
                return None;
            }
            let named_email = f.name.to_lowercase().contains("email");
            if named_email || validate_email(value).is_ok() {
                Some(value)
            } else {
                None
            }
        })
    }

    /// Free-text fields fed to the classifier. Host-internal fields
    /// (leading underscore) and `exclude` are skipped.
    pub fn content_fields<'a>(&'a self, exclude: &'a str) -> impl Iterator<Item = &'a SubmissionField> {
        self.fields
            .iter()
            .filter(move |f| f.name != exclude && !f.name.starts_with('_'))
    }

    /// Copy of this submission without `name`, used to keep the honeypot out
    /// of archived records
    pub fn without_field(&self, name: &str) -> Submission {
        Submission {
            fields: self
                .fields
                .iter()
                .filter(|f| f.name != name)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}
