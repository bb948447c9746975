use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::{AntispamError, Result};
use crate::utils::{validate_domain, validate_email};

/// Fields a wordlist pattern is checked against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldScope {
    #[default]
    Any,
    Fields(Vec<String>),
}

impl FieldScope {
    pub fn includes(&self, field: &str) -> bool {
        match self {
            FieldScope::Any => true,
            FieldScope::Fields(names) => names.iter().any(|n| n == field),
        }
    }
}

/// Weighted token or phrase pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordlistEntry {
    /// Literal token or phrase
    pub pattern: String,
    #[serde(default)]
    pub scope: FieldScope,
    /// Spam score contribution, counted once per submission
    pub weight: u32,
}

impl WordlistEntry {
    /// Create an entry that applies to every field
    pub fn new(pattern: impl Into<String>, weight: u32) -> Result<Self> {
        let entry = WordlistEntry {
            pattern: pattern.into(),
            scope: FieldScope::Any,
            weight,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Restrict the entry to the named fields
    pub fn scoped_to(mut self, fields: Vec<String>) -> Result<Self> {
        self.scope = FieldScope::Fields(fields);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pattern.trim().is_empty() {
            return Err(AntispamError::InvalidEntry(
                "wordlist pattern must not be empty".to_string(),
            ));
        }
        if self.weight == 0 {
            return Err(AntispamError::InvalidEntry(format!(
                "wordlist weight for {:?} must be positive",
                self.pattern
            )));
        }
        if let FieldScope::Fields(names) = &self.scope {
            if names.is_empty() || names.iter().any(|n| n.trim().is_empty()) {
                return Err(AntispamError::InvalidEntry(format!(
                    "wordlist scope for {:?} needs at least one field name",
                    self.pattern
                )));
            }
        }
        Ok(())
    }
}

/// What a blacklist identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Address,
    Email,
    Domain,
}

impl IdentifierKind {
    /// Infer the kind of `identifier` and return its canonical form
    pub fn detect(identifier: &str, case_sensitive: bool) -> Result<(Self, String)> {
        let identifier = identifier.trim();

        if let Ok(ip) = identifier.parse::<IpAddr>() {
            return Ok((IdentifierKind::Address, ip.to_canonical().to_string()));
        }

        let key = if case_sensitive {
            identifier.to_string()
        } else {
            identifier.to_lowercase()
        };

        if key.contains('@') {
            validate_email(&key)?;
            Ok((IdentifierKind::Email, key))
        } else {
            validate_domain(&key)?;
            Ok((IdentifierKind::Domain, key))
        }
    }
}

/// Blacklist entries only ever deny
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListVerdict {
    #[default]
    Deny,
}

/// Exact-match identifier that forces a spam verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub identifier: String,
    pub kind: IdentifierKind,
    #[serde(default)]
    pub verdict: ListVerdict,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional note
    pub reason: Option<String>,
}

impl BlacklistEntry {
    pub fn new(identifier: &str, case_sensitive: bool) -> Result<Self> {
        let (kind, identifier) = IdentifierKind::detect(identifier, case_sensitive)?;
        Ok(BlacklistEntry {
            identifier,
            kind,
            verdict: ListVerdict::Deny,
            created_at: Utc::now(),
            expires_at: None,
            reason: None,
        })
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Entry still applies at `at`
    pub fn is_live(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > at)
    }
}
