use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::RwLock;
use tracing::{debug, info};

use super::types::{BlacklistEntry, IdentifierKind};
use crate::error::{AntispamError, Result};
use crate::submission::Submission;
use crate::utils::{email_domain, lock};

/// Exact-match deny list, keyed by canonical identifier
pub struct BlacklistStore {
    case_sensitive: bool,
    entries: RwLock<BTreeMap<String, BlacklistEntry>>,
}

impl BlacklistStore {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn key(&self, identifier: &str) -> Result<String> {
        IdentifierKind::detect(identifier, self.case_sensitive).map(|(_, key)| key)
    }

    /// Add an entry. Re-adding an identifier refreshes its expiry and note
    /// but keeps the original creation time.
    pub fn add(&self, entry: BlacklistEntry) -> Result<()> {
        let (kind, key) = IdentifierKind::detect(&entry.identifier, self.case_sensitive)?;
        let mut entries = lock::write(&self.entries, "blacklist")?;

        let created_at = entries
            .get(&key)
            .map(|existing| existing.created_at)
            .unwrap_or(entry.created_at);

        info!("Blacklisted {} ({:?})", key, kind);
        entries.insert(
            key.clone(),
            BlacklistEntry {
                identifier: key,
                kind,
                created_at,
                ..entry
            },
        );
        Ok(())
    }

    /// Remove an identifier, returning whether it existed
    pub fn remove(&self, identifier: &str) -> Result<bool> {
        let key = self.key(identifier)?;
        let mut entries = lock::write(&self.entries, "blacklist")?;
        Ok(entries.remove(&key).is_some())
    }

    /// Set the expiry of an existing entry
    pub fn expire(&self, identifier: &str, at: DateTime<Utc>) -> Result<()> {
        let key = self.key(identifier)?;
        let mut entries = lock::write(&self.entries, "blacklist")?;
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.expires_at = Some(at);
                debug!("Blacklist entry {} expires at {}", key, at);
                Ok(())
            }
            None => Err(AntispamError::NotFound(format!("blacklist entry {}", key))),
        }
    }

    /// Drop entries that are no longer live at `now`
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = lock::write(&self.entries, "blacklist")?;
        let initial_count = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(initial_count - entries.len())
    }

    /// Replace the whole list (used when restoring from storage)
    pub fn replace_all(&self, new_entries: Vec<BlacklistEntry>) -> Result<()> {
        let mut map = BTreeMap::new();
        for entry in new_entries {
            let (kind, key) = IdentifierKind::detect(&entry.identifier, self.case_sensitive)?;
            map.insert(
                key.clone(),
                BlacklistEntry {
                    identifier: key,
                    kind,
                    ..entry
                },
            );
        }
        let mut entries = lock::write(&self.entries, "blacklist")?;
        *entries = map;
        Ok(())
    }

    /// Whether `identifier` has a live entry at `at`
    pub fn is_blacklisted(&self, identifier: &str, at: DateTime<Utc>) -> Result<bool> {
        let key = self.key(identifier)?;
        let entries = lock::read(&self.entries, "blacklist")?;
        Ok(entries.get(&key).is_some_and(|e| e.is_live(at)))
    }

    pub fn get(&self, identifier: &str) -> Result<Option<BlacklistEntry>> {
        let key = self.key(identifier)?;
        let entries = lock::read(&self.entries, "blacklist")?;
        Ok(entries.get(&key).cloned())
    }

    pub fn entries(&self) -> Result<Vec<BlacklistEntry>> {
        let entries = lock::read(&self.entries, "blacklist")?;
        Ok(entries.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        lock::read(&self.entries, "blacklist")
            .map(|e| e.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First live entry matching the sender address or an email-typed
    /// field. The sender is checked first, then email fields in order,
    /// each by full address and then by domain.
    pub fn find_match(&self, submission: &Submission) -> Result<Option<BlacklistEntry>> {
        let at = submission.submitted_at();
        let mut candidates: Vec<String> = Vec::new();

        let sender = submission.sender().trim();
        if let Ok(ip) = sender.parse::<IpAddr>() {
            candidates.push(ip.to_canonical().to_string());
        }

        for email in submission.email_values() {
            let normalized = self.normalize(email);
            if let Some(domain) = email_domain(&normalized) {
                let domain = domain.to_string();
                candidates.push(normalized);
                candidates.push(domain);
            }
        }

        let entries = lock::read(&self.entries, "blacklist")?;
        Ok(candidates
            .iter()
            .filter_map(|key| entries.get(key))
            .find(|entry| entry.is_live(at))
            .cloned())
    }

    fn normalize(&self, value: &str) -> String {
        if self.case_sensitive {
            value.to_string()
        } else {
            value.to_lowercase()
        }
    }

    /// Leave the entry lock poisoned, as a writer panicking mid-update would
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.entries.write();
            panic!("blacklist writer panicked");
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(identifier: &str) -> BlacklistEntry {
        BlacklistEntry::new(identifier, false).unwrap()
    }

    #[test]
    fn test_add_and_lookup() {
        let store = BlacklistStore::new(false);
        store.add(entry("192.0.2.1")).unwrap();
        store.add(entry("Spammer@Example.com")).unwrap();

        let now = Utc::now();
        assert!(store.is_blacklisted("192.0.2.1", now).unwrap());
        assert!(store.is_blacklisted("spammer@example.com", now).unwrap());
        assert!(!store.is_blacklisted("192.0.2.2", now).unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_re_add_keeps_creation_time() {
        let store = BlacklistStore::new(false);
        let first = entry("192.0.2.1");
        let created = first.created_at;
        store.add(first).unwrap();

        let mut second = entry("192.0.2.1").with_reason("repeat offender");
        second.created_at = created + Duration::days(1);
        store.add(second).unwrap();

        let stored = store.get("192.0.2.1").unwrap().unwrap();
        assert_eq!(stored.created_at, created);
        assert_eq!(stored.reason.as_deref(), Some("repeat offender"));
    }

    #[test]
    fn test_find_match_sender_and_email() {
        let store = BlacklistStore::new(false);
        store.add(entry("203.0.113.9")).unwrap();
        store.add(entry("spam.example")).unwrap();

        let by_sender = Submission::new("f", "203.0.113.9");
        let hit = store.find_match(&by_sender).unwrap().unwrap();
        assert_eq!(hit.identifier, "203.0.113.9");

        let by_domain = Submission::new("f", "198.51.100.1")
            .with_field("your-email", "Bob@SPAM.example");
        let hit = store.find_match(&by_domain).unwrap().unwrap();
        assert_eq!(hit.identifier, "spam.example");
        assert_eq!(hit.kind, IdentifierKind::Domain);

        let clean = Submission::new("f", "198.51.100.1").with_field("your-email", "bob@ok.example");
        assert!(store.find_match(&clean).unwrap().is_none());
    }

    #[test]
    fn test_expired_entries_do_not_match() {
        let store = BlacklistStore::new(false);
        store.add(entry("203.0.113.9")).unwrap();

        let submitted = Utc::now();
        store.expire("203.0.113.9", submitted).unwrap();

        let submission = Submission::new("f", "203.0.113.9").with_timestamp(submitted);
        assert!(store.find_match(&submission).unwrap().is_none());

        let earlier = Submission::new("f", "203.0.113.9")
            .with_timestamp(submitted - Duration::minutes(5));
        assert!(store.find_match(&earlier).unwrap().is_some());
    }

    #[test]
    fn test_expire_unknown_is_not_found() {
        let store = BlacklistStore::new(false);
        assert!(matches!(
            store.expire("192.0.2.1", Utc::now()),
            Err(AntispamError::NotFound(_))
        ));
    }

    #[test]
    fn test_purge_and_remove() {
        let store = BlacklistStore::new(false);
        let now = Utc::now();
        store
            .add(entry("192.0.2.1").expiring_at(now - Duration::hours(1)))
            .unwrap();
        store.add(entry("192.0.2.2")).unwrap();

        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.remove("192.0.2.2").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let store = BlacklistStore::new(false);
        assert!(matches!(
            store.remove("definitely not valid"),
            Err(AntispamError::InvalidEntry(_))
        ));
    }
}
