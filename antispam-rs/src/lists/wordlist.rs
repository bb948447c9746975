use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::debug;

use super::types::WordlistEntry;
use crate::error::Result;
use crate::submission::Submission;
use crate::utils::lock;

/// A wordlist entry found in a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordlistMatch {
    pub pattern: String,
    pub weight: u32,
    /// First field the pattern was found in
    pub field: String,
}

/// Weighted pattern store, keyed by pattern
pub struct WordlistStore {
    case_sensitive: bool,
    entries: RwLock<BTreeMap<String, WordlistEntry>>,
}

impl WordlistStore {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn key(&self, pattern: &str) -> String {
        if self.case_sensitive {
            pattern.to_string()
        } else {
            pattern.to_lowercase()
        }
    }

    /// Add an entry, replacing scope and weight of an existing pattern
    pub fn add(&self, entry: WordlistEntry) -> Result<()> {
        entry.validate()?;
        let key = self.key(&entry.pattern);
        let mut entries = lock::write(&self.entries, "wordlist")?;
        debug!("Wordlist entry {:?} set to weight {}", key, entry.weight);
        entries.insert(key, entry);
        Ok(())
    }

    /// Remove a pattern, returning whether it existed
    pub fn remove(&self, pattern: &str) -> Result<bool> {
        let key = self.key(pattern);
        let mut entries = lock::write(&self.entries, "wordlist")?;
        Ok(entries.remove(&key).is_some())
    }

    /// Replace the whole list (used when restoring from storage)
    pub fn replace_all(&self, new_entries: Vec<WordlistEntry>) -> Result<()> {
        let mut map = BTreeMap::new();
        for entry in new_entries {
            entry.validate()?;
            map.insert(self.key(&entry.pattern), entry);
        }
        let mut entries = lock::write(&self.entries, "wordlist")?;
        *entries = map;
        Ok(())
    }

    pub fn get(&self, pattern: &str) -> Result<Option<WordlistEntry>> {
        let entries = lock::read(&self.entries, "wordlist")?;
        Ok(entries.get(&self.key(pattern)).cloned())
    }

    /// All entries in key order
    pub fn entries(&self) -> Result<Vec<WordlistEntry>> {
        let entries = lock::read(&self.entries, "wordlist")?;
        Ok(entries.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        lock::read(&self.entries, "wordlist")
            .map(|e| e.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries found in their scoped fields, each at most once, in key order
    pub fn matches(&self, submission: &Submission, honeypot_field: &str) -> Result<Vec<WordlistMatch>> {
        let fields: Vec<(&str, Cow<'_, str>)> = submission
            .content_fields(honeypot_field)
            .map(|f| {
                let value = if self.case_sensitive {
                    Cow::Borrowed(f.value.as_str())
                } else {
                    Cow::Owned(f.value.to_lowercase())
                };
                (f.name.as_str(), value)
            })
            .collect();

        let entries = lock::read(&self.entries, "wordlist")?;
        let mut matched = Vec::new();

        for (key, entry) in entries.iter() {
            let hit = fields
                .iter()
                .find(|(name, value)| entry.scope.includes(name) && value.contains(key.as_str()));

            if let Some((name, _)) = hit {
                matched.push(WordlistMatch {
                    pattern: entry.pattern.clone(),
                    weight: entry.weight,
                    field: name.to_string(),
                });
            }
        }

        Ok(matched)
    }

    /// Sum of matched weights
    pub fn score(&self, submission: &Submission, honeypot_field: &str) -> Result<u64> {
        Ok(self
            .matches(submission, honeypot_field)?
            .iter()
            .map(|m| u64::from(m.weight))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WordlistStore {
        let store = WordlistStore::new(false);
        store.add(WordlistEntry::new("viagra", 10).unwrap()).unwrap();
        store.add(WordlistEntry::new("click here", 3).unwrap()).unwrap();
        store
            .add(
                WordlistEntry::new("seo", 2)
                    .unwrap()
                    .scoped_to(vec!["subject".to_string()])
                    .unwrap(),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_add_and_replace() {
        let store = store();
        assert_eq!(store.len(), 3);

        store.add(WordlistEntry::new("VIAGRA", 4).unwrap()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("viagra").unwrap().unwrap().weight, 4);
    }

    #[test]
    fn test_remove() {
        let store = store();
        assert!(store.remove("Click Here").unwrap());
        assert!(!store.remove("click here").unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_repeated_pattern_counts_once() {
        let store = store();
        let once = Submission::new("f", "192.0.2.1").with_field("message", "buy viagra");
        let twice = Submission::new("f", "192.0.2.1")
            .with_field("message", "viagra viagra")
            .with_field("name", "Viagra Seller");
        let none = Submission::new("f", "192.0.2.1").with_field("message", "hello");

        assert_eq!(store.score(&once, "honeypot").unwrap(), 10);
        assert_eq!(store.score(&twice, "honeypot").unwrap(), 10);
        assert_eq!(store.score(&none, "honeypot").unwrap(), 0);
    }

    #[test]
    fn test_scope_and_phrase_matching() {
        let store = store();
        let submission = Submission::new("f", "192.0.2.1")
            .with_field("subject", "Cheap SEO services")
            .with_field("message", "Please CLICK HERE now, best seo");

        let matches = store.matches(&submission, "honeypot").unwrap();
        let patterns: Vec<&str> = matches.iter().map(|m| m.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["click here", "seo"]);
        assert_eq!(matches[1].field, "subject");
        assert_eq!(store.score(&submission, "honeypot").unwrap(), 5);
    }

    #[test]
    fn test_honeypot_field_not_scanned() {
        let store = store();
        let submission = Submission::new("f", "192.0.2.1").with_field("honeypot", "viagra");
        assert_eq!(store.score(&submission, "honeypot").unwrap(), 0);
    }

    #[test]
    fn test_case_sensitive_store() {
        let store = WordlistStore::new(true);
        store.add(WordlistEntry::new("Casino", 5).unwrap()).unwrap();

        let lower = Submission::new("f", "192.0.2.1").with_field("message", "casino night");
        let exact = Submission::new("f", "192.0.2.1").with_field("message", "Casino night");

        assert_eq!(store.score(&lower, "honeypot").unwrap(), 0);
        assert_eq!(store.score(&exact, "honeypot").unwrap(), 5);
    }

    #[test]
    fn test_order_independent() {
        let a = WordlistStore::new(false);
        a.add(WordlistEntry::new("loan", 2).unwrap()).unwrap();
        a.add(WordlistEntry::new("crypto", 3).unwrap()).unwrap();

        let b = WordlistStore::new(false);
        b.add(WordlistEntry::new("crypto", 3).unwrap()).unwrap();
        b.add(WordlistEntry::new("loan", 2).unwrap()).unwrap();

        let submission = Submission::new("f", "192.0.2.1").with_field("message", "crypto loan");
        assert_eq!(
            a.matches(&submission, "honeypot").unwrap(),
            b.matches(&submission, "honeypot").unwrap()
        );
    }
}
