//! SQLite persistence
//!
//! The engine keeps its state in memory. `SpamStore` writes a full snapshot
//! of it (lists, model, training ledger, geo policy) and loads it back on
//! start, plus the records of the bundled [`InMemoryArchive`].
//!
//! [`InMemoryArchive`]: crate::archive::InMemoryArchive

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::archive::{ArchiveRecord, MessageArchive};
use crate::error::{AntispamError, Result};
use crate::geo::GeoPolicy;
use crate::lists::{BlacklistEntry, FieldScope, WordlistEntry};
use crate::spam::{
    GeoAction, Label, LedgerEntry, LedgerSnapshot, ModelSnapshot, SpamEngine, TokenCounts,
};

const GEO_DEFAULT_KEY: &str = "geo_default_action";

/// Snapshot store for a [`SpamEngine`]
#[derive(Clone)]
pub struct SpamStore {
    db: SqlitePool,
}

impl SpamStore {
    /// Connect to `database_url` and create the tables
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let store = Self { db };
        store.init_db().await?;
        Ok(store)
    }

    pub fn from_pool(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wordlist (
                pattern TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                weight INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklist (
                identifier TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                reason TEXT
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                token TEXT PRIMARY KEY,
                spam_count INTEGER NOT NULL DEFAULT 0,
                ham_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                label TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trained (
                submission_id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                spam_learned INTEGER NOT NULL DEFAULT 0,
                ham_learned INTEGER NOT NULL DEFAULT 0,
                offense_counted INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offenses (
                sender TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS geo_policy (
                country TEXT PRIMARY KEY,
                action TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive (
                submission_id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                record TEXT NOT NULL,
                archived_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Replace the stored snapshot with the engine's current state
    pub async fn persist(&self, engine: &SpamEngine) -> Result<()> {
        let wordlist = engine.wordlist().entries()?;
        let blacklist = engine.blacklist().entries()?;
        let model = engine.model().snapshot()?;
        let ledger = engine.trainer().snapshot()?;
        let policy = engine.geo_policy()?;

        let mut tx = self.db.begin().await?;

        for table in ["wordlist", "blacklist", "tokens", "documents", "trained", "offenses", "geo_policy"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }

        for entry in &wordlist {
            sqlx::query("INSERT INTO wordlist (pattern, scope, weight) VALUES (?, ?, ?)")
                .bind(&entry.pattern)
                .bind(serde_json::to_string(&entry.scope)?)
                .bind(i64::from(entry.weight))
                .execute(&mut *tx)
                .await?;
        }

        for entry in &blacklist {
            sqlx::query(
                "INSERT INTO blacklist (identifier, created_at, expires_at, reason) VALUES (?, ?, ?, ?)",
            )
            .bind(&entry.identifier)
            .bind(entry.created_at.to_rfc3339())
            .bind(entry.expires_at.map(|at| at.to_rfc3339()))
            .bind(&entry.reason)
            .execute(&mut *tx)
            .await?;
        }

        for (token, counts) in &model.tokens {
            sqlx::query("INSERT INTO tokens (token, spam_count, ham_count) VALUES (?, ?, ?)")
                .bind(token)
                .bind(to_i64(counts.spam))
                .bind(to_i64(counts.ham))
                .execute(&mut *tx)
                .await?;
        }

        for (label, count) in [(Label::Spam, model.spam_documents), (Label::Ham, model.ham_documents)] {
            sqlx::query("INSERT INTO documents (label, count) VALUES (?, ?)")
                .bind(label.to_string())
                .bind(to_i64(count))
                .execute(&mut *tx)
                .await?;
        }

        for (id, entry) in &ledger.trained {
            sqlx::query(
                "INSERT INTO trained (submission_id, label, spam_learned, ham_learned, offense_counted) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(entry.label.to_string())
            .bind(entry.spam_learned as i64)
            .bind(entry.ham_learned as i64)
            .bind(entry.offense_counted as i64)
            .execute(&mut *tx)
            .await?;
        }

        for (sender, count) in &ledger.offenses {
            sqlx::query("INSERT INTO offenses (sender, count) VALUES (?, ?)")
                .bind(sender)
                .bind(i64::from(*count))
                .execute(&mut *tx)
                .await?;
        }

        for (country, action) in policy.actions() {
            sqlx::query("INSERT INTO geo_policy (country, action) VALUES (?, ?)")
                .bind(country)
                .bind(action.to_string())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(GEO_DEFAULT_KEY)
            .bind(policy.default_action().to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            "Persisted {} wordlist entries, {} blacklist entries, {} tokens",
            wordlist.len(),
            blacklist.len(),
            model.tokens.len()
        );
        Ok(())
    }

    /// Load the stored snapshot into `engine`, replacing its state
    pub async fn restore(&self, engine: &SpamEngine) -> Result<()> {
        let wordlist = self.load_wordlist().await?;
        let blacklist = self.load_blacklist(engine.blacklist().case_sensitive()).await?;
        let model = self.load_model().await?;
        let ledger = self.load_ledger().await?;
        let policy = self.load_geo_policy(engine).await?;

        info!(
            "Restored {} wordlist entries, {} blacklist entries, {} tokens",
            wordlist.len(),
            blacklist.len(),
            model.tokens.len()
        );

        engine.wordlist().replace_all(wordlist)?;
        engine.blacklist().replace_all(blacklist)?;
        engine.model().load(model)?;
        engine.trainer().load(ledger)?;
        engine.load_geo_policy(policy)?;
        Ok(())
    }

    async fn load_wordlist(&self) -> Result<Vec<WordlistEntry>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT pattern, scope, weight FROM wordlist ORDER BY pattern",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(pattern, scope, weight)| -> Result<WordlistEntry> {
                let scope: FieldScope = serde_json::from_str(&scope)?;
                let weight = u32::try_from(weight)
                    .map_err(|_| AntispamError::Parse(format!("invalid weight {} for {:?}", weight, pattern)))?;
                Ok(WordlistEntry {
                    pattern,
                    scope,
                    weight,
                })
            })
            .collect()
    }

    async fn load_blacklist(&self, case_sensitive: bool) -> Result<Vec<BlacklistEntry>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, Option<String>)>(
            "SELECT identifier, created_at, expires_at, reason FROM blacklist ORDER BY identifier",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(identifier, created_at, expires_at, reason)| -> Result<BlacklistEntry> {
                let mut entry = BlacklistEntry::new(&identifier, case_sensitive)?;
                entry.created_at = parse_time(&created_at)?;
                entry.expires_at = expires_at.as_deref().map(parse_time).transpose()?;
                entry.reason = reason;
                Ok(entry)
            })
            .collect()
    }

    async fn load_model(&self) -> Result<ModelSnapshot> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT token, spam_count, ham_count FROM tokens",
        )
        .fetch_all(&self.db)
        .await?;

        let tokens: BTreeMap<String, TokenCounts> = rows
            .into_iter()
            .map(|(token, spam, ham)| {
                (
                    token,
                    TokenCounts {
                        spam: spam.max(0) as u64,
                        ham: ham.max(0) as u64,
                    },
                )
            })
            .collect();

        let documents = sqlx::query_as::<_, (String, i64)>("SELECT label, count FROM documents")
            .fetch_all(&self.db)
            .await?;

        let mut snapshot = ModelSnapshot {
            tokens,
            ..ModelSnapshot::default()
        };
        for (label, count) in documents {
            match label.parse::<Label>()? {
                Label::Spam => snapshot.spam_documents = count.max(0) as u64,
                Label::Ham => snapshot.ham_documents = count.max(0) as u64,
                Label::Unknown => debug!("Ignoring document count for unknown label"),
            }
        }
        Ok(snapshot)
    }

    async fn load_ledger(&self) -> Result<LedgerSnapshot> {
        let trained = sqlx::query_as::<_, (String, String, i64, i64, i64)>(
            "SELECT submission_id, label, spam_learned, ham_learned, offense_counted FROM trained",
        )
        .fetch_all(&self.db)
        .await?;

        let offenses = sqlx::query_as::<_, (String, i64)>("SELECT sender, count FROM offenses")
            .fetch_all(&self.db)
            .await?;

        let mut snapshot = LedgerSnapshot::default();
        for (id, label, spam_learned, ham_learned, offense_counted) in trained {
            snapshot.trained.insert(
                id,
                LedgerEntry {
                    label: label.parse()?,
                    spam_learned: spam_learned != 0,
                    ham_learned: ham_learned != 0,
                    offense_counted: offense_counted != 0,
                },
            );
        }
        for (sender, count) in offenses {
            snapshot
                .offenses
                .insert(sender, u32::try_from(count.max(0)).unwrap_or(u32::MAX));
        }
        Ok(snapshot)
    }

    /// Stored policy. Until a policy has been persisted the engine keeps
    /// the one built from its configuration.
    async fn load_geo_policy(&self, engine: &SpamEngine) -> Result<GeoPolicy> {
        let stored_default = sqlx::query_as::<_, (String,)>("SELECT value FROM settings WHERE key = ?")
            .bind(GEO_DEFAULT_KEY)
            .fetch_optional(&self.db)
            .await?;

        let Some((default_action,)) = stored_default else {
            return engine.geo_policy();
        };
        let default_action: GeoAction = default_action.parse()?;

        let rows = sqlx::query_as::<_, (String, String)>("SELECT country, action FROM geo_policy")
            .fetch_all(&self.db)
            .await?;

        let mut policy = GeoPolicy::new(default_action);
        for (country, action) in rows {
            policy.set(&country, action.parse()?)?;
        }
        Ok(policy)
    }

    /// Write every record of `archive`, replacing records with the same id
    pub async fn save_archive(&self, archive: &dyn MessageArchive) -> Result<usize> {
        let records = archive.records()?;
        let mut tx = self.db.begin().await?;

        for record in &records {
            sqlx::query(
                "INSERT OR REPLACE INTO archive (submission_id, label, record, archived_at) VALUES (?, ?, ?, ?)",
            )
            .bind(record.id())
            .bind(record.label.to_string())
            .bind(serde_json::to_string(record)?)
            .bind(record.archived_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Saved {} archive records", records.len());
        Ok(records.len())
    }

    /// All archived records, oldest first
    pub async fn load_archive(&self) -> Result<Vec<ArchiveRecord>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT record, label FROM archive ORDER BY archived_at",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(record, label)| -> Result<ArchiveRecord> {
                let mut record: ArchiveRecord = serde_json::from_str(&record)?;
                record.label = label.parse()?;
                Ok(record)
            })
            .collect()
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| AntispamError::Parse(e.to_string()))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchive;
    use crate::config::EngineConfig;
    use crate::geo::GeoResolver;
    use crate::submission::Submission;
    use chrono::Duration;
    use std::sync::Arc;

    async fn setup_store() -> SpamStore {
        SpamStore::new("sqlite::memory:").await.unwrap()
    }

    fn new_engine() -> SpamEngine {
        SpamEngine::new(EngineConfig::default(), GeoResolver::unavailable(4), None).unwrap()
    }

    #[tokio::test]
    async fn test_init_db_is_idempotent() {
        let store = setup_store().await;
        store.init_db().await.unwrap();
        store.restore(&new_engine()).await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let store = setup_store().await;
        let engine = new_engine();

        engine
            .add_wordlist_entry(
                WordlistEntry::new("casino", 4)
                    .unwrap()
                    .scoped_to(vec!["message".to_string()])
                    .unwrap(),
            )
            .unwrap();
        let expiry = Utc::now() + Duration::days(7);
        engine
            .add_blacklist_entry(
                BlacklistEntry::new("spam.example", false)
                    .unwrap()
                    .with_reason("campaign")
                    .expiring_at(expiry),
            )
            .unwrap();
        engine.set_geo_action("RU", GeoAction::Deny).unwrap();
        engine.set_geo_default(GeoAction::Flag).unwrap();
        engine
            .train(
                &Submission::new("f", "203.0.113.7")
                    .with_id("s1")
                    .with_field("message", "casino bonus"),
                Label::Spam,
            )
            .unwrap();
        engine
            .train(
                &Submission::new("f", "198.51.100.2")
                    .with_id("s2")
                    .with_field("message", "meeting agenda"),
                Label::Ham,
            )
            .unwrap();

        store.persist(&engine).await.unwrap();

        let restored = new_engine();
        store.restore(&restored).await.unwrap();

        assert_eq!(restored.wordlist_entries().unwrap(), engine.wordlist_entries().unwrap());
        let entry = restored.blacklist().get("spam.example").unwrap().unwrap();
        assert_eq!(entry.reason.as_deref(), Some("campaign"));
        assert_eq!(entry.expires_at.map(|at| at.timestamp()), Some(expiry.timestamp()));
        assert_eq!(restored.model().snapshot().unwrap(), engine.model().snapshot().unwrap());
        assert_eq!(restored.trainer().snapshot().unwrap(), engine.trainer().snapshot().unwrap());
        assert_eq!(restored.geo_policy().unwrap(), engine.geo_policy().unwrap());
    }

    #[tokio::test]
    async fn test_persist_replaces_previous_snapshot() {
        let store = setup_store().await;
        let engine = new_engine();
        engine.add_wordlist_entry(WordlistEntry::new("casino", 4).unwrap()).unwrap();
        store.persist(&engine).await.unwrap();

        engine.remove_wordlist_entry("casino").unwrap();
        store.persist(&engine).await.unwrap();

        let restored = new_engine();
        store.restore(&restored).await.unwrap();
        assert!(restored.wordlist_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_archive_roundtrip_keeps_labels() {
        let store = setup_store().await;
        let archive = Arc::new(InMemoryArchive::new());
        let engine = SpamEngine::new(
            EngineConfig::default(),
            GeoResolver::unavailable(4),
            Some(archive.clone() as Arc<dyn MessageArchive>),
        )
        .unwrap();

        engine.evaluate(&Submission::new("f", "8.8.8.8").with_id("s1").with_field("message", "hello"));
        engine.evaluate(&Submission::new("f", "8.8.8.8").with_id("s2").with_field("message", "casino"));
        engine.reclassify("s2", Label::Spam).unwrap();

        assert_eq!(store.save_archive(&*archive).await.unwrap(), 2);
        let records = store.load_archive().await.unwrap();
        assert_eq!(records.len(), 2);
        let s2 = records.iter().find(|r| r.id() == "s2").unwrap();
        assert_eq!(s2.label, Label::Spam);
    }
}
