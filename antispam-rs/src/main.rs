//! Command line front end for the spam engine
//!
//! State lives in the SQLite database named by `[storage] database_url`
//! (or `--db`). Each command restores the engine, runs, and persists the
//! result.
//!
//! # Usage
//!
//! ```bash
//! # Classify a submission stored as JSON
//! antispam evaluate submission.json
//!
//! # Confirm it was spam
//! antispam reclassify 0b6f0c1e-... spam
//!
//! # Manage lists
//! antispam wordlist add viagra 10
//! antispam blacklist add spammer@example.com --reason "campaign"
//! antispam geo set RU deny
//! ```

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use antispam_rs::config::{Config, LoggingConfig};
use antispam_rs::lists::{BlacklistEntry, FieldScope, WordlistEntry};
use antispam_rs::spam::GeoAction;
use antispam_rs::{InMemoryArchive, Label, MessageArchive, SpamEngine, SpamStore, Submission, TrainOutcome};

#[derive(Parser)]
#[command(name = "antispam")]
#[command(about = "Spam decision engine for form submissions", long_about = None)]
struct Cli {
    /// Configuration file (TOML, optional)
    #[arg(short, long, default_value = "antispam.toml")]
    config: PathBuf,

    /// Database URL, overrides the configuration
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a submission read from a JSON file
    Evaluate {
        file: PathBuf,
    },
    /// Apply a human label to an archived submission
    Reclassify {
        id: String,
        /// ham or spam
        label: Label,
    },
    /// Manage weighted wordlist patterns
    Wordlist {
        #[command(subcommand)]
        action: WordlistCommand,
    },
    /// Manage the blacklist
    Blacklist {
        #[command(subcommand)]
        action: BlacklistCommand,
    },
    /// Manage the country policy
    Geo {
        #[command(subcommand)]
        action: GeoCommand,
    },
    /// Train the classifier from every labelled archived submission
    Bootstrap,
    /// Forget the classifier model and training history
    Reset,
    /// Show engine statistics
    Stats,
}

#[derive(Subcommand)]
enum WordlistCommand {
    Add {
        pattern: String,
        weight: u32,
        /// Only match in these fields (comma separated)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    Remove {
        pattern: String,
    },
    List,
}

#[derive(Subcommand)]
enum BlacklistCommand {
    /// Add an IP address, email address or domain
    Add {
        identifier: String,
        #[arg(long)]
        reason: Option<String>,
        /// Expire after this many hours
        #[arg(long)]
        hours: Option<i64>,
    },
    Remove {
        identifier: String,
    },
    /// Set the expiry of an existing entry
    Expire {
        identifier: String,
        /// Hours from now, 0 expires immediately
        #[arg(long, default_value_t = 0)]
        hours: i64,
    },
    /// Drop expired entries
    Purge,
    List,
}

#[derive(Subcommand)]
enum GeoCommand {
    Set {
        country: String,
        /// allow, flag or deny
        action: GeoAction,
    },
    Remove {
        country: String,
    },
    /// Action for senders without a resolvable country
    Default {
        action: GeoAction,
    },
    List,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        config.storage.database_url = db;
    }
    init_logging(&config.logging);

    let store = SpamStore::new(&config.storage.database_url)
        .await
        .with_context(|| format!("opening {}", config.storage.database_url))?;
    let archive = Arc::new(InMemoryArchive::with_records(store.load_archive().await?));
    let engine = SpamEngine::from_config(&config, Some(archive.clone() as Arc<dyn MessageArchive>))?;
    store.restore(&engine).await?;
    info!("Engine restored from {}", config.storage.database_url);

    match cli.command {
        Commands::Evaluate { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let submission: Submission = serde_json::from_str(&content)
                .with_context(|| format!("parsing submission {}", file.display()))?;

            let verdict = engine.evaluate(&submission);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            println!("submission id: {}", submission.id());
        }
        Commands::Reclassify { id, label } => match engine.reclassify(&id, label)? {
            TrainOutcome::Trained { label, promoted } => {
                println!("✓ Submission {} trained as {}", id, label);
                if let Some(sender) = promoted {
                    println!("✓ Sender {} added to the blacklist", sender);
                }
            }
            TrainOutcome::AlreadyTrained => {
                println!("Submission {} was already trained as {}", id, label);
            }
        },
        Commands::Wordlist { action } => match action {
            WordlistCommand::Add {
                pattern,
                weight,
                fields,
            } => {
                let mut entry = WordlistEntry::new(pattern.clone(), weight)?;
                if !fields.is_empty() {
                    entry = entry.scoped_to(fields)?;
                }
                engine.add_wordlist_entry(entry)?;
                println!("✓ Wordlist pattern {:?} set to weight {}", pattern, weight);
            }
            WordlistCommand::Remove { pattern } => {
                if !engine.remove_wordlist_entry(&pattern)? {
                    eprintln!("Error: pattern {:?} is not in the wordlist", pattern);
                    std::process::exit(1);
                }
                println!("✓ Wordlist pattern {:?} removed", pattern);
            }
            WordlistCommand::List => {
                let entries = engine.wordlist_entries()?;
                if entries.is_empty() {
                    println!("Wordlist is empty.");
                } else {
                    println!("{:<30} {:<8} {:<30}", "Pattern", "Weight", "Fields");
                    println!("{:-<70}", "");
                    for entry in &entries {
                        let scope = match &entry.scope {
                            FieldScope::Any => "any".to_string(),
                            FieldScope::Fields(names) => names.join(","),
                        };
                        println!("{:<30} {:<8} {:<30}", entry.pattern, entry.weight, scope);
                    }
                    println!("\nTotal: {} pattern(s)", entries.len());
                }
            }
        },
        Commands::Blacklist { action } => match action {
            BlacklistCommand::Add {
                identifier,
                reason,
                hours,
            } => {
                let mut entry = BlacklistEntry::new(&identifier, engine.config().case_sensitive)?;
                if let Some(reason) = reason {
                    entry = entry.with_reason(reason);
                }
                if let Some(hours) = hours {
                    entry = entry.expiring_at(Utc::now() + Duration::hours(hours));
                }
                engine.add_blacklist_entry(entry)?;
                println!("✓ {} blacklisted", identifier);
            }
            BlacklistCommand::Remove { identifier } => {
                if !engine.remove_blacklist_entry(&identifier)? {
                    eprintln!("Error: {} is not blacklisted", identifier);
                    std::process::exit(1);
                }
                println!("✓ {} removed from the blacklist", identifier);
            }
            BlacklistCommand::Expire { identifier, hours } => {
                let at = Utc::now() + Duration::hours(hours);
                engine.expire_blacklist_entry(&identifier, at)?;
                println!("✓ {} expires at {}", identifier, at.to_rfc3339());
            }
            BlacklistCommand::Purge => {
                let purged = engine.purge_expired_blacklist(Utc::now())?;
                println!("✓ {} expired entr{} purged", purged, if purged == 1 { "y" } else { "ies" });
            }
            BlacklistCommand::List => {
                let entries = engine.blacklist_entries()?;
                if entries.is_empty() {
                    println!("Blacklist is empty.");
                } else {
                    println!("{:<35} {:<26} {:<26} {}", "Identifier", "Created At", "Expires At", "Reason");
                    println!("{:-<100}", "");
                    for entry in &entries {
                        let expires = entry
                            .expires_at
                            .map(|at| at.to_rfc3339())
                            .unwrap_or_else(|| "Never".to_string());
                        println!(
                            "{:<35} {:<26} {:<26} {}",
                            entry.identifier,
                            entry.created_at.to_rfc3339(),
                            expires,
                            entry.reason.as_deref().unwrap_or("")
                        );
                    }
                    println!("\nTotal: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
                }
            }
        },
        Commands::Geo { action } => match action {
            GeoCommand::Set { country, action } => {
                engine.set_geo_action(&country, action)?;
                println!("✓ {} -> {}", country.to_uppercase(), action);
            }
            GeoCommand::Remove { country } => {
                if !engine.remove_geo_action(&country)? {
                    eprintln!("Error: no policy for {}", country);
                    std::process::exit(1);
                }
                println!("✓ Policy for {} removed", country.to_uppercase());
            }
            GeoCommand::Default { action } => {
                engine.set_geo_default(action)?;
                println!("✓ Unresolved senders -> {}", action);
            }
            GeoCommand::List => {
                let policy = engine.geo_policy()?;
                println!("Unresolved senders: {}", policy.default_action());
                for (country, action) in policy.actions() {
                    println!("{:<4} {}", country, action);
                }
            }
        },
        Commands::Bootstrap => {
            let summary = engine.bootstrap_from_archive()?;
            println!(
                "✓ Trained {} submission(s), {} already trained, {} unlabeled",
                summary.trained, summary.skipped, summary.unlabeled
            );
        }
        Commands::Reset => {
            engine.reset_model()?;
            println!("✓ Classifier model reset");
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("Spam documents learned: {}", stats.spam_learned);
            println!("Ham documents learned:  {}", stats.ham_learned);
            println!("Known tokens:           {}", stats.tokens);
            println!("Trained submissions:    {}", stats.trained_submissions);
            println!("Wordlist entries:       {}", stats.wordlist_entries);
            println!("Blacklist entries:      {}", stats.blacklist_entries);
            println!("Geo rules:              {}", stats.geo_rules);
            println!("GeoIP database:         {}", if stats.geo_available { "available" } else { "unavailable" });
            println!("Archived submissions:   {}", archive.len());
        }
    }

    store.persist(&engine).await?;
    store.save_archive(&*archive).await?;
    Ok(())
}
