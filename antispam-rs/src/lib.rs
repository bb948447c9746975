//! antispam-rs: spam decision engine for web form submissions
//!
//! Every submission runs through a fixed pipeline of checks and comes out
//! with a [`Verdict`]: a ham/spam label plus the ordered reasons that led
//! to it.
//!
//! # Pipeline
//!
//! 1. Honeypot: a filled decoy field is spam, nothing else runs.
//! 2. Lists: a live blacklist entry for the sender address, an email field
//!    or its domain is spam; wordlist patterns add their weight once each.
//! 3. Geo policy: the sender's country may be denied or flagged.
//! 4. Classifier: a Bayesian token model trained from human corrections
//!    adds a contribution proportional to its spam probability.
//!
//! The summed score is compared with the configured threshold. Evaluation
//! never fails; unavailable inputs (no GeoIP database, a poisoned store) are
//! recorded as degraded reasons and the remaining checks still decide.
//!
//! # Example
//!
//! ```no_run
//! use antispam_rs::config::EngineConfig;
//! use antispam_rs::geo::GeoResolver;
//! use antispam_rs::lists::WordlistEntry;
//! use antispam_rs::{SpamEngine, Submission};
//!
//! # fn main() -> antispam_rs::Result<()> {
//! let engine = SpamEngine::new(EngineConfig::default(), GeoResolver::unavailable(1024), None)?;
//! engine.add_wordlist_entry(WordlistEntry::new("viagra", 10)?)?;
//!
//! let submission = Submission::new("contact", "203.0.113.7")
//!     .with_field("message", "cheap viagra here");
//! let verdict = engine.evaluate(&submission);
//! assert!(verdict.is_spam());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`spam`]: pipeline stages, classifier, trainer and the engine
//! - [`lists`]: wordlist and blacklist stores
//! - [`geo`]: GeoIP resolution and country policy
//! - [`archive`]: message archive boundary
//! - [`store`]: SQLite persistence
//! - [`config`]: configuration management
//! - [`error`]: error types

pub mod archive;
pub mod config;
pub mod error;
pub mod geo;
pub mod lists;
pub mod spam;
pub mod store;
pub mod submission;
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveRecord, InMemoryArchive, MessageArchive};
pub use config::Config;
pub use error::{AntispamError, Result};
pub use spam::{Label, SpamEngine, SpamStats, TrainOutcome, Verdict};
pub use store::SpamStore;
pub use submission::{Submission, SubmissionField};
