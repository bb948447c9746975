//! Wordlist and blacklist repositories
//!
//! Typed stores behind `RwLock`s: evaluation takes read locks, list
//! management takes write locks, so every edit is visible to the next
//! evaluation without a restart.

pub mod blacklist;
pub mod matcher;
pub mod types;
pub mod wordlist;

pub use blacklist::BlacklistStore;
pub use matcher::ListMatcher;
pub use types::{BlacklistEntry, FieldScope, IdentifierKind, ListVerdict, WordlistEntry};
pub use wordlist::{WordlistMatch, WordlistStore};
