//! Utility modules
//!
//! - [`email`]: Email address and domain validation
//! - `lock`: poison-aware lock acquisition for the shared stores

pub mod email;
pub(crate) mod lock;

pub use email::{email_domain, validate_domain, validate_email};
