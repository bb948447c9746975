//! Geolocation policy
//!
//! Resolves sender addresses to country codes from an offline GeoIP2
//! database and maps them through the configured [`GeoPolicy`]. Resolution
//! never fails: anything that cannot be placed is reported as unresolved.

pub mod cache;
pub mod database;
pub mod policy;
pub mod resolver;

pub use database::{GeoDatabase, GeoLookup};
pub use policy::{GeoPolicy, GeoPolicyCheck, UNRESOLVED_CODE};
pub use resolver::{GeoResolution, GeoResolver, UnresolvedReason};
