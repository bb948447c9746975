//! Offline MaxMind GeoIP2 / GeoLite2 country database
//!
//! The file is read once into memory. The country of an address is the
//! `country.iso_code` of its record, falling back to `registered_country`
//! for networks MaxMind only knows the registrant of.

use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

use crate::config::normalize_country_code;
use crate::error::{AntispamError, Result};

/// Source of country codes for public addresses
#[cfg_attr(test, mockall::automock)]
pub trait GeoLookup: Send + Sync {
    /// Country code for `ip`, `Ok(None)` when the database has no record
    fn country(&self, ip: IpAddr) -> Result<Option<String>>;
}

/// In-memory `.mmdb` reader
pub struct GeoDatabase {
    reader: Reader<Vec<u8>>,
}

impl GeoDatabase {
    /// Read and validate a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            AntispamError::GeoDatabase(format!("cannot load {}: {}", path.display(), e))
        })?;
        let database = Self::from_reader(reader)?;
        info!(
            "Loaded GeoIP database {} ({}, {} nodes)",
            path.display(),
            database.database_type(),
            database.reader.metadata.node_count
        );
        Ok(database)
    }

    /// Database already held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let reader = Reader::from_source(bytes)
            .map_err(|e| AntispamError::GeoDatabase(e.to_string()))?;
        Self::from_reader(reader)
    }

    fn from_reader(reader: Reader<Vec<u8>>) -> Result<Self> {
        let metadata = &reader.metadata;
        if metadata.node_count == 0 {
            return Err(AntispamError::GeoDatabase(
                "database contains no networks".to_string(),
            ));
        }
        if !matches!(metadata.ip_version, 4 | 6) {
            return Err(AntispamError::GeoDatabase(format!(
                "unsupported ip_version {}",
                metadata.ip_version
            )));
        }
        Ok(Self { reader })
    }

    /// `database_type` from the metadata, e.g. `GeoLite2-Country`
    pub fn database_type(&self) -> &str {
        &self.reader.metadata.database_type
    }
}

impl GeoLookup for GeoDatabase {
    fn country(&self, ip: IpAddr) -> Result<Option<String>> {
        let record = match self.reader.lookup::<geoip2::Country>(ip.to_canonical()) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => {
                return Err(AntispamError::GeoDatabase(format!("lookup {}: {}", ip, e)));
            }
        };

        let iso_code = record
            .country
            .and_then(|c| c.iso_code)
            .or_else(|| record.registered_country.and_then(|c| c.iso_code));

        // A record with a code we cannot use counts as a miss
        Ok(iso_code.and_then(|code| normalize_country_code(code).ok()))
    }
}
