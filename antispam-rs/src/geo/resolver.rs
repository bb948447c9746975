use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::cache::RecentCache;
use super::database::{GeoDatabase, GeoLookup};

/// Why an address has no country
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Not an IP address
    Malformed,
    /// Private, loopback, documentation or otherwise non-routable
    Reserved,
    /// Database has no record for it
    NotFound,
    /// No usable database
    DatabaseUnavailable,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnresolvedReason::Malformed => "malformed address",
            UnresolvedReason::Reserved => "reserved address",
            UnresolvedReason::NotFound => "not in database",
            UnresolvedReason::DatabaseUnavailable => "database unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoResolution {
    Resolved(String),
    Unresolved(UnresolvedReason),
}

/// Address -> country lookup that never fails
pub struct GeoResolver {
    database: Option<Arc<dyn GeoLookup>>,
    cache: Mutex<RecentCache<IpAddr, Option<String>>>,
}

impl GeoResolver {
    pub fn new(database: Arc<dyn GeoLookup>, cache_capacity: usize) -> Self {
        Self {
            database: Some(database),
            cache: Mutex::new(RecentCache::new(cache_capacity)),
        }
    }

    /// Resolver without a database; every lookup is unresolved
    pub fn unavailable(cache_capacity: usize) -> Self {
        Self {
            database: None,
            cache: Mutex::new(RecentCache::new(cache_capacity)),
        }
    }

    /// Open the `.mmdb` database at `path`. A missing path, unreadable file
    /// or corrupt database yields an unavailable resolver instead of an error.
    pub fn open(path: Option<&Path>, cache_capacity: usize) -> Self {
        let Some(path) = path else {
            warn!("No GeoIP database configured, geo checks will be skipped");
            return Self::unavailable(cache_capacity);
        };

        match GeoDatabase::open(path) {
            Ok(database) => Self::new(Arc::new(database), cache_capacity),
            Err(e) => {
                warn!("GeoIP database unavailable: {}", e);
                Self::unavailable(cache_capacity)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.database.is_some()
    }

    pub fn resolve(&self, address: &str) -> GeoResolution {
        let ip = match address.trim().parse::<IpAddr>() {
            Ok(ip) => ip.to_canonical(),
            Err(_) => return GeoResolution::Unresolved(UnresolvedReason::Malformed),
        };

        if is_reserved(ip) {
            return GeoResolution::Unresolved(UnresolvedReason::Reserved);
        }

        let Some(database) = &self.database else {
            return GeoResolution::Unresolved(UnresolvedReason::DatabaseUnavailable);
        };

        // Poisoned cache only costs a database lookup
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&ip) {
                return to_resolution(cached);
            }
        }

        match database.country(ip) {
            Ok(country) => {
                debug!("GeoIP lookup {} -> {:?}", ip, country);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(ip, country.clone());
                }
                to_resolution(country)
            }
            Err(e) => {
                warn!("GeoIP lookup for {} failed: {}", ip, e);
                GeoResolution::Unresolved(UnresolvedReason::DatabaseUnavailable)
            }
        }
    }

    pub fn cached_lookups(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

fn to_resolution(country: Option<String>) -> GeoResolution {
    match country {
        Some(code) => GeoResolution::Resolved(code),
        None => GeoResolution::Unresolved(UnresolvedReason::NotFound),
    }
}

/// Addresses no public geolocation table can place
pub fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
                || v4.is_multicast()
                // 100.64.0.0/10 shared address space
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                // 240.0.0.0/4 reserved
                || octets[0] >= 240
                // 0.0.0.0/8
                || octets[0] == 0
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // fc00::/7 unique local
                || (segments[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (segments[0] & 0xffc0) == 0xfe80
                // 2001:db8::/32 documentation
                || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        }
    }
}
