//! Lock helpers for the shared stores
//!
//! A poisoned lock means a writer panicked mid-update. Callers on the
//! evaluation path treat that as an unavailable store; writers report it.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{AntispamError, Result};

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, store: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| AntispamError::Storage(format!("{} unavailable: lock poisoned", store)))
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, store: &str) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| AntispamError::Storage(format!("{} unavailable: lock poisoned", store)))
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, store: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| AntispamError::Storage(format!("{} unavailable: lock poisoned", store)))
}
