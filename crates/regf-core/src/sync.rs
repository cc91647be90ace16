//! Shared handle for using one hive from several threads.
//!
//! The hive itself has no internal locking. `SharedRegistry` serializes
//! callers with a single mutex held for the whole of each closure, so a
//! multi-cell operation never interleaves with another.

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::HiveResult;
use crate::key::RegistryKey;
use crate::registry::RegistryHive;

/// Cloneable, mutex-guarded registry hive.
pub struct SharedRegistry<S> {
    inner: Arc<Mutex<RegistryHive<S>>>,
}

impl<S> Clone for SharedRegistry<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: Read + Write + Seek> SharedRegistry<S> {
    pub fn new(registry: RegistryHive<S>) -> Self {
        Self { inner: Arc::new(Mutex::new(registry)) }
    }

    /// Run `f` against the root key with the hive locked.
    pub fn with_root<T>(
        &self,
        f: impl FnOnce(&mut RegistryKey<'_, S>) -> HiveResult<T>,
    ) -> HiveResult<T> {
        let mut guard = self.inner.lock();
        let mut root = guard.root()?;
        f(&mut root)
    }

    /// Run `f` against the whole hive with it locked.
    pub fn with_hive<T>(&self, f: impl FnOnce(&mut RegistryHive<S>) -> T) -> T {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn flush(&self) -> HiveResult<()> {
        self.inner.lock().flush()
    }
}
