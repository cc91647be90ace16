//! Registry hive lifecycle: create, open, reach the root, flush.
//!
//! [`RegistryHive`] owns a [`Hive`] and hands out [`RegistryKey`] handles
//! that borrow it. A freshly created hive holds a root key and one security
//! record, shared by every key created below the root until a key is given
//! its own descriptor.

use std::fs::OpenOptions;
use std::io::{Read, Seek, Write};
use std::path::Path;

use tracing::debug;

use crate::cell::{KeyFlags, KeyNodeCell};
use crate::config::HiveConfig;
use crate::error::{HiveError, HiveResult};
use crate::format::{HiveHeader, NO_CELL};
use crate::hive::Hive;
use crate::key::RegistryKey;
use crate::platform_durability::DurableFile;
use crate::security;

/// An open registry hive.
#[derive(Debug)]
pub struct RegistryHive<S> {
    hive: Hive<S>,
}

impl<S: Read + Write + Seek> RegistryHive<S> {
    /// Format `stream` as a new hive with a root key.
    pub fn create(stream: S, config: HiveConfig) -> HiveResult<Self> {
        let mut hive = Hive::format(stream, config)?;

        let root_name = hive.config().root_name.clone();
        let mut root = KeyNodeCell::new(&root_name, NO_CELL);
        root.flags = KeyFlags(root.flags.0 | KeyFlags::ROOT);
        let root_index = hive.update_cell(None, &root, true)?;

        let descriptor = security::default_security_descriptor();
        root.security_index = security::create_ring(&mut hive, descriptor)?;
        hive.update_cell(Some(root_index), &root, false)?;
        hive.set_root_cell(root_index)?;

        debug!(root = root_index, security = root.security_index, "registry.create");
        Ok(Self { hive })
    }

    /// Open an existing hive.
    pub fn open(stream: S, config: HiveConfig) -> HiveResult<Self> {
        let mut hive = Hive::open(stream, config)?;
        let root_index = hive.header().root_cell;
        let root: KeyNodeCell = hive.get_cell(root_index)?;
        if !root.is_root() {
            return Err(HiveError::corrupt(
                root_index,
                "header root cell is not flagged as the root key",
            ));
        }
        Ok(Self { hive })
    }

    /// The root key.
    pub fn root(&mut self) -> HiveResult<RegistryKey<'_, S>> {
        let index = self.hive.header().root_cell;
        if index == NO_CELL {
            return Err(HiveError::corrupt(index, "hive has no root key"));
        }
        Ok(RegistryKey::new(&mut self.hive, index))
    }

    pub fn header(&self) -> &HiveHeader {
        self.hive.header()
    }

    /// The storage layer underneath.
    pub fn hive(&self) -> &Hive<S> {
        &self.hive
    }

    pub fn hive_mut(&mut self) -> &mut Hive<S> {
        &mut self.hive
    }

    /// Flush the backing stream. Every write has already reached it; this
    /// only asks the stream to push its own buffers down.
    pub fn flush(&mut self) -> HiveResult<()> {
        self.hive.flush()
    }

    pub fn into_inner(self) -> S {
        self.hive.into_inner()
    }
}

impl RegistryHive<DurableFile> {
    /// Create (or truncate) a hive file at `path`.
    pub fn create_file(path: impl AsRef<Path>, config: HiveConfig) -> HiveResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let durable = config.durable_flush;
        Self::create(DurableFile::new(file, durable), config)
    }

    /// Open the hive file at `path` for reading and writing.
    pub fn open_file(path: impl AsRef<Path>, config: HiveConfig) -> HiveResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let durable = config.durable_flush;
        Self::open(DurableFile::new(file, durable), config)
    }
}
