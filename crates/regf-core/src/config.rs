//! Configuration for hive creation and growth
//!
//! Provides presets for the common hive flavours and a `validate` check
//! that every constructor runs before touching the backing stream.

use crate::format::{BIN_ALIGNMENT, MAX_HIVE_PATH_UNITS};

/// Largest hashed leaf that still fits the 16-bit count and a sane cell size.
pub const MAX_LEAF_ENTRIES_LIMIT: usize = 1012;

/// Default split threshold for hashed subkey leaves.
pub const DEFAULT_MAX_LEAF_ENTRIES: usize = 500;

/// Hive configuration with presets
#[derive(Debug, Clone)]
pub struct HiveConfig {
    /// Minimum size of a bin appended when no existing bin has room (bytes)
    pub min_bin_size: u32,
    /// Hashed leaves holding this many entries are split on the next link
    pub max_leaf_entries: usize,
    /// Minor format version written to new hives; 5 and above use `lh` leaves
    pub minor_version: u32,
    /// Name given to the root key of a new hive
    pub root_name: String,
    /// Path string stored in the header of a new hive
    pub hive_path: String,
    /// Whether `flush` asks the stream for a durable sync
    pub durable_flush: bool,
}

impl HiveConfig {
    /// Modern hives: `lh` leaves, version 1.5
    pub fn modern() -> Self {
        Self {
            min_bin_size: BIN_ALIGNMENT,
            max_leaf_entries: DEFAULT_MAX_LEAF_ENTRIES,
            minor_version: 5,
            root_name: "root".to_string(),
            hive_path: String::new(),
            durable_flush: true,
        }
    }

    /// Legacy hives: `lf` leaves, version 1.3
    pub fn legacy() -> Self {
        Self {
            minor_version: 3,
            ..Self::modern()
        }
    }

    /// Small split threshold so that dense trees exercise the `ri` paths early
    pub fn compact() -> Self {
        Self {
            max_leaf_entries: 8,
            durable_flush: false,
            ..Self::modern()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.min_bin_size == 0 || self.min_bin_size % BIN_ALIGNMENT != 0 {
            return Err(format!("min_bin_size must be a non-zero multiple of {}", BIN_ALIGNMENT));
        }
        if self.max_leaf_entries < 2 || self.max_leaf_entries > MAX_LEAF_ENTRIES_LIMIT {
            return Err(format!("max_leaf_entries must be in [2, {}]", MAX_LEAF_ENTRIES_LIMIT));
        }
        if !(3..=6).contains(&self.minor_version) {
            return Err("minor_version must be in [3, 6]".into());
        }
        if self.root_name.is_empty() || self.root_name.contains('\\') {
            return Err("root_name must be non-empty and contain no path separator".into());
        }
        if self.hive_path.encode_utf16().count() > MAX_HIVE_PATH_UNITS {
            return Err(format!("hive_path must be at most {} UTF-16 units", MAX_HIVE_PATH_UNITS));
        }
        Ok(())
    }
}

impl Default for HiveConfig {
    fn default() -> Self { Self::modern() }
}
