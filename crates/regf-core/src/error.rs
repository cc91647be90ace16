//! Error types for hive operations
//!
//! All hive errors are represented by the HiveError enum. Variants fall into
//! two families: the hive bytes are not a valid (or not a supported) hive,
//! or the caller asked for something the current state does not allow.
//! Running out of space inside a bin is not an error; allocation reports it
//! with `None` and the hive grows.

use std::io;

use thiserror::Error;

/// Hive error types with detailed context
#[derive(Debug, Error)]
pub enum HiveError {
    /// I/O operation on the backing stream failed
    #[error("I/O error: {message} ({kind})")]
    Io {
        /// The underlying I/O error kind
        kind: io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// A header or cell carried the wrong magic
    #[error("invalid {structure} signature at offset {offset:#x}: found {found:02x?}")]
    InvalidSignature {
        /// Which structure was being decoded ("regf", "hbin", ...)
        structure: &'static str,
        /// Absolute stream offset of the signature
        offset: u64,
        /// Bytes actually found
        found: [u8; 4],
    },

    /// Header XOR checksum did not match its contents
    #[error("hive header checksum mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored at +0x1FC
        stored: u32,
        /// Checksum computed over the first 508 bytes
        computed: u32,
    },

    /// Sequence counters differ: the hive needs a transaction log replay
    #[error("hive has a pending log replay (sequence {primary} != {secondary}); not supported")]
    PendingLogReplay {
        /// Primary sequence number
        primary: u32,
        /// Secondary sequence number
        secondary: u32,
    },

    /// Hive format version this crate does not handle
    #[error("unsupported hive version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version from the header
        major: u32,
        /// Minor version from the header
        minor: u32,
    },

    /// Structural damage inside a bin or cell
    #[error("corrupt cell data at index {index:#x}: {reason}")]
    CorruptCell {
        /// Cell index (or bin-relative position) where the damage was found
        index: u32,
        /// Description of the damage
        reason: String,
    },

    /// Two-byte cell tag not recognised
    #[error("unknown cell type {tag:?} at index {index:#x}")]
    UnknownCellType {
        /// The tag bytes
        tag: [u8; 2],
        /// Cell index
        index: u32,
    },

    /// Cell decoded fine but is not the kind the caller asked for
    #[error("cell at index {index:#x} is {found}, expected {expected}")]
    UnexpectedCellType {
        /// Cell index
        index: u32,
        /// Requested kind
        expected: &'static str,
        /// Kind found on disk
        found: &'static str,
    },

    /// No bin covers the given cell index
    #[error("no bin contains cell index {index:#x}")]
    CellNotFound {
        /// The dangling index
        index: u32,
    },

    /// Attempt to free a cell that is already free
    #[error("attempt to free non-allocated cell at index {index:#x}")]
    CellNotAllocated {
        /// Index of the free cell
        index: u32,
    },

    /// Allocation size is not a positive multiple of 8
    #[error("invalid cell size {size}: must be a positive multiple of 8")]
    InvalidCellSize {
        /// Requested size
        size: usize,
    },

    /// Cell outgrew its allocation but the caller forbade relocation
    #[error("cell {index:#x} needs {needed} bytes but holds {allocated}; relocation disabled")]
    RelocationRequired {
        /// Index of the cell
        index: u32,
        /// Bytes required including the length prefix
        needed: usize,
        /// Bytes currently allocated
        allocated: usize,
    },

    /// Key cannot be deleted while it still has children
    #[error("registry key '{name}' has subkeys")]
    KeyHasSubKeys {
        /// Name of the key
        name: String,
    },

    /// The root key of a hive cannot be deleted
    #[error("the root key cannot be deleted")]
    CannotDeleteRoot,

    /// A key handle was asked to delete its own key
    #[error("key '{name}' cannot delete itself; delete it from its parent")]
    CannotDeleteSelf {
        /// Path of the key below the root
        name: String,
    },

    /// Named subkey does not exist
    #[error("no such registry key: '{name}'")]
    KeyNotFound {
        /// Requested name
        name: String,
    },

    /// Named value does not exist
    #[error("no such value: '{name}'")]
    ValueNotFound {
        /// Requested name
        name: String,
    },

    /// Key or value name cannot be stored
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Raw value bytes do not decode as the declared type
    #[error("invalid {value_type} data: {reason}")]
    InvalidValueData {
        /// Registry type name (REG_DWORD, ...)
        value_type: String,
        /// What was wrong
        reason: String,
    },

    /// Configuration rejected by `HiveConfig::validate`
    #[error("invalid hive configuration: {0}")]
    InvalidConfig(String),
}

impl HiveError {
    /// True for the structural-corruption family: the bytes are not a usable hive.
    pub fn is_invalid_format(&self) -> bool {
        matches!(
            self,
            HiveError::InvalidSignature { .. }
                | HiveError::ChecksumMismatch { .. }
                | HiveError::PendingLogReplay { .. }
                | HiveError::UnsupportedVersion { .. }
                | HiveError::CorruptCell { .. }
                | HiveError::UnknownCellType { .. }
        )
    }

    /// True for caller misuse: the request is not valid against the current hive state.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            HiveError::CellNotAllocated { .. }
                | HiveError::CellNotFound { .. }
                | HiveError::UnexpectedCellType { .. }
                | HiveError::InvalidCellSize { .. }
                | HiveError::RelocationRequired { .. }
                | HiveError::KeyHasSubKeys { .. }
                | HiveError::CannotDeleteRoot
                | HiveError::CannotDeleteSelf { .. }
                | HiveError::KeyNotFound { .. }
                | HiveError::ValueNotFound { .. }
                | HiveError::InvalidName { .. }
                | HiveError::InvalidValueData { .. }
        )
    }

    pub(crate) fn corrupt(index: u32, reason: impl Into<String>) -> Self {
        HiveError::CorruptCell { index, reason: reason.into() }
    }
}

/// Convert std::io::Error to HiveError::Io
impl From<io::Error> for HiveError {
    fn from(err: io::Error) -> Self {
        HiveError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for hive operations
pub type HiveResult<T> = Result<T, HiveError>;
