//! regf-core: read/write storage engine for registry hive files
//!
//! A hive is a header block followed by bins; bins hold cells; cells form a
//! tree of keys with typed values and shared security records.
//!
//! # Architecture
//!
//! - **Cells** (`cell`): tagged record codecs (`nk`, `vk`, `sk`, `lf`/`lh`, `li`/`ri`)
//! - **Bin**: one heap chunk with a first-fit, coalescing free list
//! - **Hive**: bin lookup, growth, in-place-or-relocate updates
//! - **Subkey index** (`subkeys`): sorted hashed leaves, split under `ri` roots
//! - **Keys and values** (`key`, `value`, `security`): the tree-mutation API
//!
//! Every mutation is written through to the backing stream before the call
//! returns. There is no transaction log; a hive whose sequence numbers
//! disagree is refused.
//!
//! ```no_run
//! use std::io::Cursor;
//! use regf_core::{HiveConfig, RegistryHive, ValueData};
//!
//! let mut hive = RegistryHive::create(Cursor::new(Vec::new()), HiveConfig::default())?;
//! let mut root = hive.root()?;
//! let mut key = root.create_sub_key("Software\\Test")?;
//! key.set_value("Count", &ValueData::Dword(42))?;
//! # Ok::<(), regf_core::HiveError>(())
//! ```

pub mod bin;
pub mod cell;
pub mod config;
pub mod error;
pub mod format;
pub mod hive;
pub mod key;
pub mod names;
pub mod platform_durability;
pub mod registry;
pub mod security;
pub mod subkeys;
pub mod sync;
pub mod value;
pub mod verify;

// Re-export key types for convenience
pub use bin::{Bin, CellRecord, FreeCell};
pub use cell::{
    Cell, CellCodec, KeyFlags, KeyNodeCell, ListCell, SecurityCell, ValueCell, ValueType,
};
pub use config::HiveConfig;
pub use error::{HiveError, HiveResult};
pub use format::{BinHeader, HiveHeader, NO_CELL};
pub use hive::Hive;
pub use key::RegistryKey;
pub use platform_durability::DurableFile;
pub use registry::RegistryHive;
pub use subkeys::{KeyPosition, ListUpdate};
pub use sync::SharedRegistry;
pub use value::{RegistryValue, ValueData};
pub use verify::{verify, VerifyReport};
