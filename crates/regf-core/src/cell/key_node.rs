//! Key node (`nk`) record.
//!
//! Layout (offsets from the tag):
//!   [0x00] "nk"                 [0x02] flags u16
//!   [0x04] timestamp u64        [0x0C] access bits u32
//!   [0x10] parent u32           [0x14] subkey count u32
//!   [0x18] volatile count u32   [0x1C] subkey list u32
//!   [0x20] volatile list u32    [0x24] value count u32
//!   [0x28] value list u32       [0x2C] security u32
//!   [0x30] class name u32       [0x34] max subkey name bytes u32
//!   [0x38] max class bytes u32  [0x3C] max value name bytes u32
//!   [0x40] max value data u32   [0x44] work var u32
//!   [0x48] name length u16      [0x4A] class name length u16
//!   [0x4C] name

use super::CellCodec;
use crate::error::{HiveError, HiveResult};
use crate::format::{
    filetime_now, read_u16, read_u32, read_u64, write_u16, write_u32, write_u64, NO_CELL,
};
use crate::names;

const FIXED_SIZE: usize = 0x4C;

/// Key node flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyFlags(pub u16);

impl KeyFlags {
    /// Key is volatile (never on disk in practice)
    pub const VOLATILE: u16 = 0x0001;
    /// Mount point of another hive
    pub const HIVE_EXIT: u16 = 0x0002;
    /// Root key of the hive
    pub const ROOT: u16 = 0x0004;
    /// Key cannot be deleted
    pub const NO_DELETE: u16 = 0x0008;
    /// Symbolic link key
    pub const LINK: u16 = 0x0010;
    /// Name is stored compressed, one byte per character
    pub const NORMAL: u16 = 0x0020;

    /// Returns true if any bit of `flag` is set.
    pub fn has(&self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.has(Self::ROOT)
    }
}

/// A registry key record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNodeCell {
    pub flags: KeyFlags,
    /// Last written (FILETIME)
    pub timestamp: u64,
    pub parent_index: u32,
    pub num_sub_keys: u32,
    pub sub_keys_index: u32,
    pub num_values: u32,
    pub value_list_index: u32,
    pub security_index: u32,
    pub class_name_index: u32,
    pub max_sub_key_name_bytes: u32,
    pub max_class_name_bytes: u32,
    pub max_value_name_bytes: u32,
    pub max_value_data_bytes: u32,
    /// Size of the class name cell contents in bytes
    pub class_name_length: u16,
    pub name: String,
}

impl KeyNodeCell {
    /// A fresh, childless key under `parent_index`.
    pub fn new(name: &str, parent_index: u32) -> Self {
        let (_, compressed) = names::encode(name);
        Self {
            flags: KeyFlags(if compressed { KeyFlags::NORMAL } else { 0 }),
            timestamp: filetime_now(),
            parent_index,
            num_sub_keys: 0,
            sub_keys_index: NO_CELL,
            num_values: 0,
            value_list_index: NO_CELL,
            security_index: NO_CELL,
            class_name_index: NO_CELL,
            max_sub_key_name_bytes: 0,
            max_class_name_bytes: 0,
            max_value_name_bytes: 0,
            max_value_data_bytes: 0,
            class_name_length: 0,
            name: name.to_string(),
        }
    }

    pub(crate) fn read_from(buf: &[u8], index: u32) -> HiveResult<Self> {
        if buf.len() < FIXED_SIZE {
            return Err(HiveError::corrupt(
                index,
                format!("key node needs {} bytes, cell has {}", FIXED_SIZE, buf.len()),
            ));
        }
        let flags = KeyFlags(read_u16(buf, 0x02));
        let name_len = read_u16(buf, 0x48) as usize;
        if FIXED_SIZE + name_len > buf.len() {
            return Err(HiveError::corrupt(index, "key name runs past the end of the cell"));
        }
        let compressed = flags.has(KeyFlags::NORMAL);
        let name = names::decode(&buf[FIXED_SIZE..FIXED_SIZE + name_len], compressed);

        Ok(Self {
            flags,
            timestamp: read_u64(buf, 0x04),
            parent_index: read_u32(buf, 0x10),
            num_sub_keys: read_u32(buf, 0x14),
            sub_keys_index: read_u32(buf, 0x1C),
            num_values: read_u32(buf, 0x24),
            value_list_index: read_u32(buf, 0x28),
            security_index: read_u32(buf, 0x2C),
            class_name_index: read_u32(buf, 0x30),
            max_sub_key_name_bytes: read_u32(buf, 0x34),
            max_class_name_bytes: read_u32(buf, 0x38),
            max_value_name_bytes: read_u32(buf, 0x3C),
            max_value_data_bytes: read_u32(buf, 0x40),
            class_name_length: read_u16(buf, 0x4A),
            name,
        })
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.flags.is_root()
    }

    /// Refresh the last-written timestamp.
    pub fn touch(&mut self) {
        self.timestamp = filetime_now();
    }
}

impl CellCodec for KeyNodeCell {
    fn serialized_size(&self) -> usize {
        FIXED_SIZE + names::encoded_len(&self.name)
    }

    fn write_to(&self, buf: &mut [u8]) {
        let (name, compressed) = names::encode(&self.name);
        let flags = if compressed {
            self.flags.0 | KeyFlags::NORMAL
        } else {
            self.flags.0 & !KeyFlags::NORMAL
        };

        buf[0..2].copy_from_slice(b"nk");
        write_u16(buf, 0x02, flags);
        write_u64(buf, 0x04, self.timestamp);
        write_u32(buf, 0x0C, 0);
        write_u32(buf, 0x10, self.parent_index);
        write_u32(buf, 0x14, self.num_sub_keys);
        write_u32(buf, 0x18, 0);
        write_u32(buf, 0x1C, self.sub_keys_index);
        write_u32(buf, 0x20, NO_CELL);
        write_u32(buf, 0x24, self.num_values);
        write_u32(buf, 0x28, self.value_list_index);
        write_u32(buf, 0x2C, self.security_index);
        write_u32(buf, 0x30, self.class_name_index);
        write_u32(buf, 0x34, self.max_sub_key_name_bytes);
        write_u32(buf, 0x38, self.max_class_name_bytes);
        write_u32(buf, 0x3C, self.max_value_name_bytes);
        write_u32(buf, 0x40, self.max_value_data_bytes);
        write_u32(buf, 0x44, 0);
        write_u16(buf, 0x48, name.len() as u16);
        write_u16(buf, 0x4A, self.class_name_length);
        buf[FIXED_SIZE..FIXED_SIZE + name.len()].copy_from_slice(&name);
    }
}
