//! Value (`vk`) record.
//!
//! Layout (offsets from the tag):
//!   [0x00] "vk"            [0x02] name length u16
//!   [0x04] data length u32 - high bit set: data lives in the index field
//!   [0x08] data index u32  [0x0C] data type u32
//!   [0x10] flags u16       [0x12] spare u16
//!   [0x14] name

use super::CellCodec;
use crate::error::{HiveError, HiveResult};
use crate::format::{read_u16, read_u32, write_u16, write_u32, NO_CELL};
use crate::names;

const FIXED_SIZE: usize = 0x14;

/// Value name stored one byte per character
const VALUE_COMP_NAME: u16 = 0x0001;

/// Data length bit marking inline data
pub const INLINE_DATA_FLAG: u32 = 0x8000_0000;

/// Registry value data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    None,
    String,
    ExpandString,
    Binary,
    Dword,
    DwordBigEndian,
    Link,
    MultiString,
    ResourceList,
    FullResourceDescriptor,
    ResourceRequirementsList,
    QWord,
    /// Non-standard type code
    Unknown(u32),
}

impl ValueType {
    /// Decode the on-disk type code.
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => ValueType::None,
            1 => ValueType::String,
            2 => ValueType::ExpandString,
            3 => ValueType::Binary,
            4 => ValueType::Dword,
            5 => ValueType::DwordBigEndian,
            6 => ValueType::Link,
            7 => ValueType::MultiString,
            8 => ValueType::ResourceList,
            9 => ValueType::FullResourceDescriptor,
            10 => ValueType::ResourceRequirementsList,
            11 => ValueType::QWord,
            other => ValueType::Unknown(other),
        }
    }

    /// The on-disk type code.
    pub fn to_u32(self) -> u32 {
        match self {
            ValueType::None => 0,
            ValueType::String => 1,
            ValueType::ExpandString => 2,
            ValueType::Binary => 3,
            ValueType::Dword => 4,
            ValueType::DwordBigEndian => 5,
            ValueType::Link => 6,
            ValueType::MultiString => 7,
            ValueType::ResourceList => 8,
            ValueType::FullResourceDescriptor => 9,
            ValueType::ResourceRequirementsList => 10,
            ValueType::QWord => 11,
            ValueType::Unknown(code) => code,
        }
    }

    /// Conventional REG_* name.
    pub fn name(&self) -> String {
        match self {
            ValueType::None => "REG_NONE".to_string(),
            ValueType::String => "REG_SZ".to_string(),
            ValueType::ExpandString => "REG_EXPAND_SZ".to_string(),
            ValueType::Binary => "REG_BINARY".to_string(),
            ValueType::Dword => "REG_DWORD".to_string(),
            ValueType::DwordBigEndian => "REG_DWORD_BIG_ENDIAN".to_string(),
            ValueType::Link => "REG_LINK".to_string(),
            ValueType::MultiString => "REG_MULTI_SZ".to_string(),
            ValueType::ResourceList => "REG_RESOURCE_LIST".to_string(),
            ValueType::FullResourceDescriptor => "REG_FULL_RESOURCE_DESCRIPTOR".to_string(),
            ValueType::ResourceRequirementsList => "REG_RESOURCE_REQUIREMENTS_LIST".to_string(),
            ValueType::QWord => "REG_QWORD".to_string(),
            ValueType::Unknown(code) => format!("REG_UNKNOWN_{:#010x}", code),
        }
    }

    /// True for the 32-bit integer types whose payload may be inlined.
    pub fn is_dword(&self) -> bool {
        matches!(self, ValueType::Dword | ValueType::DwordBigEndian)
    }
}

/// A value record. The payload itself lives elsewhere (or inline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCell {
    /// Empty for the default value
    pub name: String,
    /// Raw length field, `INLINE_DATA_FLAG` included
    pub data_length: u32,
    /// Data cell index, or the inline bytes
    pub data_index: u32,
    pub data_type: ValueType,
}

impl ValueCell {
    /// A value with no payload yet.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data_length: 0,
            data_index: NO_CELL,
            data_type: ValueType::None,
        }
    }

    pub(crate) fn read_from(buf: &[u8], index: u32) -> HiveResult<Self> {
        if buf.len() < FIXED_SIZE {
            return Err(HiveError::corrupt(
                index,
                format!("value needs {} bytes, cell has {}", FIXED_SIZE, buf.len()),
            ));
        }
        let name_len = read_u16(buf, 0x02) as usize;
        if FIXED_SIZE + name_len > buf.len() {
            return Err(HiveError::corrupt(index, "value name runs past the end of the cell"));
        }
        let flags = read_u16(buf, 0x10);
        let compressed = flags & VALUE_COMP_NAME != 0;
        let name = names::decode(&buf[FIXED_SIZE..FIXED_SIZE + name_len], compressed);

        Ok(Self {
            name,
            data_length: read_u32(buf, 0x04),
            data_index: read_u32(buf, 0x08),
            data_type: ValueType::from_u32(read_u32(buf, 0x0C)),
        })
    }

    /// Payload is stored in the data index field.
    pub fn is_inline(&self) -> bool {
        self.data_length & INLINE_DATA_FLAG != 0
    }

    /// Payload length in bytes.
    pub fn data_len(&self) -> usize {
        (self.data_length & !INLINE_DATA_FLAG) as usize
    }

    /// Index of an out-of-line data cell, if this value owns one.
    pub fn data_cell(&self) -> Option<u32> {
        if self.is_inline() || self.data_index == NO_CELL {
            None
        } else {
            Some(self.data_index)
        }
    }
}

impl CellCodec for ValueCell {
    fn serialized_size(&self) -> usize {
        FIXED_SIZE + names::encoded_len(&self.name)
    }

    fn write_to(&self, buf: &mut [u8]) {
        let (name, compressed) = names::encode(&self.name);
        buf[0..2].copy_from_slice(b"vk");
        write_u16(buf, 0x02, name.len() as u16);
        write_u32(buf, 0x04, self.data_length);
        write_u32(buf, 0x08, self.data_index);
        write_u32(buf, 0x0C, self.data_type.to_u32());
        write_u16(buf, 0x10, if compressed { VALUE_COMP_NAME } else { 0 });
        write_u16(buf, 0x12, 0);
        buf[FIXED_SIZE..FIXED_SIZE + name.len()].copy_from_slice(&name);
    }
}
