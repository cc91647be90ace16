//! Value payloads: typed data, conversion to and from raw bytes, and the
//! small-integer inlining rule.
//!
//! A 32-bit integer payload of at most four bytes is stored directly in the
//! value record's data index field with the high bit of the length set.
//! Everything else lives in an out-of-line raw cell.

use std::io::{Read, Seek, Write};

use crate::cell::{ValueCell, ValueType, INLINE_DATA_FLAG};
use crate::error::{HiveError, HiveResult};
use crate::format::NO_CELL;
use crate::hive::Hive;
use crate::names;

/// Decoded value data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueData {
    None,
    String(String),
    ExpandString(String),
    Binary(Vec<u8>),
    Dword(u32),
    DwordBigEndian(u32),
    Link(String),
    MultiString(Vec<String>),
    QWord(u64),
    /// Types kept as opaque bytes
    Other { value_type: ValueType, bytes: Vec<u8> },
}

fn utf16_terminated(text: &str) -> Vec<u8> {
    let mut bytes = names::utf16_bytes(text);
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

fn utf16_trimmed(bytes: &[u8]) -> String {
    names::from_utf16_bytes(bytes).trim_end_matches('\0').to_string()
}

fn fixed<const N: usize>(value_type: ValueType, bytes: &[u8]) -> HiveResult<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| HiveError::InvalidValueData {
            value_type: value_type.name(),
            reason: format!("need {} bytes, have {}", N, bytes.len()),
        })
}

impl ValueData {
    /// The registry type this data is stored as.
    pub fn value_type(&self) -> ValueType {
        match self {
            ValueData::None => ValueType::None,
            ValueData::String(_) => ValueType::String,
            ValueData::ExpandString(_) => ValueType::ExpandString,
            ValueData::Binary(_) => ValueType::Binary,
            ValueData::Dword(_) => ValueType::Dword,
            ValueData::DwordBigEndian(_) => ValueType::DwordBigEndian,
            ValueData::Link(_) => ValueType::Link,
            ValueData::MultiString(_) => ValueType::MultiString,
            ValueData::QWord(_) => ValueType::QWord,
            ValueData::Other { value_type, .. } => *value_type,
        }
    }

    /// Raw on-disk bytes. Strings are UTF-16LE with a terminating NUL.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ValueData::None => Vec::new(),
            ValueData::String(s) | ValueData::ExpandString(s) | ValueData::Link(s) => {
                utf16_terminated(s)
            }
            ValueData::Binary(bytes) | ValueData::Other { bytes, .. } => bytes.clone(),
            ValueData::Dword(v) => v.to_le_bytes().to_vec(),
            ValueData::DwordBigEndian(v) => v.to_be_bytes().to_vec(),
            ValueData::MultiString(items) => {
                let mut bytes: Vec<u8> = items.iter().flat_map(|s| utf16_terminated(s)).collect();
                bytes.extend_from_slice(&[0, 0]);
                bytes
            }
            ValueData::QWord(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Decode raw bytes of the given type.
    pub fn from_bytes(value_type: ValueType, bytes: &[u8]) -> HiveResult<Self> {
        Ok(match value_type {
            ValueType::None if bytes.is_empty() => ValueData::None,
            ValueType::String => ValueData::String(utf16_trimmed(bytes)),
            ValueType::ExpandString => ValueData::ExpandString(utf16_trimmed(bytes)),
            ValueType::Link => ValueData::Link(utf16_trimmed(bytes)),
            ValueType::Binary => ValueData::Binary(bytes.to_vec()),
            ValueType::Dword => ValueData::Dword(u32::from_le_bytes(fixed(value_type, bytes)?)),
            ValueType::DwordBigEndian => {
                ValueData::DwordBigEndian(u32::from_be_bytes(fixed(value_type, bytes)?))
            }
            ValueType::QWord => ValueData::QWord(u64::from_le_bytes(fixed(value_type, bytes)?)),
            ValueType::MultiString => {
                let text = utf16_trimmed(bytes);
                if text.is_empty() {
                    ValueData::MultiString(Vec::new())
                } else {
                    ValueData::MultiString(text.split('\0').map(str::to_string).collect())
                }
            }
            other => ValueData::Other { value_type: other, bytes: bytes.to_vec() },
        })
    }
}

/// A value as read from a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    /// Empty for the default value
    pub name: String,
    pub value_type: ValueType,
    pub raw: Vec<u8>,
}

impl RegistryValue {
    /// Decode the payload.
    pub fn data(&self) -> HiveResult<ValueData> {
        ValueData::from_bytes(self.value_type, &self.raw)
    }
}

/// Payload bytes of a value record.
pub(crate) fn read_data<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    value: &ValueCell,
) -> HiveResult<Vec<u8>> {
    let len = value.data_len();
    if value.is_inline() {
        let inline = value.data_index.to_le_bytes();
        return Ok(inline[..len.min(4)].to_vec());
    }
    match value.data_cell() {
        Some(index) if len > 0 => {
            let bytes = hive.raw_cell_data(index, len)?;
            if bytes.len() < len {
                return Err(HiveError::corrupt(
                    index,
                    format!("value data holds {} of {} bytes", bytes.len(), len),
                ));
            }
            Ok(bytes)
        }
        _ => Ok(Vec::new()),
    }
}

/// Store `data` for `value`, inlining small integers. The value record
/// itself is not written; the caller persists it.
pub(crate) fn set_data<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    value: &mut ValueCell,
    value_type: ValueType,
    data: &[u8],
) -> HiveResult<()> {
    if value_type.is_dword() && data.len() <= 4 {
        if let Some(old) = value.data_cell() {
            hive.free_cell(old)?;
        }
        let mut inline = [0u8; 4];
        inline[..data.len()].copy_from_slice(data);
        value.data_index = u32::from_le_bytes(inline);
        value.data_length = data.len() as u32 | INLINE_DATA_FLAG;
    } else {
        value.data_index = hive.store_raw(value.data_cell(), data)?;
        value.data_length = data.len() as u32;
    }
    value.data_type = value_type;
    Ok(())
}

/// Release a value's out-of-line payload, if any.
pub(crate) fn free_data<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    value: &mut ValueCell,
) -> HiveResult<()> {
    if let Some(index) = value.data_cell() {
        hive.free_cell(index)?;
    }
    value.data_index = NO_CELL;
    value.data_length = 0;
    Ok(())
}
