//! Subkey list records.
//!
//! Hashed leaves (`lf` / `lh`): tag, u16 count, then `count` pairs of
//! (key cell index u32, name hash u32), sorted by child name.
//!
//! Indirect lists (`li` / `ri`): tag, u16 count, then `count` cell indices.
//! `li` entries are key cells; `ri` entries are further subkey lists.

use super::CellCodec;
use crate::error::{HiveError, HiveResult};
use crate::format::{read_u16, read_u32, write_u16, write_u32};
use crate::names;

const LIST_HEADER_SIZE: usize = 4;

/// Which hash a hashed leaf stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// First four characters of the name, one byte each
    Lf,
    /// Weighted hash over the uppercased name
    Lh,
}

impl HashKind {
    fn tag(&self) -> &'static [u8; 2] {
        match self {
            HashKind::Lf => b"lf",
            HashKind::Lh => b"lh",
        }
    }

    /// Hash `name` the way this list flavour stores it.
    pub fn hash(&self, name: &str) -> u32 {
        match self {
            HashKind::Lh => {
                let upper: String = name.chars().map(names::upcase).collect();
                upper
                    .encode_utf16()
                    .fold(0u32, |h, unit| h.wrapping_mul(37).wrapping_add(u32::from(unit)))
            }
            HashKind::Lf => name
                .chars()
                .chain(std::iter::repeat('\0'))
                .take(4)
                .enumerate()
                .fold(0u32, |h, (i, c)| h | ((c as u32 & 0xFF) << (i * 8))),
        }
    }
}

/// One child reference in a hashed leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedEntry {
    pub key_index: u32,
    pub hash: u32,
}

/// `lf` / `lh` leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedListCell {
    pub kind: HashKind,
    pub entries: Vec<HashedEntry>,
}

impl HashedListCell {
    pub fn new(kind: HashKind) -> Self {
        Self { kind, entries: Vec::new() }
    }

    pub(crate) fn read_from(buf: &[u8], index: u32) -> HiveResult<Self> {
        let kind = if &buf[0..2] == b"lh" { HashKind::Lh } else { HashKind::Lf };
        let count = list_count(buf, index, 8)?;
        let entries = (0..count)
            .map(|i| {
                let off = LIST_HEADER_SIZE + i * 8;
                HashedEntry {
                    key_index: read_u32(buf, off),
                    hash: read_u32(buf, off + 4),
                }
            })
            .collect();
        Ok(Self { kind, entries })
    }
}

impl CellCodec for HashedListCell {
    fn serialized_size(&self) -> usize {
        LIST_HEADER_SIZE + self.entries.len() * 8
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(self.kind.tag());
        write_u16(buf, 0x02, self.entries.len() as u16);
        for (i, entry) in self.entries.iter().enumerate() {
            let off = LIST_HEADER_SIZE + i * 8;
            write_u32(buf, off, entry.key_index);
            write_u32(buf, off + 4, entry.hash);
        }
    }
}

/// Which kind of cells an indirect list points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectKind {
    /// Entries are key cells
    Li,
    /// Entries are subkey lists, each covering a sorted sub-range
    Ri,
}

/// `li` / `ri` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectListCell {
    pub kind: IndirectKind,
    pub indices: Vec<u32>,
}

impl IndirectListCell {
    pub fn new(kind: IndirectKind) -> Self {
        Self { kind, indices: Vec::new() }
    }

    pub(crate) fn read_from(buf: &[u8], index: u32) -> HiveResult<Self> {
        let kind = if &buf[0..2] == b"ri" { IndirectKind::Ri } else { IndirectKind::Li };
        let count = list_count(buf, index, 4)?;
        let indices = (0..count)
            .map(|i| read_u32(buf, LIST_HEADER_SIZE + i * 4))
            .collect();
        Ok(Self { kind, indices })
    }
}

impl CellCodec for IndirectListCell {
    fn serialized_size(&self) -> usize {
        LIST_HEADER_SIZE + self.indices.len() * 4
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(match self.kind {
            IndirectKind::Li => b"li",
            IndirectKind::Ri => b"ri",
        });
        write_u16(buf, 0x02, self.indices.len() as u16);
        for (i, idx) in self.indices.iter().enumerate() {
            write_u32(buf, LIST_HEADER_SIZE + i * 4, *idx);
        }
    }
}

/// A key's subkey index: either list flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListCell {
    Hashed(HashedListCell),
    Indirect(IndirectListCell),
}

impl CellCodec for ListCell {
    fn serialized_size(&self) -> usize {
        match self {
            ListCell::Hashed(list) => list.serialized_size(),
            ListCell::Indirect(list) => list.serialized_size(),
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        match self {
            ListCell::Hashed(list) => list.write_to(buf),
            ListCell::Indirect(list) => list.write_to(buf),
        }
    }
}

fn list_count(buf: &[u8], index: u32, entry_size: usize) -> HiveResult<usize> {
    if buf.len() < LIST_HEADER_SIZE {
        return Err(HiveError::corrupt(index, "subkey list too small"));
    }
    let count = read_u16(buf, 0x02) as usize;
    if LIST_HEADER_SIZE + count * entry_size > buf.len() {
        return Err(HiveError::corrupt(
            index,
            format!("subkey list of {} entries does not fit {} bytes", count, buf.len()),
        ));
    }
    Ok(count)
}
