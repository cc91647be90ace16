//! Cell record codecs.
//!
//! Every allocated cell starts with a 4-byte signed length (handled by the
//! bin) followed by a record whose first two bytes name its type:
//!
//! ```text
//! "nk" key node      "vk" value        "sk" security descriptor
//! "lf" / "lh" hashed subkey leaf       "li" / "ri" indirect subkey list
//! ```
//!
//! Parsing is a single match on that tag. Raw cells (value lists, value
//! payloads, class names) carry no tag and never go through this module.

mod key_node;
mod list;
mod security;
mod value;

pub use key_node::{KeyFlags, KeyNodeCell};
pub use list::{HashKind, HashedEntry, HashedListCell, IndirectKind, IndirectListCell, ListCell};
pub use security::SecurityCell;
pub use value::{ValueCell, ValueType, INLINE_DATA_FLAG};

use crate::error::{HiveError, HiveResult};

/// Shared capability of every typed cell record.
pub trait CellCodec {
    /// Size of the record in bytes, excluding the 4-byte length prefix.
    fn serialized_size(&self) -> usize;

    /// Write the record into `buf`, which is exactly `serialized_size()` bytes.
    fn write_to(&self, buf: &mut [u8]);

    /// Serialize into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.serialized_size()];
        self.write_to(&mut buf);
        buf
    }
}

/// Conversion from a decoded cell into one specific record type.
pub trait FromCell: Sized {
    /// Human name of the expected record, for errors.
    const EXPECTED: &'static str;

    /// Unwrap the variant, or report what was found instead.
    fn from_cell(cell: Cell, index: u32) -> HiveResult<Self>;
}

/// Any tagged cell record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// `nk`
    KeyNode(KeyNodeCell),
    /// `vk`
    Value(ValueCell),
    /// `sk`
    Security(SecurityCell),
    /// `lf` / `lh`
    HashedList(HashedListCell),
    /// `li` / `ri`
    IndirectList(IndirectListCell),
}

impl Cell {
    /// Decode a record (the bytes after the length prefix).
    pub fn parse(buf: &[u8], index: u32) -> HiveResult<Cell> {
        if buf.len() < 2 {
            return Err(HiveError::corrupt(index, "cell too small for a type tag"));
        }
        match &[buf[0], buf[1]] {
            b"nk" => KeyNodeCell::read_from(buf, index).map(Cell::KeyNode),
            b"vk" => ValueCell::read_from(buf, index).map(Cell::Value),
            b"sk" => SecurityCell::read_from(buf, index).map(Cell::Security),
            b"lf" | b"lh" => HashedListCell::read_from(buf, index).map(Cell::HashedList),
            b"li" | b"ri" => IndirectListCell::read_from(buf, index).map(Cell::IndirectList),
            tag => Err(HiveError::UnknownCellType { tag: *tag, index }),
        }
    }

    /// Short description of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Cell::KeyNode(_) => "key node",
            Cell::Value(_) => "value",
            Cell::Security(_) => "security",
            Cell::HashedList(_) => "hashed list",
            Cell::IndirectList(_) => "indirect list",
        }
    }

    fn inner(&self) -> &dyn CellCodec {
        match self {
            Cell::KeyNode(c) => c,
            Cell::Value(c) => c,
            Cell::Security(c) => c,
            Cell::HashedList(c) => c,
            Cell::IndirectList(c) => c,
        }
    }
}

impl CellCodec for Cell {
    fn serialized_size(&self) -> usize {
        self.inner().serialized_size()
    }

    fn write_to(&self, buf: &mut [u8]) {
        self.inner().write_to(buf)
    }
}

impl FromCell for Cell {
    const EXPECTED: &'static str = "any cell";

    fn from_cell(cell: Cell, _index: u32) -> HiveResult<Self> {
        Ok(cell)
    }
}

macro_rules! variant_from_cell {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl FromCell for $ty {
            const EXPECTED: &'static str = $expected;

            fn from_cell(cell: Cell, index: u32) -> HiveResult<Self> {
                match cell {
                    Cell::$variant(inner) => Ok(inner),
                    other => Err(HiveError::UnexpectedCellType {
                        index,
                        expected: Self::EXPECTED,
                        found: other.kind(),
                    }),
                }
            }
        }

        impl From<$ty> for Cell {
            fn from(inner: $ty) -> Self {
                Cell::$variant(inner)
            }
        }
    };
}

variant_from_cell!(KeyNodeCell, KeyNode, "key node");
variant_from_cell!(ValueCell, Value, "value");
variant_from_cell!(SecurityCell, Security, "security");
variant_from_cell!(HashedListCell, HashedList, "hashed list");
variant_from_cell!(IndirectListCell, IndirectList, "indirect list");

impl FromCell for ListCell {
    const EXPECTED: &'static str = "subkey list";

    fn from_cell(cell: Cell, index: u32) -> HiveResult<Self> {
        match cell {
            Cell::HashedList(list) => Ok(ListCell::Hashed(list)),
            Cell::IndirectList(list) => Ok(ListCell::Indirect(list)),
            other => Err(HiveError::UnexpectedCellType {
                index,
                expected: Self::EXPECTED,
                found: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(cell: Cell) {
        let bytes = cell.to_bytes();
        assert_eq!(bytes.len(), cell.serialized_size());
        let parsed = Cell::parse(&bytes, 0x20).unwrap();
        assert_eq!(parsed, cell);
    }

    #[test]
    fn test_every_variant_roundtrips() {
        let mut key = KeyNodeCell::new("Software", 0x20);
        key.num_sub_keys = 3;
        key.sub_keys_index = 0x1000;
        key.security_index = 0x80;
        key.max_value_data_bytes = 77;
        roundtrip(Cell::KeyNode(key));

        let mut wide = KeyNodeCell::new("\u{65e5}\u{672c}", 0x20);
        wide.flags = KeyFlags(KeyFlags::ROOT);
        roundtrip(Cell::KeyNode(wide));

        let mut value = ValueCell::new("Count");
        value.data_type = ValueType::Dword;
        value.data_length = INLINE_DATA_FLAG | 4;
        value.data_index = 42;
        roundtrip(Cell::Value(value));
        roundtrip(Cell::Value(ValueCell::new("")));

        roundtrip(Cell::Security(SecurityCell::new(vec![1, 0, 4, 0x80, 9, 9, 9])));

        let mut lh = HashedListCell::new(HashKind::Lh);
        lh.entries.push(HashedEntry { key_index: 0x120, hash: 0xDEADBEEF });
        lh.entries.push(HashedEntry { key_index: 0x220, hash: 7 });
        roundtrip(Cell::HashedList(lh));
        roundtrip(Cell::HashedList(HashedListCell::new(HashKind::Lf)));

        roundtrip(Cell::IndirectList(IndirectListCell {
            kind: IndirectKind::Ri,
            indices: vec![0x300, 0x400, 0x500],
        }));
        roundtrip(Cell::IndirectList(IndirectListCell::new(IndirectKind::Li)));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = Cell::parse(b"zz\x00\x00", 0x40).unwrap_err();
        assert!(matches!(err, HiveError::UnknownCellType { tag, index: 0x40 } if &tag == b"zz"));
    }

    #[test]
    fn test_typed_conversion_reports_mismatch() {
        let cell = Cell::Security(SecurityCell::new(vec![]));
        let err = KeyNodeCell::from_cell(cell, 0x60).unwrap_err();
        assert!(matches!(
            err,
            HiveError::UnexpectedCellType { expected: "key node", found: "security", .. }
        ));
    }
}
