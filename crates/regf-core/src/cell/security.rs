//! Security (`sk`) record: a shared, refcounted descriptor on a ring.
//!
//! Layout (offsets from the tag):
//!   [0x00] "sk"           [0x02] reserved u16
//!   [0x04] previous u32   [0x08] next u32
//!   [0x0C] refcount u32   [0x10] descriptor length u32
//!   [0x14] descriptor bytes

use super::CellCodec;
use crate::error::{HiveError, HiveResult};
use crate::format::{read_u32, write_u16, write_u32, NO_CELL};

const FIXED_SIZE: usize = 0x14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityCell {
    pub previous_index: u32,
    pub next_index: u32,
    /// Number of keys referencing this record
    pub usage_count: u32,
    /// Self-relative security descriptor, kept opaque
    pub descriptor: Vec<u8>,
}

impl SecurityCell {
    /// An unlinked record with no users.
    pub fn new(descriptor: Vec<u8>) -> Self {
        Self {
            previous_index: NO_CELL,
            next_index: NO_CELL,
            usage_count: 0,
            descriptor,
        }
    }

    pub(crate) fn read_from(buf: &[u8], index: u32) -> HiveResult<Self> {
        if buf.len() < FIXED_SIZE {
            return Err(HiveError::corrupt(index, "security cell too small"));
        }
        let len = read_u32(buf, 0x10) as usize;
        if FIXED_SIZE + len > buf.len() {
            return Err(HiveError::corrupt(
                index,
                "security descriptor runs past the end of the cell",
            ));
        }
        Ok(Self {
            previous_index: read_u32(buf, 0x04),
            next_index: read_u32(buf, 0x08),
            usage_count: read_u32(buf, 0x0C),
            descriptor: buf[FIXED_SIZE..FIXED_SIZE + len].to_vec(),
        })
    }
}

impl CellCodec for SecurityCell {
    fn serialized_size(&self) -> usize {
        FIXED_SIZE + self.descriptor.len()
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(b"sk");
        write_u16(buf, 0x02, 0);
        write_u32(buf, 0x04, self.previous_index);
        write_u32(buf, 0x08, self.next_index);
        write_u32(buf, 0x0C, self.usage_count);
        write_u32(buf, 0x10, self.descriptor.len() as u32);
        buf[FIXED_SIZE..].copy_from_slice(&self.descriptor);
    }
}
