//! Hive: the header plus the ordered set of bins.
//!
//! This is the only storage API the key tree talks to. Every call resolves a
//! cell index to its owning bin by binary search over the bin headers, then
//! loads that bin from the stream and delegates. Nothing is cached across
//! calls and every mutation is written through before returning.
//!
//! Growth appends a bin after the last one, sized for the failed request and
//! never smaller than `HiveConfig::min_bin_size`.

use std::cmp::Ordering;
use std::io::{Read, Seek, Write};

use tracing::{debug, trace};

use crate::bin::{read_at, write_at, Bin};
use crate::cell::{Cell, CellCodec, FromCell};
use crate::config::HiveConfig;
use crate::error::{HiveError, HiveResult};
use crate::format::{
    read_i32, round_up, BinHeader, HiveHeader, BIN_ALIGNMENT, BIN_HEADER_SIZE, CELL_ALIGNMENT,
    DATA_START, HIVE_HEADER_SIZE, NO_CELL,
};

/// An open hive over a seekable byte stream.
#[derive(Debug)]
pub struct Hive<S> {
    stream: S,
    header: HiveHeader,
    bins: Vec<BinHeader>,
    config: HiveConfig,
}

impl<S: Read + Write + Seek> Hive<S> {
    /// Lay out an empty hive: header block, one bin, one free cell.
    pub fn format(mut stream: S, config: HiveConfig) -> HiveResult<Self> {
        config.validate().map_err(HiveError::InvalidConfig)?;

        let bin = BinHeader::new(0, config.min_bin_size);
        let header = HiveHeader::new(config.minor_version, &config.hive_path, bin.bin_size);

        let mut block = vec![0u8; DATA_START as usize];
        block[..HIVE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        write_at(&mut stream, 0, &block)?;
        Bin::write_empty(&mut stream, &bin)?;

        debug!(bin_size = bin.bin_size, minor_version = header.minor_version, "hive.format");
        Ok(Self { stream, header, bins: vec![bin], config })
    }

    /// Open an existing hive, validating the header and every bin header.
    pub fn open(mut stream: S, config: HiveConfig) -> HiveResult<Self> {
        config.validate().map_err(HiveError::InvalidConfig)?;

        let mut raw = [0u8; HIVE_HEADER_SIZE];
        read_at(&mut stream, 0, &mut raw)?;
        let header = HiveHeader::from_bytes(&raw)?;

        let mut bins = Vec::new();
        let mut offset = 0u64;
        while offset < u64::from(header.length) {
            let position = DATA_START + offset;
            let mut raw_bin = [0u8; BIN_HEADER_SIZE];
            read_at(&mut stream, position, &mut raw_bin)?;
            let bin = BinHeader::from_bytes(&raw_bin, position)?;
            if u64::from(bin.file_offset) != offset {
                return Err(HiveError::corrupt(
                    offset as u32,
                    format!(
                        "bin at data offset {:#x} claims offset {:#x}",
                        offset, bin.file_offset
                    ),
                ));
            }
            offset = bin.end();
            bins.push(bin);
        }
        if offset != u64::from(header.length) {
            return Err(HiveError::corrupt(
                header.length,
                format!("bins cover {:#x} bytes, header says {:#x}", offset, header.length),
            ));
        }

        debug!(bins = bins.len(), length = header.length, root = header.root_cell, "hive.open");
        Ok(Self { stream, header, bins, config })
    }

    /// The parsed hive header.
    pub fn header(&self) -> &HiveHeader {
        &self.header
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    /// Bin headers in file order.
    pub fn bins(&self) -> &[BinHeader] {
        &self.bins
    }

    /// True when new leaves should be `lh` rather than `lf`.
    pub fn uses_lh_leaves(&self) -> bool {
        self.header.minor_version >= 5
    }

    fn bin_for(&self, index: u32) -> HiveResult<BinHeader> {
        self.bins
            .binary_search_by(|bin| {
                if bin.end() <= u64::from(index) {
                    Ordering::Less
                } else if bin.file_offset > index {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            })
            .map(|slot| self.bins[slot])
            .map_err(|_| HiveError::CellNotFound { index })
    }

    /// Load the bin owning `index`.
    fn bin_containing(&mut self, index: u32) -> HiveResult<Bin> {
        let header = self.bin_for(index)?;
        Bin::load(&mut self.stream, &header)
    }

    /// Load a bin by its header.
    pub fn load_bin(&mut self, header: &BinHeader) -> HiveResult<Bin> {
        Bin::load(&mut self.stream, header)
    }

    /// Allocated size of the cell at `index`, length prefix included.
    pub fn allocated_size(&mut self, index: u32) -> HiveResult<usize> {
        let bin = self.bin_for(index)?;
        if ((index - bin.file_offset) as usize) < BIN_HEADER_SIZE {
            return Err(HiveError::corrupt(index, "index points into a bin header"));
        }
        let mut prefix = [0u8; 4];
        read_at(&mut self.stream, DATA_START + u64::from(index), &mut prefix)?;
        let len = read_i32(&prefix, 0);
        if len >= 0 {
            return Err(HiveError::CellNotAllocated { index });
        }
        let size = len.unsigned_abs() as usize;
        if size < CELL_ALIGNMENT || u64::from(index) + size as u64 > bin.end() {
            return Err(HiveError::corrupt(index, format!("bad cell length {}", len)));
        }
        Ok(size)
    }

    /// Read and decode the cell at `index` as `T`.
    ///
    /// Only the addressed cell's bytes are read.
    pub fn get_cell<T: FromCell>(&mut self, index: u32) -> HiveResult<T> {
        let size = self.allocated_size(index)?;
        let mut record = vec![0u8; size - 4];
        read_at(&mut self.stream, DATA_START + u64::from(index) + 4, &mut record)?;
        T::from_cell(Cell::parse(&record, index)?, index)
    }

    /// Allocate a cell able to hold `capacity` bytes of content.
    pub fn allocate_raw_cell(&mut self, capacity: usize) -> HiveResult<u32> {
        let size = round_up(capacity + 4, CELL_ALIGNMENT);

        for slot in 0..self.bins.len() {
            let header = self.bins[slot];
            let mut bin = Bin::load(&mut self.stream, &header)?;
            if let Some(index) = bin.allocate_cell(&mut self.stream, size)? {
                return Ok(index);
            }
        }

        let header = self.grow(size)?;
        let mut bin = Bin::load(&mut self.stream, &header)?;
        bin.allocate_cell(&mut self.stream, size)?
            .ok_or_else(|| {
                HiveError::corrupt(
                    header.file_offset,
                    "fresh bin cannot hold the allocation it was sized for",
                )
            })
    }

    /// Append a bin with room for a record of `min_size` bytes.
    fn grow(&mut self, min_size: usize) -> HiveResult<BinHeader> {
        let file_offset = self.bins.last().map_or(0, |last| last.end() as u32);
        let wanted = (min_size + BIN_HEADER_SIZE).max(self.config.min_bin_size as usize);
        let bin = BinHeader::new(file_offset, round_up(wanted, BIN_ALIGNMENT as usize) as u32);

        Bin::write_empty(&mut self.stream, &bin)?;
        self.bins.push(bin);

        self.header.length += bin.bin_size;
        self.header.touch();
        self.write_header()?;

        debug!(file_offset, bin_size = bin.bin_size, length = self.header.length, "hive.bin.grow");
        Ok(bin)
    }

    /// Write `cell` at `index`, relocating when it no longer fits.
    ///
    /// With no index the cell is allocated first. Returns the cell's index,
    /// which differs from the input when the cell moved; the old cell is freed.
    pub fn update_cell<C: CellCodec + ?Sized>(
        &mut self,
        index: Option<u32>,
        cell: &C,
        can_relocate: bool,
    ) -> HiveResult<u32> {
        let needed = cell.serialized_size();
        let index = match index {
            Some(index) => index,
            None if can_relocate => self.allocate_raw_cell(needed)?,
            None => {
                return Err(HiveError::RelocationRequired {
                    index: NO_CELL,
                    needed: needed + 4,
                    allocated: 0,
                })
            }
        };

        let mut bin = self.bin_containing(index)?;
        if bin.update_cell(&mut self.stream, index, cell)? {
            return Ok(index);
        }
        if !can_relocate {
            return Err(HiveError::RelocationRequired {
                index,
                needed: needed + 4,
                allocated: bin.allocated_size(index)?,
            });
        }

        let moved = self.allocate_raw_cell(needed)?;
        let mut target = self.bin_containing(moved)?;
        if !target.update_cell(&mut self.stream, moved, cell)? {
            return Err(HiveError::corrupt(moved, "new allocation too small for relocated cell"));
        }
        self.free_cell(index)?;
        trace!(from = index, to = moved, size = needed, "hive.cell.relocate");
        Ok(moved)
    }

    /// Return a cell to its bin's free list.
    pub fn free_cell(&mut self, index: u32) -> HiveResult<()> {
        let mut bin = self.bin_containing(index)?;
        bin.free_cell(&mut self.stream, index)
    }

    /// Up to `max_bytes` of an untyped cell.
    pub fn raw_cell_data(&mut self, index: u32, max_bytes: usize) -> HiveResult<Vec<u8>> {
        let bin = self.bin_containing(index)?;
        bin.read_raw_cell_data(index, max_bytes)
    }

    /// Overwrite an untyped cell. Returns false when `data` does not fit.
    pub fn write_raw_cell_data(&mut self, index: u32, data: &[u8]) -> HiveResult<bool> {
        let mut bin = self.bin_containing(index)?;
        bin.write_raw_cell_data(&mut self.stream, index, data)
    }

    /// Store raw bytes, reusing `index` when they fit and otherwise moving to
    /// a fresh cell. Returns the (possibly new) index.
    pub fn store_raw(&mut self, index: Option<u32>, data: &[u8]) -> HiveResult<u32> {
        if let Some(index) = index {
            if self.write_raw_cell_data(index, data)? {
                return Ok(index);
            }
            self.free_cell(index)?;
        }
        let fresh = self.allocate_raw_cell(data.len())?;
        self.write_raw_cell_data(fresh, data)?;
        Ok(fresh)
    }

    /// Record the root key cell in the header.
    pub fn set_root_cell(&mut self, index: u32) -> HiveResult<()> {
        self.header.root_cell = index;
        self.header.touch();
        self.write_header()
    }

    fn write_header(&mut self) -> HiveResult<()> {
        let bytes = self.header.to_bytes();
        write_at(&mut self.stream, 0, &bytes)
    }

    /// Flush the backing stream.
    pub fn flush(&mut self) -> HiveResult<()> {
        self.stream.flush()?;
        Ok(())
    }

    /// Give back the backing stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{KeyNodeCell, SecurityCell};
    use std::io::Cursor;

    fn fresh() -> Hive<Cursor<Vec<u8>>> {
        Hive::format(Cursor::new(Vec::new()), HiveConfig::default()).unwrap()
    }

    #[test]
    fn test_leaf_flavour_follows_header_version() {
        assert!(fresh().uses_lh_leaves());
        let legacy = Hive::format(Cursor::new(Vec::new()), HiveConfig::legacy()).unwrap();
        assert_eq!(legacy.header().minor_version, 3);
        assert!(!legacy.uses_lh_leaves());
    }

    #[test]
    fn test_format_layout() {
        let mut hive = fresh();
        assert_eq!(hive.bins().len(), 1);
        assert_eq!(hive.bins()[0].bin_size, 4096);
        assert_eq!(hive.header().length, 4096);
        assert_eq!(hive.header().root_cell, NO_CELL);

        let header = hive.bins()[0];
        let bin = hive.load_bin(&header).unwrap();
        assert_eq!(bin.free_cells().len(), 1);
        assert_eq!(bin.free_cells()[0].size, 4096 - 32);

        let bytes = hive.into_inner().into_inner();
        assert_eq!(bytes.len(), 8192);
        assert_eq!(&bytes[0..4], b"regf");
        assert_eq!(&bytes[4096..4100], b"hbin");
    }

    #[test]
    fn test_cells_survive_reopen() {
        let mut hive = fresh();
        let key = KeyNodeCell::new("Software", NO_CELL);
        let index = hive.update_cell(None, &key, true).unwrap();
        hive.set_root_cell(index).unwrap();

        let stream = hive.into_inner();
        let mut reopened = Hive::open(stream, HiveConfig::default()).unwrap();
        assert_eq!(reopened.header().root_cell, index);
        let loaded: KeyNodeCell = reopened.get_cell(index).unwrap();
        assert_eq!(loaded, key);
    }

    #[test]
    fn test_growth_appends_bin() {
        let mut hive = fresh();
        let big = hive.allocate_raw_cell(6000).unwrap();
        assert_eq!(hive.bins().len(), 2);
        assert_eq!(hive.bins()[1].file_offset, 4096);
        assert_eq!(hive.bins()[1].bin_size, 8192);
        assert_eq!(hive.header().length, 4096 + 8192);
        assert_eq!(hive.header().sequence1, hive.header().sequence2);
        assert!(big >= 4096 + 32);

        let stream = hive.into_inner();
        assert_eq!(stream.get_ref().len(), 4096 + 4096 + 8192);
        let reopened = Hive::open(stream, HiveConfig::default()).unwrap();
        assert_eq!(reopened.bins().len(), 2);
    }

    #[test]
    fn test_relocation() {
        let mut hive = fresh();
        let small = SecurityCell::new(vec![1; 4]);
        let index = hive.update_cell(None, &small, true).unwrap();

        let large = SecurityCell::new(vec![2; 64]);
        assert!(matches!(
            hive.update_cell(Some(index), &large, false),
            Err(HiveError::RelocationRequired { .. })
        ));

        let moved = hive.update_cell(Some(index), &large, true).unwrap();
        assert_ne!(moved, index);
        let loaded: SecurityCell = hive.get_cell(moved).unwrap();
        assert_eq!(loaded, large);
        assert!(matches!(
            hive.get_cell::<SecurityCell>(index),
            Err(HiveError::CellNotAllocated { .. })
        ));
    }

    #[test]
    fn test_unknown_index() {
        let mut hive = fresh();
        assert!(matches!(hive.free_cell(0x10_0000), Err(HiveError::CellNotFound { .. })));
        assert!(matches!(hive.raw_cell_data(0x10_0000, 4), Err(HiveError::CellNotFound { .. })));
    }

    #[test]
    fn test_store_raw_moves_when_too_big() {
        let mut hive = fresh();
        let index = hive.store_raw(None, &[1; 8]).unwrap();
        assert_eq!(hive.store_raw(Some(index), &[2; 12]).unwrap(), index);
        let moved = hive.store_raw(Some(index), &[3; 100]).unwrap();
        assert_ne!(moved, index);
        assert_eq!(hive.raw_cell_data(moved, 100).unwrap(), vec![3; 100]);
    }

    #[test]
    fn test_open_rejects_pending_replay() {
        let hive = fresh();
        let mut header = hive.header().clone();
        let mut stream = hive.into_inner();
        header.sequence2 += 1;
        stream.get_mut()[..HIVE_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        let err = Hive::open(stream, HiveConfig::default()).unwrap_err();
        assert!(matches!(err, HiveError::PendingLogReplay { .. }));
        assert!(err.is_invalid_format());
    }
}
