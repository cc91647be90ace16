//! Bin: one fixed-size heap chunk and its free list.
//!
//! A bin is loaded by reading its header and then the whole chunk into
//! memory. The free list is rebuilt by walking the length prefixes: negative
//! means allocated, positive means free, the magnitude is the record size.
//! Every mutation is applied to the in-memory copy and written straight
//! through to the stream at the record's absolute position.
//!
//! Allocation is first-fit over the sorted free list. That is simple on
//! purpose and fragments under churn; bins are small and the hive grows
//! rather than compacts.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::trace;

use crate::cell::{Cell, CellCodec};
use crate::error::{HiveError, HiveResult};
use crate::format::{read_i32, write_i32, BinHeader, BIN_HEADER_SIZE, CELL_ALIGNMENT, DATA_START};

/// A free record inside a bin, in bin-relative bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeCell {
    /// Offset from the start of the bin
    pub offset: u32,
    /// Record size including the length prefix
    pub size: u32,
}

/// One record as found by walking a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRecord {
    /// Global cell index
    pub index: u32,
    /// Record size including the length prefix
    pub size: u32,
    pub allocated: bool,
}

/// A loaded bin.
#[derive(Debug)]
pub struct Bin {
    header: BinHeader,
    buffer: Vec<u8>,
    free_cells: Vec<FreeCell>,
}

pub(crate) fn write_at<S: Write + Seek>(
    stream: &mut S,
    position: u64,
    bytes: &[u8],
) -> HiveResult<()> {
    stream.seek(SeekFrom::Start(position))?;
    stream.write_all(bytes)?;
    Ok(())
}

pub(crate) fn read_at<S: Read + Seek>(
    stream: &mut S,
    position: u64,
    bytes: &mut [u8],
) -> HiveResult<()> {
    stream.seek(SeekFrom::Start(position))?;
    stream.read_exact(bytes)?;
    Ok(())
}

impl Bin {
    /// Write a brand new bin: header, one free record spanning the rest, and
    /// zero-fill out to the bin's end.
    pub fn write_empty<S: Write + Seek>(stream: &mut S, header: &BinHeader) -> HiveResult<()> {
        let mut buffer = vec![0u8; header.bin_size as usize];
        buffer[..BIN_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        let first_free = (header.bin_size as usize - BIN_HEADER_SIZE) as i32;
        write_i32(&mut buffer, BIN_HEADER_SIZE, first_free);
        write_at(stream, header.stream_position(), &buffer)
    }

    /// Read the bin described by `header` and rebuild its free list.
    pub fn load<S: Read + Seek>(stream: &mut S, header: &BinHeader) -> HiveResult<Self> {
        let mut buffer = vec![0u8; header.bin_size as usize];
        read_at(stream, header.stream_position(), &mut buffer)?;

        let mut raw_header = [0u8; BIN_HEADER_SIZE];
        raw_header.copy_from_slice(&buffer[..BIN_HEADER_SIZE]);
        let on_disk = BinHeader::from_bytes(&raw_header, header.stream_position())?;
        if on_disk.file_offset != header.file_offset || on_disk.bin_size != header.bin_size {
            return Err(HiveError::corrupt(
                header.file_offset,
                format!(
                    "bin header moved: expected offset {:#x} size {:#x}, found {:#x} / {:#x}",
                    header.file_offset, header.bin_size, on_disk.file_offset, on_disk.bin_size
                ),
            ));
        }

        let mut bin = Self { header: *header, buffer, free_cells: Vec::new() };
        bin.free_cells = bin
            .records()?
            .into_iter()
            .filter(|r| !r.allocated)
            .map(|r| FreeCell { offset: r.index - header.file_offset, size: r.size })
            .collect();
        Ok(bin)
    }

    /// The bin's header.
    pub fn header(&self) -> &BinHeader {
        &self.header
    }

    /// The free list, sorted by offset.
    pub fn free_cells(&self) -> &[FreeCell] {
        &self.free_cells
    }

    /// Walk every record in the bin, validating the length prefixes.
    pub fn records(&self) -> HiveResult<Vec<CellRecord>> {
        let size = self.buffer.len();
        let mut records = Vec::new();
        let mut pos = BIN_HEADER_SIZE;
        while pos < size {
            let index = self.header.file_offset + pos as u32;
            if pos + 4 > size {
                return Err(HiveError::corrupt(index, "truncated cell length"));
            }
            let len = read_i32(&self.buffer, pos);
            let abs = len.unsigned_abs() as usize;
            if abs < CELL_ALIGNMENT || abs % CELL_ALIGNMENT != 0 || pos + abs > size {
                return Err(HiveError::corrupt(index, format!("bad cell length {}", len)));
            }
            records.push(CellRecord { index, size: abs as u32, allocated: len < 0 });
            pos += abs;
        }
        Ok(records)
    }

    fn relative(&self, index: u32) -> HiveResult<usize> {
        if !self.header.contains(index) {
            return Err(HiveError::CellNotFound { index });
        }
        let rel = (index - self.header.file_offset) as usize;
        if rel < BIN_HEADER_SIZE || rel + 4 > self.buffer.len() {
            return Err(HiveError::corrupt(index, "index points into the bin header"));
        }
        Ok(rel)
    }

    /// Allocated size (prefix included) of the cell at `index`.
    pub fn allocated_size(&self, index: u32) -> HiveResult<usize> {
        let rel = self.relative(index)?;
        let len = read_i32(&self.buffer, rel);
        if len >= 0 {
            return Err(HiveError::CellNotAllocated { index });
        }
        let abs = len.unsigned_abs() as usize;
        if rel + abs > self.buffer.len() {
            return Err(HiveError::corrupt(index, "cell runs past the end of its bin"));
        }
        Ok(abs)
    }

    fn stream_position(&self, rel: usize) -> u64 {
        DATA_START + u64::from(self.header.file_offset) + rel as u64
    }

    fn write_length<S: Write + Seek>(
        &mut self,
        stream: &mut S,
        rel: usize,
        len: i32,
    ) -> HiveResult<()> {
        write_i32(&mut self.buffer, rel, len);
        write_at(stream, self.stream_position(rel), &self.buffer[rel..rel + 4])
    }

    /// First-fit allocation of a record of exactly `size` bytes (prefix
    /// included). Returns the new cell index, or `None` when nothing fits.
    pub fn allocate_cell<S: Write + Seek>(
        &mut self,
        stream: &mut S,
        size: usize,
    ) -> HiveResult<Option<u32>> {
        if size < CELL_ALIGNMENT || size % CELL_ALIGNMENT != 0 {
            return Err(HiveError::InvalidCellSize { size });
        }
        let size32 = size as u32;

        let Some(slot) = self.free_cells.iter().position(|free| free.size >= size32) else {
            return Ok(None);
        };
        let free = self.free_cells[slot];
        let rel = free.offset as usize;
        self.write_length(stream, rel, -(size as i32))?;

        if free.size > size32 {
            let rest = FreeCell { offset: free.offset + size32, size: free.size - size32 };
            self.free_cells[slot] = rest;
            self.write_length(stream, rest.offset as usize, rest.size as i32)?;
        } else {
            self.free_cells.remove(slot);
        }

        let index = self.header.file_offset + free.offset;
        trace!(index, size, bin = self.header.file_offset, "hive.bin.allocate");
        Ok(Some(index))
    }

    /// Return the cell at `index` to the free list, merging with byte-adjacent
    /// free neighbours.
    pub fn free_cell<S: Write + Seek>(&mut self, stream: &mut S, index: u32) -> HiveResult<()> {
        let mut offset = self.relative(index)? as u32;
        let mut size = self.allocated_size(index)? as u32;
        // Single-cell reads look only at this prefix, even once merged below.
        self.write_length(stream, offset as usize, size as i32)?;

        let mut i = 0;
        while i < self.free_cells.len() && self.free_cells[i].offset < offset {
            let prev = self.free_cells[i];
            if prev.offset + prev.size == offset {
                offset = prev.offset;
                size += prev.size;
                self.free_cells.remove(i);
            } else {
                i += 1;
            }
        }

        if i < self.free_cells.len() && self.free_cells[i].offset == offset + size {
            size += self.free_cells[i].size;
            self.free_cells.remove(i);
        }

        self.free_cells.insert(i, FreeCell { offset, size });
        self.write_length(stream, offset as usize, size as i32)?;
        trace!(index, merged_offset = offset, merged_size = size, "hive.bin.free");
        Ok(())
    }

    /// Decode the cell at `index` from the loaded bytes.
    pub fn get_cell(&self, index: u32) -> HiveResult<Cell> {
        let rel = self.relative(index)?;
        let size = self.allocated_size(index)?;
        Cell::parse(&self.buffer[rel + 4..rel + size], index)
    }

    /// Rewrite `cell` in place. Returns false when it no longer fits its
    /// allocation; nothing is written in that case.
    pub fn update_cell<S: Write + Seek, C: CellCodec + ?Sized>(
        &mut self,
        stream: &mut S,
        index: u32,
        cell: &C,
    ) -> HiveResult<bool> {
        let rel = self.relative(index)?;
        let allocated = self.allocated_size(index)?;
        let needed = cell.serialized_size() + 4;
        if needed > allocated {
            return Ok(false);
        }
        cell.write_to(&mut self.buffer[rel + 4..rel + needed]);
        write_at(stream, self.stream_position(rel + 4), &self.buffer[rel + 4..rel + needed])?;
        Ok(true)
    }

    /// Up to `max_bytes` of an untyped cell's contents.
    pub fn read_raw_cell_data(&self, index: u32, max_bytes: usize) -> HiveResult<Vec<u8>> {
        let rel = self.relative(index)?;
        let size = self.allocated_size(index)?;
        let len = (size - 4).min(max_bytes);
        Ok(self.buffer[rel + 4..rel + 4 + len].to_vec())
    }

    /// Overwrite the start of an untyped cell. Returns false when `data` is
    /// larger than the allocation.
    pub fn write_raw_cell_data<S: Write + Seek>(
        &mut self,
        stream: &mut S,
        index: u32,
        data: &[u8],
    ) -> HiveResult<bool> {
        let rel = self.relative(index)?;
        let size = self.allocated_size(index)?;
        if size - 4 < data.len() {
            return Ok(false);
        }
        self.buffer[rel + 4..rel + 4 + data.len()].copy_from_slice(data);
        write_at(stream, self.stream_position(rel + 4), data)?;
        Ok(true)
    }
}
