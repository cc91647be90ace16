//! Binary format definitions for the hive header and bin headers
//!
//! A hive file is a 4096-byte header block followed by the data area, a
//! sequence of bins. Cell indices are byte offsets into the data area, so the
//! absolute stream position of index `i` is `DATA_START + i`.
//!
//! Hive header (first 512 bytes of the header block, rest zero):
//!   [0x000..0x004] signature:  u32 - 0x66676572 ("regf")
//!   [0x004..0x008] sequence1:  u32
//!   [0x008..0x00C] sequence2:  u32 - equal to sequence1 unless a log replay is pending
//!   [0x00C..0x014] timestamp:  u64 - FILETIME of the last write
//!   [0x014..0x018] major:      u32 - always 1
//!   [0x018..0x01C] minor:      u32
//!   [0x01C..0x020] file_type:  u32 - 0 = primary file
//!   [0x020..0x024] format:     u32 - 1 = direct memory load
//!   [0x024..0x028] root_cell:  u32
//!   [0x028..0x02C] length:     u32 - total size of all bins
//!   [0x02C..0x030] clustering: u32 - always 1
//!   [0x030..0x070] path:       UTF-16LE, NUL padded
//!   [0x070..0x080] guid1
//!   [0x094..0x0A4] guid2
//!   [0x1FC..0x200] checksum:   u32 - XOR of the 127 preceding dwords
//!
//! Bin header (32 bytes):
//!   [0x00..0x04] signature:   u32 - 0x6E696268 ("hbin")
//!   [0x04..0x08] file_offset: u32 - offset of the bin within the data area
//!   [0x08..0x0C] size:        u32 - multiple of 4096, header included
//!   [0x0C..0x14] reserved
//!   [0x14..0x1C] timestamp:   u64 - FILETIME
//!   [0x1C..0x20] spare

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{HiveError, HiveResult};

/// "regf" as a little-endian u32
pub const HIVE_SIGNATURE: u32 = 0x6667_6572;

/// Meaningful portion of the header block
pub const HIVE_HEADER_SIZE: usize = 512;

/// On-disk size of the header block; the data area starts right after it
pub const DATA_START: u64 = 4096;

/// "hbin" as a little-endian u32
pub const BIN_SIGNATURE: u32 = 0x6E69_6268;

/// Bin header size in bytes
pub const BIN_HEADER_SIZE: usize = 32;

/// Bins are sized in multiples of this
pub const BIN_ALIGNMENT: u32 = 4096;

/// Cells are sized in multiples of this
pub const CELL_ALIGNMENT: usize = 8;

/// Null cell index (-1 on disk)
pub const NO_CELL: u32 = 0xFFFF_FFFF;

/// Longest hive path the header can hold, in UTF-16 units (keeps a NUL)
pub const MAX_HIVE_PATH_UNITS: usize = 31;

const CHECKSUM_OFFSET: usize = 0x1FC;
const PATH_OFFSET: usize = 0x30;
const PATH_END: usize = 0x70;
const GUID1_OFFSET: usize = 0x70;
const GUID2_OFFSET: usize = 0x94;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_DIFF: i64 = 11_644_473_600;

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(crate) fn read_i32(buf: &[u8], offset: usize) -> i32 {
    read_u32(buf, offset) as i32
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from(read_u32(buf, offset)) | (u64::from(read_u32(buf, offset + 4)) << 32)
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Round `value` up to the next multiple of `unit`.
pub(crate) fn round_up(value: usize, unit: usize) -> usize {
    value.div_ceil(unit) * unit
}

/// Current time as a Windows FILETIME (100ns ticks since 1601).
pub fn filetime_now() -> u64 {
    datetime_to_filetime(Utc::now())
}

/// Convert a calendar time to FILETIME ticks. Times before 1601 clamp to zero.
pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp() + FILETIME_UNIX_DIFF;
    if secs < 0 {
        return 0;
    }
    secs as u64 * 10_000_000 + u64::from(time.timestamp_subsec_nanos() / 100)
}

/// Convert FILETIME ticks to a calendar time.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    let secs = (filetime / 10_000_000) as i64 - FILETIME_UNIX_DIFF;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// XOR of the 127 dwords preceding the checksum field.
pub fn header_checksum(block: &[u8]) -> u32 {
    (0..CHECKSUM_OFFSET)
        .step_by(4)
        .fold(0u32, |acc, off| acc ^ read_u32(block, off))
}

/// The hive header (base block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveHeader {
    /// Primary sequence number
    pub sequence1: u32,
    /// Secondary sequence number
    pub sequence2: u32,
    /// Last written timestamp (FILETIME)
    pub timestamp: u64,
    /// Format major version (1)
    pub major_version: u32,
    /// Format minor version
    pub minor_version: u32,
    /// Root key cell index
    pub root_cell: u32,
    /// Total length of all bins
    pub length: u32,
    /// Embedded hive path
    pub path: String,
    /// First GUID (resource manager id)
    pub guid1: [u8; 16],
    /// Second GUID (log id)
    pub guid2: [u8; 16],
}

impl HiveHeader {
    /// Header for a brand new hive with random GUIDs.
    pub fn new(minor_version: u32, path: &str, length: u32) -> Self {
        Self {
            sequence1: 1,
            sequence2: 1,
            timestamp: filetime_now(),
            major_version: 1,
            minor_version,
            root_cell: NO_CELL,
            length,
            path: path.to_string(),
            guid1: rand::random(),
            guid2: rand::random(),
        }
    }

    /// Serialize header to bytes for writing, checksum included
    pub fn to_bytes(&self) -> [u8; HIVE_HEADER_SIZE] {
        let mut buf = [0u8; HIVE_HEADER_SIZE];
        write_u32(&mut buf, 0x00, HIVE_SIGNATURE);
        write_u32(&mut buf, 0x04, self.sequence1);
        write_u32(&mut buf, 0x08, self.sequence2);
        write_u64(&mut buf, 0x0C, self.timestamp);
        write_u32(&mut buf, 0x14, self.major_version);
        write_u32(&mut buf, 0x18, self.minor_version);
        write_u32(&mut buf, 0x1C, 0);
        write_u32(&mut buf, 0x20, 1);
        write_u32(&mut buf, 0x24, self.root_cell);
        write_u32(&mut buf, 0x28, self.length);
        write_u32(&mut buf, 0x2C, 1);
        for (i, unit) in self.path.encode_utf16().take(MAX_HIVE_PATH_UNITS).enumerate() {
            write_u16(&mut buf, PATH_OFFSET + i * 2, unit);
        }
        buf[GUID1_OFFSET..GUID1_OFFSET + 16].copy_from_slice(&self.guid1);
        buf[GUID2_OFFSET..GUID2_OFFSET + 16].copy_from_slice(&self.guid2);
        let checksum = header_checksum(&buf);
        write_u32(&mut buf, CHECKSUM_OFFSET, checksum);
        buf
    }

    /// Parse and validate a header.
    ///
    /// Rejects a bad signature, a bad checksum, a major version other than 1
    /// and mismatched sequence numbers (a pending log replay).
    pub fn from_bytes(bytes: &[u8; HIVE_HEADER_SIZE]) -> HiveResult<Self> {
        let signature = read_u32(bytes, 0);
        if signature != HIVE_SIGNATURE {
            return Err(HiveError::InvalidSignature {
                structure: "regf",
                offset: 0,
                found: signature.to_le_bytes(),
            });
        }

        let stored = read_u32(bytes, CHECKSUM_OFFSET);
        let computed = header_checksum(bytes);
        if stored != computed {
            return Err(HiveError::ChecksumMismatch { stored, computed });
        }

        let sequence1 = read_u32(bytes, 0x04);
        let sequence2 = read_u32(bytes, 0x08);
        if sequence1 != sequence2 {
            return Err(HiveError::PendingLogReplay {
                primary: sequence1,
                secondary: sequence2,
            });
        }

        let major_version = read_u32(bytes, 0x14);
        let minor_version = read_u32(bytes, 0x18);
        if major_version != 1 {
            return Err(HiveError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        let units: Vec<u16> = bytes[PATH_OFFSET..PATH_END]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();

        let mut guid1 = [0u8; 16];
        guid1.copy_from_slice(&bytes[GUID1_OFFSET..GUID1_OFFSET + 16]);
        let mut guid2 = [0u8; 16];
        guid2.copy_from_slice(&bytes[GUID2_OFFSET..GUID2_OFFSET + 16]);

        Ok(Self {
            sequence1,
            sequence2,
            timestamp: read_u64(bytes, 0x0C),
            major_version,
            minor_version,
            root_cell: read_u32(bytes, 0x24),
            length: read_u32(bytes, 0x28),
            path: String::from_utf16_lossy(&units),
            guid1,
            guid2,
        })
    }

    /// Record a structural change: bump both sequence numbers and the timestamp.
    pub fn touch(&mut self) {
        self.sequence1 = self.sequence1.wrapping_add(1);
        self.sequence2 = self.sequence1;
        self.timestamp = filetime_now();
    }

    /// Last written time as a calendar value.
    pub fn last_written(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.timestamp)
    }
}

/// Fixed-size header at the start of every bin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinHeader {
    /// Offset of this bin within the data area
    pub file_offset: u32,
    /// Size of the bin including this header
    pub bin_size: u32,
    /// FILETIME written when the bin was created
    pub timestamp: u64,
}

impl BinHeader {
    /// Create a new header with the given placement
    pub fn new(file_offset: u32, bin_size: u32) -> Self {
        Self { file_offset, bin_size, timestamp: filetime_now() }
    }

    /// Serialize header to bytes for writing
    pub fn to_bytes(&self) -> [u8; BIN_HEADER_SIZE] {
        let mut buf = [0u8; BIN_HEADER_SIZE];
        write_u32(&mut buf, 0x00, BIN_SIGNATURE);
        write_u32(&mut buf, 0x04, self.file_offset);
        write_u32(&mut buf, 0x08, self.bin_size);
        write_u64(&mut buf, 0x14, self.timestamp);
        buf
    }

    /// Parse header from bytes; `position` is where it was read, for error context
    pub fn from_bytes(bytes: &[u8; BIN_HEADER_SIZE], position: u64) -> HiveResult<Self> {
        let signature = read_u32(bytes, 0);
        if signature != BIN_SIGNATURE {
            return Err(HiveError::InvalidSignature {
                structure: "hbin",
                offset: position,
                found: signature.to_le_bytes(),
            });
        }
        let header = Self {
            file_offset: read_u32(bytes, 0x04),
            bin_size: read_u32(bytes, 0x08),
            timestamp: read_u64(bytes, 0x14),
        };
        if header.bin_size == 0 || header.bin_size % BIN_ALIGNMENT != 0 {
            return Err(HiveError::corrupt(
                header.file_offset,
                format!(
                    "bin size {} is not a non-zero multiple of {}",
                    header.bin_size, BIN_ALIGNMENT
                ),
            ));
        }
        Ok(header)
    }

    /// True when `index` falls inside `[file_offset, file_offset + bin_size)`.
    pub fn contains(&self, index: u32) -> bool {
        index >= self.file_offset && u64::from(index) < self.end()
    }

    /// One past the last data-area offset covered by this bin.
    pub fn end(&self) -> u64 {
        u64::from(self.file_offset) + u64::from(self.bin_size)
    }

    /// Absolute stream position of the bin header.
    pub fn stream_position(&self) -> u64 {
        DATA_START + u64::from(self.file_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hive_header_roundtrip() {
        let mut header = HiveHeader::new(5, "\\REGISTRY\\MACHINE\\TEST", 8192);
        header.root_cell = 0x20;
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..4], b"regf");
        let parsed = HiveHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let header = HiveHeader::new(5, "", 4096);
        let mut bytes = header.to_bytes();
        bytes[0x28] ^= 0x01;
        assert!(matches!(
            HiveHeader::from_bytes(&bytes),
            Err(HiveError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_sequence_mismatch_is_log_replay() {
        let mut header = HiveHeader::new(5, "", 4096);
        header.sequence2 = header.sequence1 + 1;
        let bytes = header.to_bytes();
        assert!(matches!(
            HiveHeader::from_bytes(&bytes),
            Err(HiveError::PendingLogReplay { primary: 1, secondary: 2 })
        ));
    }

    #[test]
    fn test_bad_signature() {
        let mut bytes = HiveHeader::new(5, "", 4096).to_bytes();
        bytes[0] = b'X';
        let err = HiveHeader::from_bytes(&bytes).unwrap_err();
        assert!(err.is_invalid_format());
    }

    #[test]
    fn test_touch_keeps_sequences_equal() {
        let mut header = HiveHeader::new(5, "", 4096);
        header.touch();
        assert_eq!(header.sequence1, 2);
        assert_eq!(header.sequence1, header.sequence2);
    }

    #[test]
    fn test_bin_header_roundtrip() {
        let header = BinHeader::new(0x3000, 0x2000);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"hbin");
        let parsed = BinHeader::from_bytes(&bytes, 0x4000).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.contains(0x3000));
        assert!(parsed.contains(0x4FFF));
        assert!(!parsed.contains(0x5000));
        assert_eq!(parsed.stream_position(), 0x4000);
    }

    #[test]
    fn test_filetime_conversion() {
        let time = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let ticks = datetime_to_filetime(time);
        assert_eq!(ticks, 132_223_104_000_000_000);
        assert_eq!(filetime_to_datetime(ticks), Some(time));
    }
}
