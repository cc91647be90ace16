//! File-backed hive stream with a platform durable sync on flush.
//!
//! Hive mutations are written straight through, so the only durability
//! point is `flush()`. Each platform maps it to the strongest sync it offers.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Ensures data is durably written to persistent storage before returning.
///
/// Platform behaviors:
/// - Linux: fdatasync() - data without metadata
/// - macOS/iOS: fcntl(F_FULLFSYNC) - past the drive's volatile cache
/// - Windows: FlushFileBuffers()
/// - Other: file.sync_data()
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live File borrow.
        let result = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        // Plain fsync on Apple platforms stops at the drive cache.
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live File borrow.
        let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle comes from a live File borrow.
        let result = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        file.sync_data()
    }
}

/// A hive backing stream over a regular file.
#[derive(Debug)]
pub struct DurableFile {
    file: File,
    /// Sync to stable storage on every flush
    durable: bool,
}

impl DurableFile {
    pub fn new(file: File, durable: bool) -> Self {
        Self { file, durable }
    }

    pub fn get_ref(&self) -> &File {
        &self.file
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

impl Read for DurableFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for DurableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.durable {
            durable_sync(&self.file)?;
        }
        Ok(())
    }
}

impl Seek for DurableFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}
