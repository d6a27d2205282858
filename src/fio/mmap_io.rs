use std::fs::File;

use memmap2::{Mmap, MmapOptions};

use super::IoManager;
use crate::error::Result;

/// Read-only memory-mapped file backend, used while replaying the log at
/// startup. Write and sync are not supported and always fail.
pub struct ReadOnlyMmap {
    /// `None` for an empty file: `memmap2` cannot map a zero-length file.
    mmap: Option<Mmap>,
    len: u64,
}

impl ReadOnlyMmap {
    pub fn new(file_name: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = File::open(file_name)?;
        let len = file.metadata()?.len();
        let mmap = if len == 0 { None } else { Some(unsafe { MmapOptions::new().map(&file)? }) };
        Ok(Self { mmap, len })
    }
}

impl IoManager for ReadOnlyMmap {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let Some(mmap) = &self.mmap else {
            return Err(eof_error());
        };
        let offset = offset as usize;
        if offset >= mmap.len() {
            return Err(eof_error());
        }
        let end = (offset + buf.len()).min(mmap.len());
        let n = end - offset;
        buf[..n].copy_from_slice(&mmap[offset..end]);
        if n < buf.len() {
            return Err(eof_error());
        }
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(unsupported_error())
    }

    fn sync(&self) -> Result<()> {
        Err(unsupported_error())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn set_len(&self, _len: u64) -> Result<()> {
        Err(unsupported_error())
    }
}

fn eof_error() -> crate::error::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read from memory map").into()
}

fn unsupported_error() -> crate::error::Error {
    std::io::Error::new(std::io::ErrorKind::Unsupported, "read-only memory map").into()
}
