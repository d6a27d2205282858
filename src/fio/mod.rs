mod file_io;
mod mmap_io;

pub use file_io::StandardFileIo;
pub use mmap_io::ReadOnlyMmap;

use crate::error::Result;

/// Which concrete `IoManager` backend a `DataFile` should open with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    StandardFio,
    MemoryMap,
}

/// Abstracts file access so a `DataFile` doesn't need to know whether it is
/// reading through standard syscalls or a read-only memory map.
pub trait IoManager: Sync + Send {
    /// Reads into `buf` starting at `offset`, filling it completely or
    /// failing with an `UnexpectedEof` io error.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;
    fn write(&self, buf: &[u8]) -> Result<usize>;
    fn sync(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn size(&self) -> Result<u64>;
    /// Truncates the underlying file. Used only during recovery, to discard
    /// a trailing record left incomplete by an interrupted write.
    fn set_len(&self, len: u64) -> Result<()>;
}

pub fn new_io_manager(
    file_name: impl AsRef<std::path::Path>,
    io_type: IoType,
) -> Result<Box<dyn IoManager>> {
    match io_type {
        IoType::StandardFio => Ok(Box::new(StandardFileIo::new(file_name)?)),
        IoType::MemoryMap => Ok(Box::new(ReadOnlyMmap::new(file_name)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_the_requested_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        let standard = new_io_manager(&path, IoType::StandardFio).unwrap();
        assert_eq!(standard.size().unwrap(), 3);
        standard.write(b"def").unwrap();
        assert_eq!(standard.size().unwrap(), 6);

        let mmapped = new_io_manager(&path, IoType::MemoryMap).unwrap();
        assert_eq!(mmapped.size().unwrap(), 6);
        assert!(mmapped.write(b"x").is_err());
    }
}
