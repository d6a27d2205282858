use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use parking_lot::Mutex;

use super::IoManager;
use crate::error::Result;

/// Standard-syscall file backend: reads and writes go through the OS page
/// cache via `std::fs::File`, serialized behind a mutex since `read` needs to
/// seek before it reads and the handle is shared across callers.
pub struct StandardFileIo {
    file: Mutex<File>,
}

impl StandardFileIo {
    pub fn new(file_name: impl AsRef<std::path::Path>) -> Result<Self> {
        let file =
            OpenOptions::new().create(true).read(true).write(true).open(file_name)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl IoManager for StandardFileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        Ok(self.file.lock().sync_all()?)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        Ok(self.file.lock().set_len(len)?)
    }
}
