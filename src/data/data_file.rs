use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::log_record::{self, LogRecord, LogRecordPos, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::fio::{self, IoManager, IoType};

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";
pub const LOCK_FILE_NAME: &str = "flock";

/// One record read back from a data file, along with its total on-disk size.
pub struct ReadLogRecord {
    pub record: LogRecord,
    pub size: u64,
}

/// A numbered, append-only segment of the log, or one of the single-record
/// auxiliary files (hint index, merge-finished marker, seq-no file) that
/// reuse the same record framing.
pub struct DataFile {
    file_id: u32,
    write_offset: RwLock<u64>,
    io_manager: Box<dyn IoManager>,
}

impl DataFile {
    pub fn new(dir_path: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        let io_manager = fio::new_io_manager(file_name(dir_path, file_id), io_type)?;
        let write_offset = io_manager.size()?;
        Ok(Self { file_id, write_offset: RwLock::new(write_offset), io_manager })
    }

    pub fn new_hint_file(dir_path: &Path) -> Result<Self> {
        Self::open_aux(dir_path.join(HINT_FILE_NAME))
    }

    pub fn new_merge_finished_file(dir_path: &Path) -> Result<Self> {
        Self::open_aux(dir_path.join(MERGE_FINISHED_FILE_NAME))
    }

    pub fn new_seq_no_file(dir_path: &Path) -> Result<Self> {
        Self::open_aux(dir_path.join(SEQ_NO_FILE_NAME))
    }

    fn open_aux(path: PathBuf) -> Result<Self> {
        let io_manager = fio::new_io_manager(path, IoType::StandardFio)?;
        let write_offset = io_manager.size()?;
        Ok(Self { file_id: 0, write_offset: RwLock::new(write_offset), io_manager })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_offset(&self) -> u64 {
        *self.write_offset.read()
    }

    /// Reads and decodes the record at `offset`. Returns `Ok(None)` at a
    /// clean end-of-file boundary, whether that's the exact end of the file
    /// or a trailing record left incomplete by an interrupted write.
    pub fn read_log_record(&self, offset: u64) -> Result<Option<ReadLogRecord>> {
        let file_size = self.io_manager.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        let header_cap = std::cmp::min(MAX_LOG_RECORD_HEADER_SIZE as u64, file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_cap];
        self.io_manager.read(&mut header_buf, offset)?;

        let Some((header, header_len)) = log_record::decode_header(&header_buf)? else {
            return Ok(None);
        };

        let body_len = header.key_size + header.value_size;
        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            match self.io_manager.read(&mut body, offset + header_len as u64) {
                Ok(_) => {}
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        let key = body[..header.key_size].to_vec();
        let value = body[header.key_size..].to_vec();

        let crc = log_record::crc_of(header.record_type, &key, &value);
        if crc != header.crc {
            return Err(Error::CorruptedLogRecord);
        }

        let record = LogRecord { key, value, record_type: header.record_type };
        let size = (header_len + body_len) as u64;
        Ok(Some(ReadLogRecord { record, size }))
    }

    /// Appends raw bytes and advances `write_offset`. Callers hold the
    /// engine's write lock while rotating/appending to the active file.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let n = self.io_manager.write(buf)?;
        *self.write_offset.write() += n as u64;
        Ok(n)
    }

    pub fn write_record(&self, record: &LogRecord) -> Result<usize> {
        self.write(&record.encode())
    }

    /// Writes one `user_key -> encoded(pos)` entry to a hint file.
    pub fn write_hint_record(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<()> {
        let record = LogRecord { key, value: pos.encode(), record_type: LogRecordType::Normal };
        self.write_record(&record)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io_manager.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.io_manager.close()
    }

    pub fn set_io_manager(&mut self, dir_path: &Path, io_type: IoType) -> Result<()> {
        self.io_manager = fio::new_io_manager(file_name(dir_path, self.file_id), io_type)?;
        Ok(())
    }

    /// Discards everything past `len`. Used during recovery to drop a
    /// trailing record an interrupted write never finished.
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.io_manager.set_len(len)?;
        *self.write_offset.write() = len;
        Ok(())
    }
}

pub fn file_name(dir_path: &Path, file_id: u32) -> PathBuf {
    dir_path.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

/// Parses a `<9-digit-id>.data` file name into its numeric id.
pub fn parse_data_file_id(name: &str) -> Option<u32> {
    name.strip_suffix(DATA_FILE_SUFFIX)?.parse().ok()
}
