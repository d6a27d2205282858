use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fs4::FileExt;
use parking_lot::{Mutex, RwLock};

use crate::data::data_file::{self, DataFile, LOCK_FILE_NAME};
use crate::data::log_record::{self, LogRecord, LogRecordPos, LogRecordType, TransactionRecord};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::index::{self, Indexer};
use crate::options::{IndexType, Options};

/// Reserved sequence number for writes made outside a write batch.
pub(crate) const NON_TRANSACTION_SEQ_NO: u64 = 0;
const INITIAL_FILE_ID: u32 = 0;

/// Point-in-time counters describing an open engine.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub key_num: usize,
    pub data_file_num: usize,
    pub reclaim_size: u64,
    pub disk_size: u64,
}

pub(crate) struct EngineFiles {
    pub(crate) active: DataFile,
    pub(crate) older: HashMap<u32, DataFile>,
}

/// An open Bitcask database: an append-only log directory plus the
/// in-memory index that points into it.
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) files: RwLock<EngineFiles>,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) seq_no: AtomicU64,
    pub(crate) is_merging: AtomicBool,
    pub(crate) reclaim_size: AtomicU64,
    bytes_since_sync: AtomicU64,
    pub(crate) batch_commit_lock: Mutex<()>,
    lock_file: std::fs::File,
}

impl Engine {
    /// Opens (creating if absent) a database rooted at `options.dir_path`.
    pub fn open(options: Options) -> Result<Self> {
        options.check()?;
        log::info!("opening database at {}", options.dir_path.display());

        let dir_path = options.dir_path.clone();
        if !dir_path.is_dir() {
            std::fs::create_dir_all(&dir_path).map_err(Error::FailedToCreateDatabaseDir)?;
        }

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir_path.join(LOCK_FILE_NAME))?;
        lock_file.try_lock_exclusive().map_err(|_| Error::DatabaseInUse)?;

        crate::merge::load_merge_files(&dir_path)?;

        let mut file_ids = load_data_file_ids(&dir_path)?;
        let io_type = if options.mmap_at_startup { IoType::MemoryMap } else { IoType::StandardFio };

        let active_file_id = file_ids.pop().unwrap_or(INITIAL_FILE_ID);
        let mut older = HashMap::new();
        for id in file_ids {
            older.insert(id, DataFile::new(&dir_path, id, io_type)?);
        }
        let active = DataFile::new(&dir_path, active_file_id, io_type)?;

        let index = index::new_indexer(options.index_type, &dir_path)?;

        let mut reclaim_size: u64 = 0;
        let (seq_no, active_valid_len) = if options.index_type == IndexType::BPlusTree {
            (load_seq_no(&dir_path)?, None)
        } else {
            let watermark = non_merge_file_id(&dir_path)?;
            load_index_from_hint_file(&dir_path, index.as_ref())?;
            let (seq_no, active_valid_len) =
                load_index_from_data_files(&active, &older, index.as_ref(), watermark, &mut reclaim_size)?;
            (seq_no, Some(active_valid_len))
        };

        let mut files = EngineFiles { active, older };
        if options.mmap_at_startup {
            files.active.set_io_manager(&dir_path, IoType::StandardFio)?;
            for df in files.older.values_mut() {
                df.set_io_manager(&dir_path, IoType::StandardFio)?;
            }
        }

        // A crash can leave a trailing record half-written; the replay above
        // stopped at the last good boundary, so bring the active file's
        // length back in line with what was actually indexed.
        if let Some(valid_len) = active_valid_len {
            let current_len = files.active.write_offset();
            if valid_len < current_len {
                log::warn!(
                    "truncating active file in {} from {current_len} to {valid_len} bytes: incomplete trailing record",
                    dir_path.display()
                );
                files.active.truncate(valid_len)?;
            }
        }

        log::info!("opened database at {}, resumed seq_no={seq_no}", dir_path.display());

        Ok(Self {
            options,
            files: RwLock::new(files),
            index,
            seq_no: AtomicU64::new(seq_no),
            is_merging: AtomicBool::new(false),
            reclaim_size: AtomicU64::new(reclaim_size),
            bytes_since_sync: AtomicU64::new(0),
            batch_commit_lock: Mutex::new(()),
            lock_file,
        })
    }

    /// Writes `key -> value`. Rejects an empty key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord::normal(
            log_record::log_record_key_with_seq(key, NON_TRANSACTION_SEQ_NO),
            value.to_vec(),
        );
        let pos = self.append_log_record(&record)?;
        if let Some(old_pos) = self.index.put(key.to_vec(), pos)? {
            self.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Removes `key`. Tombstone-only-when-present: a no-op, returning `Ok`
    /// with no log write, when the key is already absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord::tombstone(log_record::log_record_key_with_seq(
            key,
            NON_TRANSACTION_SEQ_NO,
        ));
        let pos = self.append_log_record(&record)?;
        self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);

        let (old_pos, existed) = self.index.delete(key)?;
        if !existed {
            return Err(Error::IndexUpdateFailed);
        }
        if let Some(old_pos) = old_pos {
            self.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Looks up `key`. `KeyNotFound` covers both an absent key and one whose
    /// latest record is a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(key)?.ok_or(Error::KeyNotFound)?;
        self.get_value_by_position(&pos)
    }

    pub(crate) fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Vec<u8>> {
        let files = self.files.read();
        let read = if pos.file_id == files.active.file_id() {
            files.active.read_log_record(pos.offset as u64)?
        } else {
            let df = files.older.get(&pos.file_id).ok_or(Error::DataFileNotFound)?;
            df.read_log_record(pos.offset as u64)?
        };
        let Some(read) = read else {
            return Err(Error::DataFileNotFound);
        };
        if read.record.record_type == LogRecordType::Deleted {
            return Err(Error::KeyNotFound);
        }
        Ok(read.record.value)
    }

    /// Iterates the index in forward order, fetching each value and invoking
    /// `f(key, value)`; stops early the first time `f` returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let mut it = self.index.iterator(false)?;
        it.rewind();
        while let Some((key, pos)) = it.next() {
            let value = self.get_value_by_position(&pos)?;
            if !f(&key, &value)? {
                break;
            }
        }
        it.close();
        Ok(())
    }

    /// Returns every live key, in forward order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut it = self.index.iterator(false)?;
        it.rewind();
        let mut keys = Vec::new();
        while let Some((key, _)) = it.next() {
            keys.push(key);
        }
        it.close();
        Ok(keys)
    }

    /// Fsyncs the active file.
    pub fn sync(&self) -> Result<()> {
        self.files.read().active.sync()
    }

    pub fn stat(&self) -> Result<Stat> {
        let files = self.files.read();
        let mut disk_size = files.active.write_offset();
        for df in files.older.values() {
            disk_size += df.write_offset();
        }
        Ok(Stat {
            key_num: self.index.size()?,
            data_file_num: files.older.len() + 1,
            reclaim_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size,
        })
    }

    /// Persists `seq_no`, syncs and closes every data file. Safe to call more
    /// than once; the directory lock is released when the engine is dropped.
    pub fn close(&self) -> Result<()> {
        if !self.options.dir_path.is_dir() {
            return Ok(());
        }
        log::info!("closing database at {}", self.options.dir_path.display());

        let seq_no_file = DataFile::new_seq_no_file(&self.options.dir_path)?;
        let seq_no = self.seq_no.load(Ordering::SeqCst);
        let record = LogRecord::normal(Vec::new(), seq_no.to_string().into_bytes());
        seq_no_file.write_record(&record)?;
        seq_no_file.sync()?;
        seq_no_file.close()?;

        let files = self.files.read();
        files.active.sync()?;
        files.active.close()?;
        for df in files.older.values() {
            df.close()?;
        }
        Ok(())
    }

    /// Appends `record` to the active file under the write lock, rotating
    /// into a fresh active file first if it would exceed `data_file_size`.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let dir_path = self.options.dir_path.clone();
        let encoded = record.encode();
        let size = encoded.len() as u64;

        let mut files = self.files.write();

        if files.active.write_offset() + size > self.options.data_file_size {
            files.active.sync()?;
            let retiring_id = files.active.file_id();
            let new_active = DataFile::new(&dir_path, retiring_id + 1, IoType::StandardFio)?;
            let old_active = std::mem::replace(&mut files.active, new_active);
            files.older.insert(retiring_id, old_active);
        }

        let write_offset = files.active.write_offset();
        files.active.write(&encoded)?;

        let bytes_since_sync = self.bytes_since_sync.fetch_add(size, Ordering::SeqCst) + size;
        let should_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0 && bytes_since_sync >= self.options.bytes_per_sync);
        if should_sync {
            files.active.sync()?;
            self.bytes_since_sync.store(0, Ordering::SeqCst);
        }

        Ok(LogRecordPos { file_id: files.active.file_id(), offset: write_offset as i64, size: size as u32 })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("failed to close database at {}: {err}", self.options.dir_path.display());
        }
    }
}

/// Scans `dir_path` for `*.data` files and returns their ids, ascending.
fn load_data_file_ids(dir_path: &Path) -> Result<Vec<u32>> {
    let entries = std::fs::read_dir(dir_path).map_err(Error::FailedToReadDatabaseDir)?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(Error::FailedToReadDatabaseDir)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = data_file::parse_data_file_id(name) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Reads the `merge-finished` marker, if present, returning the id below
/// which `.data` files are already covered by the hint file. Absent marker
/// means no merge has completed yet: everything must be replayed.
fn non_merge_file_id(dir_path: &Path) -> Result<u32> {
    let path = dir_path.join(data_file::MERGE_FINISHED_FILE_NAME);
    if !path.is_file() {
        return Ok(0);
    }
    let file = DataFile::new_merge_finished_file(dir_path)?;
    let Some(read) = file.read_log_record(0)? else {
        return Ok(0);
    };
    let text = String::from_utf8_lossy(&read.record.value);
    text.trim().parse().map_err(|_| Error::DataDirectoryCorrupted(format!("invalid merge-finished marker: {text}")))
}

fn load_index_from_hint_file(dir_path: &Path, index: &dyn Indexer) -> Result<()> {
    let path = dir_path.join(data_file::HINT_FILE_NAME);
    if !path.is_file() {
        return Ok(());
    }
    let file = DataFile::new_hint_file(dir_path)?;
    let mut offset = 0u64;
    while let Some(read) = file.read_log_record(offset)? {
        if let Some(pos) = LogRecordPos::decode(&read.record.value) {
            index.put(read.record.key, pos)?;
        }
        offset += read.size;
    }
    Ok(())
}

/// Replays every `.data` file whose id is >= `watermark` into `index`,
/// staging records from open write batches until their `TxnFinished`
/// sentinel appears. Returns the highest sequence number observed (which
/// becomes the engine's resumed `seq_no`) and the number of valid bytes
/// found in the active file, so a trailing incomplete record can be
/// truncated away.
fn load_index_from_data_files(
    active: &DataFile,
    older: &HashMap<u32, DataFile>,
    index: &dyn Indexer,
    watermark: u32,
    reclaim_size: &mut u64,
) -> Result<(u64, u64)> {
    let mut ids: Vec<u32> = older.keys().copied().filter(|id| *id >= watermark).collect();
    if active.file_id() >= watermark {
        ids.push(active.file_id());
    }
    ids.sort_unstable();

    let mut max_seq = NON_TRANSACTION_SEQ_NO;
    let mut active_valid_len = active.write_offset();
    let mut pending: HashMap<u64, Vec<TransactionRecord>> = HashMap::new();

    for id in ids {
        let file = if id == active.file_id() { active } else { &older[&id] };
        let mut offset = 0u64;
        while let Some(read) = file.read_log_record(offset)? {
            let pos = LogRecordPos { file_id: id, offset: offset as i64, size: read.size as u32 };
            let (real_key, seq) = log_record::parse_log_record_key(&read.record.key);
            max_seq = max_seq.max(seq);

            if seq == NON_TRANSACTION_SEQ_NO {
                update_index(index, real_key, read.record.record_type, pos, reclaim_size)?;
            } else if read.record.record_type == LogRecordType::TxnFinished {
                if let Some(staged) = pending.remove(&seq) {
                    for txn in staged {
                        let (k, _) = log_record::parse_log_record_key(&txn.record.key);
                        update_index(index, k, txn.record.record_type, txn.pos, reclaim_size)?;
                    }
                }
            } else {
                pending.entry(seq).or_default().push(TransactionRecord {
                    record: LogRecord { key: read.record.key.clone(), value: read.record.value.clone(), record_type: read.record.record_type },
                    pos,
                });
            }

            offset += read.size;
        }

        if id == active.file_id() {
            active_valid_len = offset;
        }
    }

    Ok((max_seq, active_valid_len))
}

fn update_index(
    index: &dyn Indexer,
    key: Vec<u8>,
    record_type: LogRecordType,
    pos: LogRecordPos,
    reclaim_size: &mut u64,
) -> Result<()> {
    match record_type {
        LogRecordType::Normal => {
            if let Some(old_pos) = index.put(key, pos)? {
                *reclaim_size += old_pos.size as u64;
            }
        }
        LogRecordType::Deleted => {
            *reclaim_size += pos.size as u64;
            let (old_pos, _) = index.delete(&key)?;
            if let Some(old_pos) = old_pos {
                *reclaim_size += old_pos.size as u64;
            }
        }
        LogRecordType::TxnFinished => {}
    }
    Ok(())
}

fn load_seq_no(dir_path: &Path) -> Result<u64> {
    let path = dir_path.join(data_file::SEQ_NO_FILE_NAME);
    if !path.is_file() {
        return Ok(NON_TRANSACTION_SEQ_NO);
    }
    let file = DataFile::new_seq_no_file(dir_path)?;
    let seq_no = match file.read_log_record(0)? {
        Some(read) => String::from_utf8_lossy(&read.record.value)
            .trim()
            .parse()
            .map_err(|_| Error::DataDirectoryCorrupted("invalid seq-no file".into()))?,
        None => NON_TRANSACTION_SEQ_NO,
    };
    std::fs::remove_file(&path)?;
    Ok(seq_no)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn test_options(dir: &Path, index_type: IndexType) -> Options {
        Options {
            dir_path: dir.to_path_buf(),
            data_file_size: 64 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }

    #[test_case(IndexType::BTree; "btree")]
    #[test_case(IndexType::Art; "art")]
    #[test_case(IndexType::BPlusTree; "bptree")]
    fn put_get_then_delete(index_type: IndexType) {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), index_type)).unwrap();

        engine.put(b"k1", b"v1").unwrap();
        assert_eq!(engine.get(b"k1").unwrap(), b"v1");

        engine.delete(b"k1").unwrap();
        assert!(matches!(engine.get(b"k1"), Err(Error::KeyNotFound)));
    }

    #[test_case(IndexType::BTree; "btree")]
    #[test_case(IndexType::Art; "art")]
    #[test_case(IndexType::BPlusTree; "bptree")]
    fn empty_key_is_rejected(index_type: IndexType) {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), index_type)).unwrap();
        assert!(matches!(engine.put(b"", b"v"), Err(Error::KeyIsEmpty)));
        assert!(matches!(engine.get(b""), Err(Error::KeyIsEmpty)));
        assert!(matches!(engine.delete(b""), Err(Error::KeyIsEmpty)));
    }

    #[test]
    fn delete_of_absent_key_is_a_silent_no_op() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();
        engine.delete(b"never-written").unwrap();
        assert_eq!(engine.stat().unwrap().data_file_num, 1);
    }

    #[test_case(IndexType::BTree; "btree")]
    #[test_case(IndexType::Art; "art")]
    #[test_case(IndexType::BPlusTree; "bptree")]
    fn reopen_after_close_restores_state(index_type: IndexType) {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let engine = Engine::open(test_options(dir.path(), index_type)).unwrap();
            engine.put(b"k1", b"v1").unwrap();
            engine.put(b"k2", b"v2").unwrap();
            engine.delete(b"k2").unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(test_options(dir.path(), index_type)).unwrap();
        assert_eq!(engine.get(b"k1").unwrap(), b"v1");
        assert!(matches!(engine.get(b"k2"), Err(Error::KeyNotFound)));
        assert_eq!(engine.list_keys().unwrap(), vec![b"k1".to_vec()]);
    }

    #[test]
    fn second_open_of_same_directory_fails_with_database_in_use() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();

        assert!(matches!(
            Engine::open(test_options(dir.path(), IndexType::BTree)),
            Err(Error::DatabaseInUse)
        ));

        engine.close().unwrap();
        drop(engine);
        assert!(Engine::open(test_options(dir.path(), IndexType::BTree)).is_ok());
    }

    #[test]
    fn rotates_active_file_past_the_size_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut options = test_options(dir.path(), IndexType::BTree);
        options.data_file_size = 128;
        let engine = Engine::open(options).unwrap();

        for i in 0..50 {
            engine.put(format!("key-{i:04}").as_bytes(), &[b'x'; 32]).unwrap();
        }

        assert!(engine.stat().unwrap().data_file_num > 1);
        for i in 0..50 {
            assert_eq!(engine.get(format!("key-{i:04}").as_bytes()).unwrap(), vec![b'x'; 32]);
        }
    }

    #[test]
    fn reclaim_size_accounts_for_overwrites_and_deletes() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();

        let value = vec![b'x'; 120];
        for i in 0..200 {
            engine.put(format!("key-{i:04}").as_bytes(), &value).unwrap();
        }
        let before_delete = engine.stat().unwrap().reclaim_size;

        for i in 0..200 {
            engine.delete(format!("key-{i:04}").as_bytes()).unwrap();
        }
        let after_delete = engine.stat().unwrap();

        // Every put's record plus every tombstone became reclaimable.
        assert!(after_delete.reclaim_size > before_delete);
        assert_eq!(after_delete.key_num, 0);
    }

    #[test]
    fn interrupted_trailing_write_is_dropped_on_recovery() {
        let dir = tempfile::TempDir::new().unwrap();
        let data_file_path = data_file::file_name(dir.path(), 0);
        {
            let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();
            for i in 0..9 {
                engine.put(format!("k{i}").as_bytes(), b"v").unwrap();
            }
            engine.close().unwrap();
        }

        // With the engine (and its directory lock) fully dropped, simulate a
        // crash mid-append of a 10th record by appending only half its bytes
        // directly to the data file.
        let tenth = LogRecord::normal(b"k9".to_vec(), b"v9-longer-value".to_vec()).encode();
        let half = tenth.len() / 2;
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&data_file_path).unwrap();
            file.write_all(&tenth[..half]).unwrap();
        }

        let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();
        for i in 0..9 {
            assert_eq!(engine.get(format!("k{i}").as_bytes()).unwrap(), b"v");
        }
        assert!(matches!(engine.get(b"k9"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn fold_stops_early_when_callback_returns_false() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();
        for key in ["a", "b", "c"] {
            engine.put(key.as_bytes(), b"v").unwrap();
        }

        let mut visited = Vec::new();
        engine
            .fold(|k, _v| {
                visited.push(k.to_vec());
                Ok(visited.len() < 2)
            })
            .unwrap();
        assert_eq!(visited, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn sync_does_not_error_on_an_empty_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();
        engine.sync().unwrap();
    }

    /// Growing key/value sizes with randomized bytes at each step, so a
    /// fixed-length header bug (varint boundary, CRC-over-wrong-range) would
    /// surface at some size rather than being masked by a single fixture.
    #[test]
    fn point_ops_across_growing_random_sizes() {
        use rand::RngCore;

        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path(), IndexType::BTree)).unwrap();
        let mut rng = rand::thread_rng();

        for size in (1..=16).map(|i| 1usize << i) {
            let mut key = vec![0u8; size];
            let mut value = vec![0u8; size];
            rng.fill_bytes(&mut key);
            rng.fill_bytes(&mut value);

            assert!(matches!(engine.get(&key), Err(Error::KeyNotFound)));
            engine.put(&key, &value).unwrap();
            assert_eq!(engine.get(&key).unwrap(), value);
            engine.delete(&key).unwrap();
            assert!(matches!(engine.get(&key), Err(Error::KeyNotFound)));
        }
    }
}
