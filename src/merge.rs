use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use crate::data::data_file::{self, DataFile};
use crate::data::log_record::{self, LogRecord, LogRecordType};
use crate::engine::{Engine, NON_TRANSACTION_SEQ_NO};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::options::Options;

const MERGE_DIR_SUFFIX: &str = "-merge";

fn merge_dir_path(dir_path: &Path) -> PathBuf {
    let name = dir_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let parent = dir_path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{name}{MERGE_DIR_SUFFIX}"))
}

impl Engine {
    /// Compacts the database: rewrites every still-live record into a fresh
    /// sibling `<dir>-merge` directory and emits a hint file, ready to be
    /// swapped in on the next `open`. Serialized by `is_merging`; a merge
    /// already in flight causes this to fail immediately rather than block.
    pub fn merge(&self) -> Result<()> {
        if self.is_merging.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(Error::MergeInProgress);
        }
        let result = self.do_merge();
        self.is_merging.store(false, Ordering::SeqCst);
        result
    }

    fn do_merge(&self) -> Result<()> {
        let stat = self.stat()?;
        if stat.disk_size > 0 {
            let ratio = stat.reclaim_size as f64 / stat.disk_size as f64;
            if ratio < self.options.data_file_merge_ratio {
                return Err(Error::MergeRatioUnreached);
            }
        }

        log::info!(
            "merging {}: reclaim_size={} disk_size={}",
            self.options.dir_path.display(),
            stat.reclaim_size,
            stat.disk_size
        );

        let merge_path = merge_dir_path(&self.options.dir_path);
        if merge_path.is_dir() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        // Rotate the active file so writes arriving during the merge scan
        // land past the watermark and are picked up by the next merge pass.
        let (older_ids, non_merge_file_id) = {
            let mut files = self.files.write();
            files.active.sync()?;
            let retiring_id = files.active.file_id();
            let new_active = DataFile::new(&self.options.dir_path, retiring_id + 1, IoType::StandardFio)?;
            let old_active = std::mem::replace(&mut files.active, new_active);
            files.older.insert(retiring_id, old_active);

            let mut ids: Vec<u32> = files.older.keys().copied().collect();
            ids.sort_unstable();
            (ids, retiring_id + 1)
        };

        let merge_options =
            Options { dir_path: merge_path.clone(), sync_writes: false, ..self.options.clone() };
        let merge_engine = Engine::open(merge_options)?;
        let hint_file = DataFile::new_hint_file(&merge_path)?;

        for id in older_ids {
            let mut offset = 0u64;
            loop {
                let read = {
                    let files = self.files.read();
                    let file = files.older.get(&id).ok_or(Error::DataFileNotFound)?;
                    file.read_log_record(offset)?
                };
                let Some(read) = read else { break };
                let (real_key, _seq) = log_record::parse_log_record_key(&read.record.key);

                if let Some(live_pos) = self.index.get(&real_key)? {
                    if live_pos.file_id == id && live_pos.offset == offset as i64 {
                        let framed = LogRecord {
                            key: log_record::log_record_key_with_seq(&real_key, NON_TRANSACTION_SEQ_NO),
                            value: read.record.value.clone(),
                            record_type: LogRecordType::Normal,
                        };
                        let new_pos = merge_engine.append_log_record(&framed)?;
                        hint_file.write_hint_record(real_key, new_pos)?;
                    }
                }

                offset += read.size;
            }
        }

        hint_file.sync()?;
        merge_engine.sync()?;
        drop(merge_engine);

        let marker = DataFile::new_merge_finished_file(&merge_path)?;
        let record = LogRecord::normal(Vec::new(), non_merge_file_id.to_string().into_bytes());
        marker.write_record(&record)?;
        marker.sync()?;

        log::info!("merge of {} finished, non_merge_file_id={non_merge_file_id}", self.options.dir_path.display());
        Ok(())
    }
}

/// Completes a pending merge swap-in, if a finished merge is waiting next to
/// `dir_path`. Called at the start of every `Engine::open`. A merge
/// directory without a `merge-finished` marker means the process crashed
/// mid-merge; it's discarded and the primary directory stays authoritative.
pub(crate) fn load_merge_files(dir_path: &Path) -> Result<()> {
    let merge_path = merge_dir_path(dir_path);
    if !merge_path.is_dir() {
        return Ok(());
    }

    let mut finished = false;
    let mut names = Vec::new();
    for entry in fs::read_dir(&merge_path).map_err(Error::FailedToReadDatabaseDir)? {
        let entry = entry.map_err(Error::FailedToReadDatabaseDir)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == data_file::MERGE_FINISHED_FILE_NAME {
            finished = true;
        }
        names.push(name);
    }

    if !finished {
        fs::remove_dir_all(&merge_path)?;
        return Ok(());
    }

    let marker = DataFile::new_merge_finished_file(&merge_path)?;
    let non_merge_file_id: u32 = match marker.read_log_record(0)? {
        Some(read) => String::from_utf8_lossy(&read.record.value)
            .trim()
            .parse()
            .map_err(|_| Error::DataDirectoryCorrupted("invalid merge-finished marker".into()))?,
        None => 0,
    };

    for id in load_primary_data_file_ids(dir_path)? {
        if id < non_merge_file_id {
            fs::remove_file(data_file::file_name(dir_path, id))?;
        }
    }

    for name in names {
        if name == data_file::SEQ_NO_FILE_NAME {
            continue;
        }
        fs::rename(merge_path.join(&name), dir_path.join(&name))?;
    }

    fs::remove_dir_all(&merge_path)?;
    Ok(())
}

fn load_primary_data_file_ids(dir_path: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir_path).map_err(Error::FailedToReadDatabaseDir)? {
        let entry = entry.map_err(Error::FailedToReadDatabaseDir)?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = data_file::parse_data_file_id(name) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::IndexType;

    fn test_options(dir: &Path) -> Options {
        Options {
            dir_path: dir.to_path_buf(),
            data_file_size: 4 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.0,
        }
    }

    #[test]
    fn merge_reclaims_overwrites_and_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = test_options(dir.path());
        let disk_size_before_merge;
        {
            let engine = Engine::open(options.clone()).unwrap();
            for i in 0..1000 {
                engine.put(format!("key-{i:04}").as_bytes(), b"original").unwrap();
            }
            // Overwrite half so the first pass leaves real garbage behind.
            for i in 0..500 {
                engine.put(format!("key-{i:04}").as_bytes(), b"overwritten").unwrap();
            }
            disk_size_before_merge = engine.stat().unwrap().disk_size;
            engine.merge().unwrap();

            // The merge writes its output to the sibling `-merge` directory;
            // nothing in the primary directory changes until the next open.
            let merge_path = merge_dir_path(dir.path());
            assert!(merge_path.join(data_file::HINT_FILE_NAME).is_file());
            assert!(merge_path.join(data_file::MERGE_FINISHED_FILE_NAME).is_file());

            engine.close().unwrap();
        }

        let engine = Engine::open(options).unwrap();
        for i in 0..500 {
            assert_eq!(engine.get(format!("key-{i:04}").as_bytes()).unwrap(), b"overwritten");
        }
        for i in 500..1000 {
            assert_eq!(engine.get(format!("key-{i:04}").as_bytes()).unwrap(), b"original");
        }

        // The swap-in moved the hint file into the primary directory and the
        // sibling merge directory is gone.
        assert!(dir.path().join(data_file::HINT_FILE_NAME).is_file());
        assert!(!merge_dir_path(dir.path()).is_dir());
        assert!(engine.stat().unwrap().disk_size < disk_size_before_merge);
    }

    #[test]
    fn merge_below_configured_ratio_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut options = test_options(dir.path());
        options.data_file_merge_ratio = 0.9;
        let engine = Engine::open(options).unwrap();
        engine.put(b"k1", b"v1").unwrap();

        assert!(matches!(engine.merge(), Err(Error::MergeRatioUnreached)));
    }

    #[test]
    fn concurrent_merge_calls_are_serialized() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Engine::open(test_options(dir.path())).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.is_merging.store(true, Ordering::SeqCst);

        assert!(matches!(engine.merge(), Err(Error::MergeInProgress)));
        engine.is_merging.store(false, Ordering::SeqCst);
    }

    #[test]
    fn incomplete_merge_directory_is_discarded_on_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = test_options(dir.path());
        {
            let engine = Engine::open(options.clone()).unwrap();
            engine.put(b"k1", b"v1").unwrap();
            engine.close().unwrap();
        }

        let merge_path = merge_dir_path(dir.path());
        fs::create_dir_all(&merge_path).unwrap();
        fs::write(merge_path.join("000000000.data"), b"garbage").unwrap();

        let engine = Engine::open(options).unwrap();
        assert_eq!(engine.get(b"k1").unwrap(), b"v1");
        assert!(!merge_path.is_dir());
    }
}
