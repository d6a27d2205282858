use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex as StdMutex;

use crate::data::log_record::{self, LogRecord, LogRecordType};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::WriteBatchOptions;

/// A buffered, all-or-nothing group of writes against one `Engine`. Entries
/// are kept in a map keyed by user key, so a later `put`/`delete` on the same
/// key inside one batch replaces the earlier one rather than stacking.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: StdMutex<HashMap<Vec<u8>, LogRecord>>,
}

impl<'a> WriteBatch<'a> {
    pub fn new(engine: &'a Engine, options: WriteBatchOptions) -> Self {
        Self { engine, options, pending: StdMutex::new(HashMap::new()) }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }
        pending.insert(key.to_vec(), LogRecord::normal(key.to_vec(), value.to_vec()));
        Ok(())
    }

    /// Buffers a delete. A key already buffered as a put in this same batch
    /// has its put withdrawn rather than replaced with a tombstone. Failing
    /// that, a key absent from the live index is dropped silently rather
    /// than buffered as a tombstone for something that was never there,
    /// matching the engine's own tombstone-only-when-present semantics.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock().unwrap();
        if matches!(pending.get(key), Some(record) if record.record_type == LogRecordType::Normal) {
            pending.remove(key);
            return Ok(());
        }
        if self.engine.index.get(key)?.is_none() {
            pending.remove(key);
            return Ok(());
        }
        if pending.len() >= self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }
        pending.insert(key.to_vec(), LogRecord::tombstone(key.to_vec()));
        Ok(())
    }

    /// Commits every buffered entry under a single, newly allocated sequence
    /// number. Uncommitted entries are never observable by concurrent
    /// readers; after this returns, all of them are.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return Ok(());
        }

        let _commit_guard = self.engine.batch_commit_lock.lock();
        let seq = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions = Vec::with_capacity(pending.len());
        for record in pending.values() {
            let framed = LogRecord {
                key: log_record::log_record_key_with_seq(&record.key, seq),
                value: record.value.clone(),
                record_type: record.record_type,
            };
            let pos = self.engine.append_log_record(&framed)?;
            positions.push((record.key.clone(), record.record_type, pos));
        }

        let finished = LogRecord::txn_finished(log_record::log_record_key_with_seq(b"", seq));
        self.engine.append_log_record(&finished)?;

        if self.options.sync_writes {
            self.engine.sync()?;
        }

        for (key, record_type, pos) in positions {
            match record_type {
                LogRecordType::Normal => {
                    if let Some(old_pos) = self.engine.index.put(key, pos)? {
                        self.engine.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
                    }
                }
                LogRecordType::Deleted => {
                    self.engine.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
                    let (old_pos, _) = self.engine.index.delete(&key)?;
                    if let Some(old_pos) = old_pos {
                        self.engine.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
                    }
                }
                LogRecordType::TxnFinished => unreachable!("sentinel is not buffered"),
            }
        }

        pending.clear();
        Ok(())
    }
}
