use std::path::Path;

use super::btree::BTreeIndexIterator;
use super::{IndexIterator, Indexer};
use crate::data::LogRecordPos;
use crate::error::{Error, Result};

const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const BUCKET_NAME: &[u8] = b"bitcask-index";

/// Persistent on-disk index, stored inside the data directory as its own
/// `jammdb` file. Durable index state means log-replay can be skipped at
/// startup entirely: the engine only needs to resume `seq_no` from the
/// seq-no file.
pub struct BPlusTreeIndexer {
    db: jammdb::DB,
}

impl BPlusTreeIndexer {
    pub fn new(dir_path: &Path) -> Result<Self> {
        let db = jammdb::DB::open(dir_path.join(BPTREE_INDEX_FILE_NAME)).map_err(to_err)?;
        {
            let tx = db.tx(true).map_err(to_err)?;
            tx.get_or_create_bucket(BUCKET_NAME).map_err(to_err)?;
            tx.commit().map_err(to_err)?;
        }
        Ok(Self { db })
    }
}

impl Indexer for BPlusTreeIndexer {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let old = self.get(&key)?;
        let tx = self.db.tx(true).map_err(to_err)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME).map_err(to_err)?;
        bucket.put(key, pos.encode()).map_err(to_err)?;
        tx.commit().map_err(to_err)?;
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let tx = self.db.tx(false).map_err(to_err)?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(to_err)?;
        Ok(bucket.get(key).and_then(|data| LogRecordPos::decode(data.kv().value())))
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let old = self.get(key)?;
        if old.is_none() {
            return Ok((None, false));
        }
        let tx = self.db.tx(true).map_err(to_err)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME).map_err(to_err)?;
        bucket.delete(key).map_err(to_err)?;
        tx.commit().map_err(to_err)?;
        Ok((old, true))
    }

    fn size(&self) -> Result<usize> {
        let tx = self.db.tx(false).map_err(to_err)?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(to_err)?;
        Ok(bucket.cursor().count())
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let tx = self.db.tx(false).map_err(to_err)?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(to_err)?;
        let mut items: Vec<(Vec<u8>, LogRecordPos)> = bucket
            .cursor()
            .filter_map(|data| {
                let kv = data.kv();
                LogRecordPos::decode(kv.value()).map(|pos| (kv.key().to_vec(), pos))
            })
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        if reverse {
            items.reverse();
        }
        Ok(Box::new(BTreeIndexIterator::from_items(items, reverse)))
    }
}

fn to_err(_: jammdb::Error) -> Error {
    Error::IndexUpdateFailed
}
