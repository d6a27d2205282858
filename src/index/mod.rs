pub mod art;
pub mod bptree;
pub mod btree;

use std::path::Path;

use crate::data::LogRecordPos;
use crate::error::Result;
use crate::options::IndexType;

/// Ordered map from a user-visible key to its current `LogRecordPos`. Backed
/// by one of three interchangeable implementations; the engine relies on the
/// backend's own internal locking and adds none of its own.
pub trait Indexer: Sync + Send {
    /// Inserts or replaces `key`, returning the position it replaced.
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>>;
    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;
    /// Removes `key`, reporting both its prior position and whether it was present.
    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)>;
    fn size(&self) -> Result<usize>;
    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>>;
}

/// Snapshot iterator over an `Indexer`'s contents in lexicographic (or
/// reverse) key order.
pub trait IndexIterator {
    fn rewind(&mut self);
    /// Positions the cursor at the first key >= (or, reversed, <=) `key`.
    fn seek(&mut self, key: &[u8]);
    fn next(&mut self) -> Option<(Vec<u8>, LogRecordPos)>;
    fn valid(&self) -> bool;
    fn close(&mut self);
}

pub fn new_indexer(index_type: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(btree::BTreeIndexer::new())),
        IndexType::Art => Ok(Box::new(art::AdaptiveRadixTreeIndexer::new())),
        IndexType::BPlusTree => Ok(Box::new(bptree::BPlusTreeIndexer::new(dir_path)?)),
    }
}
