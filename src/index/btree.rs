use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{IndexIterator, Indexer};
use crate::data::LogRecordPos;
use crate::error::Result;

/// Ordered in-memory index, the standard-throughput backend.
pub struct BTreeIndexer {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTreeIndexer {
    pub fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Indexer for BTreeIndexer {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let old = self.tree.write().remove(key);
        let existed = old.is_some();
        Ok((old, existed))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.tree.read().len())
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let guard = self.tree.read();
        let mut items: Vec<(Vec<u8>, LogRecordPos)> =
            guard.iter().map(|(k, v)| (k.clone(), *v)).collect();
        if reverse {
            items.reverse();
        }
        Ok(Box::new(BTreeIndexIterator::from_items(items, reverse)))
    }
}

/// Snapshots the index's entries into a `Vec` at construction time, the way
/// the original implementation's tree iterators all do, so the iterator
/// itself never needs to hold the index lock.
pub struct BTreeIndexIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    index: usize,
    reverse: bool,
}

impl BTreeIndexIterator {
    pub(crate) fn from_items(items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        Self { items, index: 0, reverse }
    }
}

impl IndexIterator for BTreeIndexIterator {
    fn rewind(&mut self) {
        self.index = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.index = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) -> Option<(Vec<u8>, LogRecordPos)> {
        let item = self.items.get(self.index)?.clone();
        self.index += 1;
        Some(item)
    }

    fn valid(&self) -> bool {
        self.index < self.items.len()
    }

    fn close(&mut self) {}
}
