use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

/// User-facing iterator: wraps the index's key iterator with a prefix
/// filter and fetches each entry's value from the log as it's visited.
/// Direction is fixed at construction.
pub struct Iterator<'a> {
    engine: &'a Engine,
    inner: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Engine {
    pub fn iter(&self, options: IteratorOptions) -> Result<Iterator<'_>> {
        let mut inner = self.index.iterator(options.reverse)?;
        inner.rewind();
        Ok(Iterator { engine: self, inner, options })
    }
}

impl<'a> Iterator<'a> {
    pub fn rewind(&mut self) {
        self.inner.rewind();
    }

    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
    }

    pub fn next(&mut self) -> Option<Result<(Vec<u8>, Vec<u8>)>> {
        loop {
            let (key, pos) = self.inner.next()?;
            if !key.starts_with(self.options.prefix.as_slice()) {
                continue;
            }
            let value = self.engine.get_value_by_position(&pos);
            return Some(value.map(|v| (key, v)));
        }
    }

    /// Releases the underlying index iterator's resources (the persistent
    /// backend's read transaction, for the B+tree index).
    pub fn close(&mut self) {
        self.inner.close();
    }
}
