use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Selects which `Indexer` backend an `Engine` uses for its in-memory key
/// directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// `std::collections::BTreeMap`-backed ordered index.
    BTree,
    /// Hand-rolled compressed radix tree, for prefix-heavy workloads.
    Art,
    /// `jammdb`-backed persistent on-disk B+tree.
    BPlusTree,
}

impl IndexType {
    /// The `snake_case` spelling `serde` expects for this variant, for use
    /// as a `config` crate default value.
    fn as_config_str(self) -> &'static str {
        match self {
            IndexType::BTree => "b_tree",
            IndexType::Art => "art",
            IndexType::BPlusTree => "b_plus_tree",
        }
    }
}

/// Engine-wide configuration, supplied to `Engine::open`.
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// Directory the engine's data files live in. Created if absent.
    pub dir_path: PathBuf,
    /// Byte cap per data file segment; crossing it rotates to a new active file.
    pub data_file_size: u64,
    /// Fsync the active file after every append.
    pub sync_writes: bool,
    /// If > 0 and `sync_writes` is false, fsync once this many bytes have been
    /// appended since the last sync.
    pub bytes_per_sync: u64,
    /// Index backend to use for the in-memory key directory.
    pub index_type: IndexType,
    /// Use a read-only memory map while replaying the log at startup, then
    /// switch the active file back to standard I/O.
    pub mmap_at_startup: bool,
    /// Minimum `reclaim_size / disk_size` ratio required before `merge()` is
    /// allowed to proceed.
    pub data_file_merge_ratio: f64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dir_path: std::env::temp_dir().join("bitcask"),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: true,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Options {
    /// Validates that required fields carry sane values, matching the
    /// checks the engine runs during `open`.
    pub fn check(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::DirPathIsEmpty);
        }
        if self.data_file_size == 0 {
            return Err(Error::DataFileSizeTooSmall);
        }
        Ok(())
    }

    /// Layers a config file (TOML/JSON/YAML, detected by extension) under
    /// the given base options, returning the merged result. Fields not
    /// present in the file keep the base's value.
    pub fn load(base: Options, path: impl AsRef<std::path::Path>) -> Result<Options> {
        let source = config::File::from(path.as_ref());
        let merged = config::Config::builder()
            .set_default("dir_path", base.dir_path.to_string_lossy().to_string())?
            .set_default("data_file_size", base.data_file_size as i64)?
            .set_default("sync_writes", base.sync_writes)?
            .set_default("bytes_per_sync", base.bytes_per_sync as i64)?
            .set_default("index_type", base.index_type.as_config_str())?
            .set_default("mmap_at_startup", base.mmap_at_startup)?
            .set_default("data_file_merge_ratio", base.data_file_merge_ratio)?
            .add_source(source)
            .build()?;
        Ok(merged.try_deserialize()?)
    }
}

/// Direction and prefix filter for `Engine::iter`.
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only keys starting with this byte string are yielded. Empty matches all.
    pub prefix: Vec<u8>,
    /// Iterate in descending key order when true.
    pub reverse: bool,
}

/// Configuration for a `WriteBatch`.
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Maximum number of buffered operations a single batch may hold.
    pub max_batch_num: usize,
    /// Fsync the active file once the batch's sentinel record is appended.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        WriteBatchOptions { max_batch_num: 10_000, sync_writes: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rejects_empty_dir_path_and_zero_file_size() {
        let mut options = Options::default();
        options.dir_path = PathBuf::new();
        assert!(matches!(options.check(), Err(Error::DirPathIsEmpty)));

        let mut options = Options::default();
        options.data_file_size = 0;
        assert!(matches!(options.check(), Err(Error::DataFileSizeTooSmall)));

        assert!(Options::default().check().is_ok());
    }

    #[test]
    fn load_layers_a_config_file_over_the_base_options() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("bitcask.toml");
        std::fs::write(&config_path, "data_file_size = 1048576\nsync_writes = true\n").unwrap();

        let base = Options::default();
        let loaded = Options::load(base.clone(), &config_path).unwrap();

        assert_eq!(loaded.data_file_size, 1_048_576);
        assert!(loaded.sync_writes);
        assert_eq!(loaded.dir_path, base.dir_path);
        assert_eq!(loaded.index_type, base.index_type);
    }

    #[test]
    fn load_honors_an_index_type_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("bitcask.toml");
        std::fs::write(&config_path, "index_type = \"art\"\n").unwrap();

        let loaded = Options::load(Options::default(), &config_path).unwrap();
        assert_eq!(loaded.index_type, IndexType::Art);
    }
}
