use std::path::Path;

use fs_extra::file::{self, CopyOptions};

use crate::data::data_file::LOCK_FILE_NAME;
use crate::engine::Engine;
use crate::error::Result;

impl Engine {
    /// Copies the data directory's files to `target`, excluding the
    /// directory-lock sentinel. `target` must be openable as an independent
    /// engine with the same options afterward.
    pub fn backup(&self, target: &Path) -> Result<()> {
        std::fs::create_dir_all(target)?;

        let options = CopyOptions { overwrite: true, ..CopyOptions::new() };
        for entry in std::fs::read_dir(&self.options.dir_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry.file_name() == LOCK_FILE_NAME {
                continue;
            }
            file::copy(entry.path(), target.join(entry.file_name()), &options)?;
        }
        Ok(())
    }
}
