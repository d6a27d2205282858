use thiserror::Error;

/// All failure modes the engine can report to a caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("the key must not be empty")]
    KeyIsEmpty,

    #[error("key not found")]
    KeyNotFound,

    #[error("data file not found")]
    DataFileNotFound,

    #[error("the data directory is corrupted: {0}")]
    DataDirectoryCorrupted(String),

    #[error("exceeded the maximum number of operations in a write batch")]
    ExceedMaxBatchNum,

    #[error("a merge is already in progress")]
    MergeInProgress,

    #[error("the database directory is in use by another process")]
    DatabaseInUse,

    #[error("corrupted log record: crc mismatch")]
    CorruptedLogRecord,

    #[error("failed to update the in-memory index")]
    IndexUpdateFailed,

    #[error("the reclaimable ratio is below the configured merge threshold")]
    MergeRatioUnreached,

    #[error("not enough disk space to perform a merge")]
    NoEnoughSpaceForMerge,

    #[error("dir_path must not be empty")]
    DirPathIsEmpty,

    #[error("data_file_size must be greater than zero")]
    DataFileSizeTooSmall,

    #[error("failed to create the database directory: {0}")]
    FailedToCreateDatabaseDir(std::io::Error),

    #[error("failed to read the database directory: {0}")]
    FailedToReadDatabaseDir(std::io::Error),

    #[error("failed to copy the database directory: {0}")]
    FailedToCopyDirectory(#[from] fs_extra::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
