#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_long_first_doc_paragraph)]

mod backup;
mod batch;
mod data;
mod engine;
mod fio;
mod index;
mod iterator;
mod logging;
mod merge;
mod options;

pub mod error;

pub use batch::WriteBatch;
pub use engine::{Engine, Stat};
pub use error::{Error, Result};
pub use iterator::Iterator;
pub use logging::init as init_logging;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
