//! Blob-store backends.
//!
//! Every backend implements [`Backend`], which opens a single object for reading. Missing objects
//! are reported as [`Error::NotFound`](crate::Error::NotFound), distinct from all other failures.

mod common;
mod gcs;
mod in_memory;
mod local_fs;

pub use common::*;
pub use gcs::Gcs;
pub use in_memory::InMemoryBackend;
pub use local_fs::LocalFs;
