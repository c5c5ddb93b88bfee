//! The service layer provides read access to objects in a blob store, together with the policy
//! that maps request paths onto object names.
//!
//! It is designed as a library crate to be used by the `iapgate-server`. The entry point is
//! [`StorageService`], which wraps one of the [backends](backend) and exposes
//! [`StorageService::resolve`] to look up the object serving a request path.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
mod error;
pub mod resolve;

use std::path::Path;
use std::sync::Arc;

pub use backend::{Object, ObjectMetadata, PayloadStream};
pub use error::{Error, Result};
pub use resolve::{ResolveError, Resolved};

use crate::backend::BoxedBackend;

/// High-level asynchronous service for reading objects.
///
/// The service is cheap to clone and safe to share between concurrently running requests.
#[derive(Clone, Debug)]
pub struct StorageService(Arc<StorageServiceInner>);

#[derive(Debug)]
struct StorageServiceInner {
    backend: BoxedBackend,
}

/// Configuration to initialize a [`StorageService`].
#[derive(Debug)]
pub enum StorageConfig<'a> {
    /// Use Google Cloud Storage as the storage backend.
    Gcs {
        /// Optional endpoint URL, used for emulators. Disables authentication when set.
        endpoint: Option<&'a str>,
        /// The name of the bucket to read from.
        bucket: &'a str,
    },
    /// Use a local directory as the storage backend.
    FileSystem {
        /// The directory that object names are resolved against.
        path: &'a Path,
    },
}

impl StorageService {
    /// Creates a new `StorageService` with the specified configuration.
    pub async fn new(config: StorageConfig<'_>) -> Result<Self> {
        let backend: BoxedBackend = match config {
            StorageConfig::Gcs { endpoint, bucket } => {
                Box::new(backend::Gcs::new(endpoint, bucket).await?)
            }
            StorageConfig::FileSystem { path } => Box::new(backend::LocalFs::new(path)),
        };

        Ok(Self::from_backend(backend))
    }

    /// Creates a `StorageService` from an already constructed backend.
    pub fn from_backend(backend: BoxedBackend) -> Self {
        tracing::debug!(backend = backend.name(), "storage service ready");
        Self(Arc::new(StorageServiceInner { backend }))
    }

    /// Returns the name of the underlying backend, used for diagnostics.
    pub fn backend_name(&self) -> &'static str {
        self.0.backend.name()
    }

    /// Opens the object stored under `name` for reading.
    ///
    /// Returns [`Error::NotFound`] if the object does not exist.
    pub async fn open_object(&self, name: &str) -> Result<Object> {
        self.0.backend.open_object(name).await
    }
}
