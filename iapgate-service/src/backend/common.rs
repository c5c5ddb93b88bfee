use std::fmt;
use std::io;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::{Error, Result};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("iapgate/", env!("CARGO_PKG_VERSION"));

/// A type-erased [`Backend`] instance.
pub type BoxedBackend = Box<dyn Backend>;

/// The byte stream of an object's contents.
///
/// Dropping the stream releases the underlying handle (HTTP response or file).
pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;

/// Metadata that a backend reports alongside an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// The content type stored with the object, if any.
    pub content_type: Option<String>,
}

/// An object opened for reading.
pub struct Object {
    /// Metadata reported by the backend.
    pub metadata: ObjectMetadata,
    /// The object contents.
    pub stream: PayloadStream,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A blob store that objects can be read from.
#[async_trait::async_trait]
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Opens the object with the given name for reading.
    ///
    /// Returns [`Error::NotFound`] if there is no such object.
    async fn open_object(&self, name: &str) -> Result<Object>;
}

/// Creates a reqwest client with required defaults.
pub fn reqwest_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|cause| Error::reqwest("building HTTP client", cause))
}
