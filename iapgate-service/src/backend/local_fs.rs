use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::common::{Backend, Object, ObjectMetadata};
use crate::error::{Error, Result};

/// Serves objects from a directory on the local filesystem.
///
/// Object names are interpreted as relative paths below the root directory. Directories are not
/// objects, which mirrors the flat namespace of a bucket.
#[derive(Debug)]
pub struct LocalFs {
    path: PathBuf,
}

impl LocalFs {
    /// Creates a backend rooted at the given directory.
    pub fn new(path: &Path) -> Self {
        Self { path: path.into() }
    }
}

/// Returns the relative path for an object name, or `None` if it would escape the root.
fn relative_path(name: &str) -> Option<&Path> {
    let path = Path::new(name);
    let mut components = path.components().peekable();
    components.peek()?;

    components
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(path)
}

#[async_trait::async_trait]
impl Backend for LocalFs {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    #[tracing::instrument(level = "trace", fields(?name), skip_all)]
    async fn open_object(&self, name: &str) -> Result<Object> {
        let Some(relative) = relative_path(name) else {
            tracing::debug!("Rejecting object name outside of the root directory");
            return Err(Error::NotFound);
        };

        let file = match File::open(self.path.join(relative)).await {
            Ok(file) => file,
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Err(Error::NotFound);
            }
            Err(err) => return Err(err.into()),
        };

        let file_metadata = file.metadata().await?;
        if file_metadata.is_dir() {
            return Err(Error::NotFound);
        }

        let stream = ReaderStream::new(file).boxed();

        Ok(Object {
            metadata: ObjectMetadata::default(),
            stream,
        })
    }
}
