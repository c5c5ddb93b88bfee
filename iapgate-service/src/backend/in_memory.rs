//! In-memory backend for tests.
//!
//! This provides a [`Backend`] backed by a `HashMap`, removing the need for a bucket or a
//! temporary directory in tests. The backend is [`Clone`] so tests can hold a handle for direct
//! inspection while the service owns a boxed copy.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::StreamExt;

use super::common::{Backend, Object, ObjectMetadata};
use crate::error::{Error, Result};

#[derive(Debug)]
enum Entry {
    Stored(ObjectMetadata, Bytes),
    /// Opening the object fails with a backend error other than "not found".
    OpenFailure(String),
    /// Opening succeeds, the stream yields `prefix` and then fails.
    StreamFailure(Bytes, String),
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
    lookups: Vec<String>,
}

/// A [`Backend`] that keeps objects in memory and records every lookup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores an object without a content type.
    pub fn insert(&self, name: &str, contents: impl Into<Bytes>) {
        self.insert_with_content_type(name, None, contents);
    }

    /// Stores an object with an optional content type.
    pub fn insert_with_content_type(
        &self,
        name: &str,
        content_type: Option<&str>,
        contents: impl Into<Bytes>,
    ) {
        let contents = contents.into();
        let metadata = ObjectMetadata {
            content_type: content_type.map(str::to_owned),
        };
        self.store()
            .entries
            .insert(name.to_owned(), Entry::Stored(metadata, contents));
    }

    /// Makes opening `name` fail with a generic backend error.
    pub fn fail_open(&self, name: &str, message: &str) {
        self.store()
            .entries
            .insert(name.to_owned(), Entry::OpenFailure(message.to_owned()));
    }

    /// Makes reading `name` fail after `prefix` has been streamed.
    pub fn fail_stream(&self, name: &str, prefix: impl Into<Bytes>, message: &str) {
        self.store().entries.insert(
            name.to_owned(),
            Entry::StreamFailure(prefix.into(), message.to_owned()),
        );
    }

    /// Removes an object or injected failure.
    pub fn remove(&self, name: &str) {
        self.store().entries.remove(name);
    }

    /// Returns all object names that were looked up, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.store().lookups.clone()
    }

    /// Forgets all recorded lookups.
    pub fn clear_lookups(&self) {
        self.store().lookups.clear();
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn open_object(&self, name: &str) -> Result<Object> {
        let mut store = self.store();
        store.lookups.push(name.to_owned());

        match store.entries.get(name) {
            None => Err(Error::NotFound),
            Some(Entry::OpenFailure(message)) => Err(Error::generic(message.clone())),
            Some(Entry::Stored(metadata, bytes)) => {
                let bytes = bytes.clone();
                let stream = futures_util::stream::once(async move { Ok(bytes) }).boxed();
                Ok(Object {
                    metadata: metadata.clone(),
                    stream,
                })
            }
            Some(Entry::StreamFailure(prefix, message)) => {
                let mut items = Vec::new();
                if !prefix.is_empty() {
                    items.push(Ok(prefix.clone()));
                }
                items.push(Err(io::Error::other(message.clone())));

                Ok(Object {
                    metadata: ObjectMetadata::default(),
                    stream: futures_util::stream::iter(items).boxed(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use futures_util::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn records_lookups() {
        let backend = InMemoryBackend::new();
        backend.insert("a", "contents");

        backend.open_object("a").await.unwrap();
        backend.open_object("b").await.unwrap_err();

        assert_eq!(backend.lookups(), ["a", "b"]);
        backend.clear_lookups();
        assert!(backend.lookups().is_empty());
    }

    #[tokio::test]
    async fn injects_failures() {
        let backend = InMemoryBackend::new();
        backend.fail_open("broken", "bucket on fire");
        backend.fail_stream("truncated", "abc", "connection reset");

        let err = backend.open_object("broken").await.unwrap_err();
        assert!(!err.is_not_found());

        let object = backend.open_object("truncated").await.unwrap();
        let result: io::Result<BytesMut> = object.stream.try_collect().await;
        assert_eq!(result.unwrap_err().to_string(), "connection reset");
    }
}
