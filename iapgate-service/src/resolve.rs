//! Mapping of request paths onto object names.
//!
//! A request path is turned into a candidate object name by stripping the leading slash. Paths
//! that point to a "directory" (the root, or any path with a trailing slash) are served from the
//! [`INDEX_OBJECT`] inside that directory. When a candidate does not exist, exactly one fallback
//! lookup is made for `{candidate}/index.html`, so that `/about` can be served from
//! `about/index.html`.

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::backend::Object;
use crate::{Error, StorageService};

/// The object served for directory-style paths.
pub const INDEX_OBJECT: &str = "index.html";

/// Derives the candidate object name for a request path.
///
/// The path is percent-decoded first. The root path resolves to `index.html` and paths ending in
/// `/` resolve to the index object within that prefix.
pub fn object_name(path: &str) -> String {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let name = decoded.strip_prefix('/').unwrap_or(decoded.as_ref());

    if name.is_empty() {
        INDEX_OBJECT.to_owned()
    } else if name.ends_with('/') {
        format!("{name}{INDEX_OBJECT}")
    } else {
        name.to_owned()
    }
}

/// Returns the name to try when `candidate` does not exist.
///
/// There is no fallback for the top-level index object itself.
pub fn fallback_name(candidate: &str) -> Option<String> {
    if candidate == INDEX_OBJECT {
        None
    } else {
        Some(format!("{candidate}/{INDEX_OBJECT}"))
    }
}

/// An object that was successfully resolved for a request path.
#[derive(Debug)]
pub struct Resolved {
    /// The name of the object that was opened.
    pub name: String,
    /// Whether the object was found through the index fallback.
    pub fallback: bool,
    /// The opened object.
    pub object: Object,
}

/// Error returned when a request path cannot be resolved to an object.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Neither the candidate nor its fallback could be opened.
    #[error("object `{name}` not found")]
    NotFound {
        /// The last object name that was looked up.
        name: String,
        /// The error reported by the last lookup.
        #[source]
        source: Error,
    },

    /// The candidate could not be opened for a reason other than being absent.
    #[error("failed to open object `{name}`")]
    Backend {
        /// The object name that was looked up.
        name: String,
        /// The error reported by the backend.
        #[source]
        source: Error,
    },
}

impl StorageService {
    /// Resolves a request path to an opened object.
    ///
    /// See the [module documentation](self) for the resolution rules. Backend errors on the first
    /// lookup are returned as [`ResolveError::Backend`] without a fallback attempt. Any failure of
    /// the fallback lookup is reported as [`ResolveError::NotFound`].
    pub async fn resolve(&self, path: &str) -> Result<Resolved, ResolveError> {
        let name = object_name(path);

        let source = match self.open_object(&name).await {
            Ok(object) => {
                return Ok(Resolved {
                    name,
                    fallback: false,
                    object,
                });
            }
            Err(err) if err.is_not_found() => err,
            Err(source) => return Err(ResolveError::Backend { name, source }),
        };

        let Some(fallback) = fallback_name(&name) else {
            return Err(ResolveError::NotFound { name, source });
        };

        tracing::debug!(%name, %fallback, "object not found, trying index fallback");
        match self.open_object(&fallback).await {
            Ok(object) => Ok(Resolved {
                name: fallback,
                fallback: true,
                object,
            }),
            Err(source) => Err(ResolveError::NotFound {
                name: fallback,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use futures_util::TryStreamExt;

    use super::*;
    use crate::backend::InMemoryBackend;

    fn service() -> (StorageService, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let service = StorageService::from_backend(Box::new(backend.clone()));
        (service, backend)
    }

    async fn contents(resolved: Resolved) -> String {
        let bytes: BytesMut = resolved.object.stream.try_collect().await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_object_name() {
        assert_eq!(object_name("/"), "index.html");
        assert_eq!(object_name(""), "index.html");
        assert_eq!(object_name("/index.html"), "index.html");
        assert_eq!(object_name("/docs/"), "docs/index.html");
        assert_eq!(object_name("/about"), "about");
        assert_eq!(object_name("/a/b/c.css"), "a/b/c.css");
        assert_eq!(object_name("/hello%20world.txt"), "hello world.txt");
        assert_eq!(object_name("//double"), "/double");
    }

    #[test]
    fn test_fallback_name() {
        assert_eq!(fallback_name("index.html"), None);
        assert_eq!(fallback_name("about").as_deref(), Some("about/index.html"));
        assert_eq!(
            fallback_name("docs/index.html").as_deref(),
            Some("docs/index.html/index.html")
        );
    }

    #[tokio::test]
    async fn resolves_root_to_index() {
        let (service, backend) = service();
        backend.insert("index.html", "home");

        let resolved = service.resolve("/").await.unwrap();
        assert_eq!(resolved.name, "index.html");
        assert!(!resolved.fallback);
        assert_eq!(contents(resolved).await, "home");
        assert_eq!(backend.lookups(), ["index.html"]);
    }

    #[tokio::test]
    async fn resolves_trailing_slash_to_index() {
        let (service, backend) = service();
        backend.insert("docs/index.html", "docs");

        let resolved = service.resolve("/docs/").await.unwrap();
        assert_eq!(resolved.name, "docs/index.html");
        assert_eq!(backend.lookups(), ["docs/index.html"]);
    }

    #[tokio::test]
    async fn falls_back_to_directory_index() {
        let (service, backend) = service();
        backend.insert("about/index.html", "about us");

        let resolved = service.resolve("/about").await.unwrap();
        assert_eq!(resolved.name, "about/index.html");
        assert!(resolved.fallback);
        assert_eq!(contents(resolved).await, "about us");
        assert_eq!(backend.lookups(), ["about", "about/index.html"]);
    }

    #[tokio::test]
    async fn prefers_direct_object() {
        let (service, backend) = service();
        backend.insert("about", "direct");
        backend.insert("about/index.html", "index");

        let resolved = service.resolve("/about").await.unwrap();
        assert_eq!(contents(resolved).await, "direct");
        assert_eq!(backend.lookups(), ["about"]);
    }

    #[tokio::test]
    async fn missing_after_fallback() {
        let (service, backend) = service();

        let err = service.resolve("/about").await.unwrap_err();
        let ResolveError::NotFound { name, source } = err else {
            panic!("expected not found");
        };
        assert_eq!(name, "about/index.html");
        assert!(source.is_not_found());
        assert_eq!(backend.lookups(), ["about", "about/index.html"]);
    }

    #[tokio::test]
    async fn no_fallback_for_root_index() {
        let (service, backend) = service();

        for path in ["/", "/index.html"] {
            backend.clear_lookups();
            let err = service.resolve(path).await.unwrap_err();
            assert!(matches!(err, ResolveError::NotFound { .. }));
            assert_eq!(backend.lookups(), ["index.html"]);
        }
    }

    #[tokio::test]
    async fn backend_error_skips_fallback() {
        let (service, backend) = service();
        backend.fail_open("about", "permission denied");
        backend.insert("about/index.html", "index");

        let err = service.resolve("/about").await.unwrap_err();
        assert!(matches!(err, ResolveError::Backend { ref name, .. } if name == "about"));
        assert_eq!(backend.lookups(), ["about"]);
    }

    #[tokio::test]
    async fn fallback_errors_are_not_found() {
        let (service, backend) = service();
        backend.fail_open("about/index.html", "permission denied");

        let err = service.resolve("/about").await.unwrap_err();
        let ResolveError::NotFound { source, .. } = err else {
            panic!("expected not found");
        };
        assert!(!source.is_not_found());
    }
}
