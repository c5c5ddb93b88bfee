//! Exposes an in-process test server for use in integration tests.
//!
//! ```
//! use iapgate_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    server.backend().insert("index.html", "hello");
//!    let url = server.url("/");
//!    // request the URL with `iapgate_test::tokens::valid_token()` ...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use iapgate_server::config::{self, Config};
use iapgate_server::state::State;
use iapgate_server::web::App;
use iapgate_service::StorageService;
use iapgate_service::backend::InMemoryBackend;

use crate::tokens;

/// An in-process test server for use in integration tests.
///
/// This server runs the full iapgate application on top of an [`InMemoryBackend`] and accepts
/// assertions signed with [`tokens::TEST_PRIVATE_KEY`] for [`tokens::TEST_AUDIENCE`]. It listens
/// on a random available port on localhost.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    backend: InMemoryBackend,
}

impl TestServer {
    /// Starts a server with the default test configuration.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Starts a server with the given configuration.
    ///
    /// The storage configuration is ignored, objects are always served from memory. Keys are
    /// always the test keys.
    pub async fn with_config(config: Config) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let backend = InMemoryBackend::new();
        let validator = tokens::validator(&config.auth);
        let state = Arc::new(State {
            config,
            service: StorageService::from_backend(Box::new(backend.clone())),
            validator: Box::new(validator),
        });
        let app = App::new(state);

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            app.serve(listener).await.unwrap();
        });

        Self {
            handle,
            socket,
            backend,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the bucket the server reads from.
    pub fn backend(&self) -> &InMemoryBackend {
        &self.backend
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The configuration used by [`TestServer::new`].
pub fn test_config() -> Config {
    Config {
        auth: config::Auth {
            audience: tokens::TEST_AUDIENCE.to_owned(),
            ..Default::default()
        },
        ..Default::default()
    }
}
