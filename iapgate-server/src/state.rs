use std::sync::Arc;

use anyhow::Context;
use iapgate_service::{StorageConfig, StorageService};

use crate::auth::{JwtValidator, TokenValidator};
use crate::config::{Config, Storage};

/// Shared reference to the iapgate [service state](State).
pub type ServiceState = Arc<State>;

/// Shared resources of the server.
///
/// This structure is created during server startup and shared with all HTTP request handlers.
/// In request handlers, use `axum::extract::State<ServiceState>` to retrieve a shared reference
/// to this structure.
#[derive(Debug)]
pub struct State {
    /// The server configuration.
    pub config: Config,
    /// The storage service instance.
    pub service: StorageService,
    /// Validates the assertions carried by requests.
    pub validator: Box<dyn TokenValidator>,
}

impl State {
    /// Creates the storage client and assertion validator for `config`.
    pub async fn new(config: Config) -> anyhow::Result<ServiceState> {
        let service = StorageService::new(map_storage_config(&config.storage))
            .await
            .context("failed to initialize storage")?;
        tracing::info!(backend = service.backend_name(), "storage initialized");

        let validator = JwtValidator::from_config(&config.auth)
            .context("failed to initialize assertion validator")?;

        Ok(Arc::new(Self {
            config,
            service,
            validator: Box::new(validator),
        }))
    }
}

fn map_storage_config(config: &'_ Storage) -> StorageConfig<'_> {
    match config {
        Storage::FileSystem { path } => StorageConfig::FileSystem { path },
        Storage::Gcs { endpoint, bucket } => StorageConfig::Gcs {
            endpoint: endpoint.as_deref(),
            bucket,
        },
    }
}
