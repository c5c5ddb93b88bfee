use std::fmt;
use std::io;
use std::sync::Arc;

use futures_util::{StreamExt, TryStreamExt};
use gcp_auth::TokenProvider;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

use super::common::{Backend, Object, ObjectMetadata, reqwest_client};
use crate::error::{Error, Result};

/// Default endpoint of the GCS JSON API.
const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// OAuth scope requested for reading objects.
const READ_ONLY_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";

/// Google Cloud Storage backend using the JSON API.
///
/// Credentials are resolved via Application Default Credentials. When a custom endpoint is
/// configured (e.g. `fake-gcs-server`), requests are sent without authentication.
pub struct Gcs {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl Gcs {
    /// Creates a new GCS backend bound to the given bucket.
    pub async fn new(endpoint: Option<&str>, bucket: &str) -> Result<Self> {
        let token_provider = match endpoint {
            Some(_) => None,
            None => Some(gcp_auth::provider().await?),
        };

        Ok(Self {
            client: reqwest_client()?,
            endpoint: endpoint
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_owned(),
            bucket: bucket.into(),
            token_provider,
        })
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.endpoint,
            utf8_percent_encode(&self.bucket, NON_ALPHANUMERIC),
            utf8_percent_encode(name, NON_ALPHANUMERIC),
        )
    }
}

impl fmt::Debug for Gcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gcs")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("authenticated", &self.token_provider.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Backend for Gcs {
    fn name(&self) -> &'static str {
        "gcs"
    }

    #[tracing::instrument(level = "trace", fields(?name), skip_all)]
    async fn open_object(&self, name: &str) -> Result<Object> {
        tracing::debug!("Reading from gcs backend");

        let mut request = self.client.get(self.object_url(name));
        if let Some(ref provider) = self.token_provider {
            let token = provider.token(&[READ_ONLY_SCOPE]).await?;
            request = request.bearer_auth(token.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|cause| Error::reqwest("sending GCS request", cause))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Object not found");
            return Err(Error::NotFound);
        }

        let response = response
            .error_for_status()
            .map_err(|cause| Error::reqwest("opening GCS object", cause))?;

        let metadata = ObjectMetadata {
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        };
        let stream = response.bytes_stream().map_err(io::Error::other).boxed();

        Ok(Object { metadata, stream })
    }
}
