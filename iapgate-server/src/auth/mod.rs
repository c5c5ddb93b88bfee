//! Authorization of requests through Identity-Aware Proxy assertions.
//!
//! Every request must carry a signed JWT in the assertion header (by default
//! `x-goog-iap-jwt-assertion`) whose audience matches the configured audience. There is no
//! per-object authorization: a valid assertion grants read access to the whole bucket.
#![warn(missing_docs)]

use axum::http::HeaderMap;

use crate::config;

mod error;
mod key_directory;
mod validator;

pub use error::*;
pub use key_directory::*;
pub use validator::*;

/// Checks the assertion carried by a request.
///
/// A missing or empty header is rejected without consulting the validator. Header values that
/// are not visible ASCII are treated as missing.
pub async fn authorize(
    headers: &HeaderMap,
    config: &config::Auth,
    validator: &dyn TokenValidator,
) -> Result<IapClaims, AuthError> {
    let token = headers
        .get(config.header.as_str())
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingAssertion)?;

    validator.validate(token, &config.audience).await
}
