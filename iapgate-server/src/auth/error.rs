use thiserror::Error;

/// Error type for different authorization failure scenarios.
///
/// Every variant results in a `403 Forbidden` response. The distinction is only used for
/// diagnostics and is never exposed to the client.
#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    /// The request does not carry an assertion header.
    #[error("no assertion header provided")]
    MissingAssertion,

    /// The token header does not name the key that signed it.
    #[error("JWT header is missing `kid` field")]
    MissingKeyId,

    /// No verification key is known for the token's `kid`.
    #[error("key `{0}` not configured")]
    UnknownKey(String),

    /// Verification keys could not be retrieved.
    #[error("failed to fetch verification keys: {0}")]
    KeyFetch(String),

    /// The token is invalid (e.g. expired, malformed, wrong audience or bad signature).
    #[error("failed to validate token: {0}")]
    ValidationFailure(#[from] jsonwebtoken::errors::Error),
}
