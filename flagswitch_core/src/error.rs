use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Represents a result type for fallible operations in flagswitch.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that propagate out of provider lifecycle operations.
///
/// Flag reads never return these. A failure during resolution is reported as a
/// [`ResolutionError`] attached to an evaluation result that still carries a usable value.
///
/// `Error` is `Clone` so that a single failed initialization can be shared between every caller
/// that waited on it.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A rule document could not be loaded. On reload, the previously loaded document stays in
    /// use; on initial load, the provider is unusable.
    #[error("failed to fetch rule document from {location}")]
    DocumentFetch {
        /// Location the document was requested from.
        location: String,
        /// Underlying failure.
        #[source]
        source: FetchError,
    },

    /// A remote vendor failed to reach its ready state.
    #[error("vendor client failed to become ready: {0}")]
    VendorInit(String),

    /// Invalid document location or base URL configuration.
    #[error("invalid URL configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// A document location that cannot be read from.
    #[error("invalid document location: {0}")]
    InvalidLocation(String),

    /// The backend flag mirror could not be queried.
    #[error("failed to query backend flag mirror")]
    Mirror(#[source] FetchError),

    /// The requested provider id is not registered.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The operation requires a ready provider.
    #[error("provider is not ready")]
    ProviderNotReady,

    /// The provider has been shut down and cannot be used anymore.
    #[error("provider has been shut down")]
    ProviderShutDown,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

/// The reason a document or vendor fetch failed.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum FetchError {
    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The server answered with a non-success status code.
    #[error("unexpected HTTP status: {0}")]
    Status(reqwest::StatusCode),

    /// The server rejected our credentials.
    #[error("unauthorized, credentials are likely invalid")]
    Unauthorized,

    /// Reading a local document failed.
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// The payload is not valid JSON or does not have the expected structure.
    #[error("malformed document")]
    Parse(#[source] Arc<serde_json::Error>),

    /// The payload is valid JSON but of the wrong shape.
    #[error("unexpected document shape: {0}")]
    UnexpectedShape(&'static str),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(reqwest::StatusCode::UNAUTHORIZED) => FetchError::Unauthorized,
            Some(status) => FetchError::Status(status),
            None => FetchError::Network(Arc::new(value.without_url())),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(value: std::io::Error) -> Self {
        FetchError::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(value: serde_json::Error) -> Self {
        FetchError::Parse(Arc::new(value))
    }
}

/// Failure inside a flag read. Always paired with the caller's default value.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ResolutionError {
    /// No provider is active, or the active provider has not finished initializing.
    #[error("provider is not ready")]
    ProviderNotReady,

    /// The provider has been shut down.
    #[error("provider has been shut down")]
    ProviderShutDown,

    /// A remote provider has no flag values for the identity in the evaluation context.
    #[error("no flag values loaded for this identity")]
    IdentityNotLoaded,

    /// Evaluation failed unexpectedly. This should normally never happen.
    #[error("internal evaluation error")]
    Internal,
}
