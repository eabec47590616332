//! Error taxonomy. Each enum covers one named error class: transient, permanent
//! remote, admission, client, fatal, cancellation.

use thiserror::Error;

/// Startup/fatal errors: configuration, bind failure,
/// anything that should abort the process before it starts serving.
#[derive(Debug, Error)]
pub enum GridGuardError {
    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the Fetch stage talking to remote providers.
/// `Transient` covers connection resets and 5xx: the fetcher retries these up to
/// `HTTP_MAX_RETRIES`. `Permanent` covers 4xx and malformed URLs: no retry.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("permanent fetch failure ({status}): {0}", status = .1)]
    Permanent(String, u16),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Timeout(_))
    }
}

/// Errors surfaced by `Queue<T>`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Admission rejection: the queue was at capacity when a non-blocking push was
    /// attempted.
    #[error("queue is full")]
    Full,

    /// The queue was closed for shutdown while a caller was waiting.
    #[error("queue is closed")]
    Closed,
}
