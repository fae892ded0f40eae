use crate::Response;

/// Boxed error source carried by [`TransportError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single transport call, before any response was received.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The per-attempt timeout elapsed.
    #[error("request timed out: {0}")]
    Timeout(#[source] BoxError),
    /// The connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    Connect(#[source] BoxError),
    /// Any other request-level failure (invalid URL, body error, redirect loop...).
    #[error("request failed: {0}")]
    Request(#[source] BoxError),
}

impl TransportError {
    /// Returns `true` for failures that are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_))
    }

    /// Whether the per-attempt timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the connection could not be established.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure that was either fatal or survived every retry.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Final response carried a 4xx/5xx status and raise-for-status was enabled.
    #[error("http error {status}")]
    Status {
        /// Numeric status code of the final response.
        status: u16,
        /// The response itself, for callers that need headers or body.
        response: Box<Response>,
    },
    /// Request body could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
    /// Retry loop ended with neither a response nor a transport error.
    #[error("request failed after {attempts} attempts")]
    Exhausted { attempts: usize },
}

impl Error {
    /// Status code for [`Error::Status`], `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
