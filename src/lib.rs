//! `resilient-http` is a blocking HTTP client that retries transient failures.
//!
//! [`ResilientHttpClient`] exposes three verbs sharing one retry loop:
//! - [`ResilientHttpClient::get`]
//! - [`ResilientHttpClient::post`]
//! - [`ResilientHttpClient::put`]
//!
//! Timeouts, connection failures and retryable statuses
//! (429, 500, 502, 503, 504 by default) are retried with jittered exponential
//! backoff. A numeric `Retry-After` header takes precedence over the computed
//! delay.

mod body;
mod client;
mod error;
pub mod logging;
mod options;
mod response;
pub mod retry;
mod transport;

pub use body::Body;
pub use client::ResilientHttpClient;
pub use error::{BoxError, Error, TransportError};
pub use options::{RequestOptions, RetryStatuses, WriteOptions, DEFAULT_RETRY_STATUSES};
pub use response::Response;
pub use retry::{Sleeper, ThreadSleeper};
pub use transport::{ReqwestTransport, Transport, TransportRequest};

/// Re-exported so callers can build headers and inspect statuses without a
/// direct `reqwest` dependency.
pub use reqwest::{header, Method, StatusCode};

pub type Result<T> = std::result::Result<T, Error>;
