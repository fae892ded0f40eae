use std::{fmt, sync::Arc, time::Duration};

use reqwest::{blocking, header::HeaderMap, Method};

use crate::{Body, Response, TransportError};

/// One network call as handed to a [`Transport`].
#[derive(Clone, Copy, Debug)]
pub struct TransportRequest<'a> {
    /// HTTP verb.
    pub method: &'a Method,
    /// Absolute request URL, without the query parameters below.
    pub url: &'a str,
    /// Query parameters appended to `url`.
    pub query: &'a [(String, String)],
    /// Merged default and per-call headers.
    pub headers: &'a HeaderMap,
    /// Payload, if any.
    pub body: Option<&'a Body>,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

/// Performs a single HTTP call. Implementations must not retry.
///
/// Timeouts and connection failures must be reported as
/// [`TransportError::Timeout`] and [`TransportError::Connect`]; everything
/// else as [`TransportError::Request`].
pub trait Transport: Send + Sync {
    /// Sends `request` once and reads the whole response body.
    fn send(&self, request: TransportRequest<'_>) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: TransportRequest<'_>) -> Result<Response, TransportError> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: TransportRequest<'_>) -> Result<Response, TransportError> {
        (**self).send(request)
    }
}

/// [`Transport`] backed by a blocking `reqwest` client.
///
/// The inner client keeps its own connection pool, so reuse one instance
/// across calls.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: blocking::Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Transport over a default `reqwest` blocking client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a preconfigured client (TLS, proxies, pool limits...).
    pub fn from_client(http: blocking::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest<'_>) -> Result<Response, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }

        builder = match request.body {
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Raw(bytes)) => builder.body(bytes.clone()),
            Some(Body::Form(pairs)) => builder.form(pairs),
            None => builder,
        };

        let response = builder.send().map_err(classify_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().map_err(classify_reqwest_error)?;

        Ok(Response::new(status, headers, body.to_vec()))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(Box::new(err))
    } else if err.is_connect() {
        TransportError::Connect(Box::new(err))
    } else {
        TransportError::Request(Box::new(err))
    }
}
