use std::{fmt, sync::Arc, time::Duration};

use reqwest::{header::HeaderMap, Method};
use serde_json::json;

use crate::{
    logging::{Context, Logger, LoggerRegistry},
    retry::{jittered_backoff, retry_after, Outcome},
    Body, Error, ReqwestTransport, RequestOptions, Response, Result, RetryStatuses, Sleeper,
    ThreadSleeper, Transport, TransportError, TransportRequest, WriteOptions,
};

const LOGGER_NAME: &str = "resilient_http::client";

/// Blocking HTTP client that retries transient failures with jittered
/// exponential backoff.
///
/// Retries happen on timeouts, connection failures, and responses whose
/// status is in the call's [`RetryStatuses`]. A numeric `Retry-After` header
/// on a retryable response replaces the computed backoff.
#[derive(Clone)]
pub struct ResilientHttpClient<T: Transport = ReqwestTransport> {
    transport: T,
    default_headers: HeaderMap,
    sleeper: Arc<dyn Sleeper>,
    logger: Logger,
}

impl<T: Transport> fmt::Debug for ResilientHttpClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self
            .default_headers
            .keys()
            .map(|name| name.as_str())
            .collect();
        f.debug_struct("ResilientHttpClient")
            .field("default_headers", &header_names)
            .field("logger", &self.logger.name())
            .finish_non_exhaustive()
    }
}

impl ResilientHttpClient<ReqwestTransport> {
    /// Creates a client owning a fresh `reqwest` session.
    pub fn new(default_headers: HeaderMap) -> Self {
        Self::with_transport(default_headers, ReqwestTransport::new())
    }
}

impl Default for ResilientHttpClient<ReqwestTransport> {
    fn default() -> Self {
        Self::new(HeaderMap::new())
    }
}

impl<T: Transport> ResilientHttpClient<T> {
    /// Creates a client over a caller-supplied transport.
    ///
    /// Pass an `Arc<T>` to share one session between several clients.
    pub fn with_transport(default_headers: HeaderMap, transport: T) -> Self {
        Self {
            transport,
            default_headers,
            sleeper: Arc::new(ThreadSleeper),
            logger: LoggerRegistry::global().get(LOGGER_NAME),
        }
    }

    /// Replaces the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replaces the logger retries and failures are reported to.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Headers merged into every call.
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// Underlying transport session.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a GET request, retrying on the default retryable statuses.
    pub fn get(&self, url: &str, opts: &RequestOptions) -> Result<Response> {
        self.execute(&Method::GET, url, None, opts, &RetryStatuses::default())
    }

    /// Sends a POST request with an optional JSON, raw, or form body.
    pub fn post(&self, url: &str, body: Option<Body>, opts: &WriteOptions) -> Result<Response> {
        let statuses = opts.resolved_statuses();
        self.execute(&Method::POST, url, body.as_ref(), &opts.request, &statuses)
    }

    /// Sends a PUT request with an optional JSON, raw, or form body.
    pub fn put(&self, url: &str, body: Option<Body>, opts: &WriteOptions) -> Result<Response> {
        let statuses = opts.resolved_statuses();
        self.execute(&Method::PUT, url, body.as_ref(), &opts.request, &statuses)
    }

    /// Defaults overlaid with `headers`; per-call values win.
    pub fn merge_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut merged = self.default_headers.clone();
        for name in headers.keys() {
            merged.remove(name);
        }
        for (name, value) in headers {
            merged.append(name.clone(), value.clone());
        }
        merged
    }

    fn execute(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Body>,
        opts: &RequestOptions,
        statuses: &RetryStatuses,
    ) -> Result<Response> {
        opts.validate()?;
        let headers = self.merge_headers(&opts.headers);
        let attempts = opts.attempts();
        let mut last_response: Option<Response> = None;
        let mut last_error: Option<TransportError> = None;

        for attempt in 0..attempts {
            let is_last = attempt + 1 == attempts;
            let request = TransportRequest {
                method,
                url,
                query: &opts.query,
                headers: &headers,
                body,
                timeout: opts.timeout,
            };

            match Outcome::classify(self.transport.send(request), statuses) {
                Outcome::Terminal(response) => {
                    return self.finish(method, url, response, opts.raise_for_status);
                }
                Outcome::FatalError(err) => {
                    self.logger.exception(
                        "request failed with non-retryable transport error",
                        &err,
                        Some(&call_context(method, url, attempt)),
                    );
                    return Err(Error::Transport(err));
                }
                Outcome::RetryableStatus(response) => {
                    if !is_last {
                        let delay = retry_after(response.headers())
                            .unwrap_or_else(|| jittered_backoff(opts.retry_backoff, attempt));
                        let mut context = call_context(method, url, attempt);
                        context.insert("status".to_owned(), json!(response.status().as_u16()));
                        self.wait(delay, context);
                    }
                    last_response = Some(response);
                }
                Outcome::RetryableError(err) => {
                    if !is_last {
                        let delay = jittered_backoff(opts.retry_backoff, attempt);
                        let mut context = call_context(method, url, attempt);
                        context.insert("error".to_owned(), json!(err.to_string()));
                        self.wait(delay, context);
                    }
                    last_error = Some(err);
                }
            }
        }

        if let Some(response) = last_response {
            return self.finish(method, url, response, opts.raise_for_status);
        }
        if let Some(err) = last_error {
            self.logger.exception(
                "request failed after exhausting retries",
                &err,
                Some(&call_context(method, url, attempts - 1)),
            );
            return Err(Error::Transport(err));
        }
        Err(Error::Exhausted { attempts })
    }

    fn finish(
        &self,
        method: &Method,
        url: &str,
        response: Response,
        raise_for_status: bool,
    ) -> Result<Response> {
        if !raise_for_status {
            return Ok(response);
        }
        response.error_for_status().map_err(|err| {
            let mut context = Context::new();
            context.insert("method".to_owned(), json!(method.as_str()));
            context.insert("url".to_owned(), json!(url));
            self.logger
                .exception("request returned error status", &err, Some(&context));
            err
        })
    }

    fn wait(&self, delay: Duration, mut context: Context) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        context.insert("delay_ms".to_owned(), json!(delay_ms));
        self.logger.warning("retrying request", Some(&context));
        self.sleeper.sleep(delay);
    }
}

fn call_context(method: &Method, url: &str, attempt: usize) -> Context {
    let mut context = Context::new();
    context.insert("method".to_owned(), json!(method.as_str()));
    context.insert("url".to_owned(), json!(url));
    context.insert("attempt".to_owned(), json!(attempt));
    context
}
