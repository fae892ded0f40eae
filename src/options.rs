use std::{collections::BTreeSet, time::Duration};

use reqwest::{header::HeaderMap, StatusCode};

use crate::{Error, Result};

/// Statuses retried when a call does not override them.
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

const ENV_TIMEOUT_S: &str = "RESILIENT_HTTP_TIMEOUT_S";
const ENV_RETRIES: &str = "RESILIENT_HTTP_RETRIES";
const ENV_RETRY_SLEEP_S: &str = "RESILIENT_HTTP_RETRY_SLEEP_S";
const ENV_RAISE_FOR_STATUS: &str = "RESILIENT_HTTP_RAISE_FOR_STATUS";

/// Immutable set of HTTP status codes that trigger a retry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryStatuses(BTreeSet<u16>);

impl RetryStatuses {
    /// Builds a set from status codes; duplicates collapse.
    pub fn new<I: IntoIterator<Item = u16>>(codes: I) -> Self {
        Self(codes.into_iter().collect())
    }

    /// Whether `status` triggers a retry.
    pub fn contains(&self, status: StatusCode) -> bool {
        self.0.contains(&status.as_u16())
    }

    /// Codes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl Default for RetryStatuses {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_STATUSES)
    }
}

/// Per-call settings shared by every verb.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestOptions {
    /// Query string pairs appended to the URL.
    pub query: Vec<(String, String)>,
    /// Headers layered over the client defaults.
    pub headers: HeaderMap,
    /// Timeout applied to each attempt by the transport.
    pub timeout: Duration,
    /// Attempt budget. Values below 1 still perform one attempt.
    pub retries: usize,
    /// Base delay for exponential backoff.
    pub retry_backoff: Duration,
    /// Whether a final 4xx/5xx response is returned as [`Error::Status`].
    pub raise_for_status: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query: Vec::new(),
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_backoff: Duration::from_secs(1),
            raise_for_status: true,
        }
    }
}

impl RequestOptions {
    /// Builds options from environment variables, falling back to defaults.
    ///
    /// Reads:
    /// - `RESILIENT_HTTP_TIMEOUT_S` — per-attempt timeout in seconds
    /// - `RESILIENT_HTTP_RETRIES` — attempt budget
    /// - `RESILIENT_HTTP_RETRY_SLEEP_S` — base backoff in seconds
    /// - `RESILIENT_HTTP_RAISE_FOR_STATUS` — `true`/`false`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(raw) = lookup(ENV_TIMEOUT_S) {
            options.timeout = parse_seconds(ENV_TIMEOUT_S, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRIES) {
            options.retries = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_RETRIES} must be a non-negative integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup(ENV_RETRY_SLEEP_S) {
            options.retry_backoff = parse_seconds(ENV_RETRY_SLEEP_S, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RAISE_FOR_STATUS) {
            options.raise_for_status = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(Error::Config(format!(
                        "{ENV_RAISE_FOR_STATUS} must be a boolean, got '{raw}'"
                    )))
                }
            };
        }
        Ok(options)
    }

    /// Appends query string pairs.
    pub fn with_query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Sets per-call headers; they win over the client defaults.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the per-attempt timeout. Must be non-zero.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the attempt budget.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the base backoff delay. Must be non-zero.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Controls whether a final 4xx/5xx response becomes [`Error::Status`].
    pub fn with_raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = raise;
        self
    }

    /// Number of attempts the retry loop will make.
    pub fn attempts(&self) -> usize {
        self.retries.max(1)
    }

    /// Rejects a zero timeout or zero base backoff.
    ///
    /// Every call runs this before its first attempt.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be positive".to_owned()));
        }
        if self.retry_backoff.is_zero() {
            return Err(Error::Config("retry backoff must be positive".to_owned()));
        }
        Ok(())
    }
}

/// Options for POST and PUT, which may override the retryable statuses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteOptions {
    /// Settings shared with GET.
    pub request: RequestOptions,
    /// Replaces [`RetryStatuses::default`] for this call when set.
    pub retry_on_status: Option<RetryStatuses>,
}

impl WriteOptions {
    /// Retries exactly `codes` instead of the default set.
    pub fn with_retry_on_status<I: IntoIterator<Item = u16>>(mut self, codes: I) -> Self {
        self.retry_on_status = Some(RetryStatuses::new(codes));
        self
    }

    /// Status set in force for the call.
    pub fn resolved_statuses(&self) -> RetryStatuses {
        self.retry_on_status.clone().unwrap_or_default()
    }
}

impl From<RequestOptions> for WriteOptions {
    fn from(request: RequestOptions) -> Self {
        Self {
            request,
            retry_on_status: None,
        }
    }
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a number of seconds, got '{raw}'")))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(Error::Config(format!("{key} must be positive, got '{raw}'")));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| Error::Config(format!("{key} is out of range: {err}")))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use reqwest::StatusCode;

    use super::{RequestOptions, RetryStatuses, WriteOptions};
    use crate::Error;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let options = RequestOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.retries, 3);
        assert_eq!(options.retry_backoff, Duration::from_secs(1));
        assert!(options.raise_for_status);
    }

    #[test]
    fn zero_retries_still_attempts_once() {
        assert_eq!(RequestOptions::default().with_retries(0).attempts(), 1);
        assert_eq!(RequestOptions::default().with_retries(4).attempts(), 4);
    }

    #[test]
    fn default_statuses() {
        let statuses = RetryStatuses::default();
        for code in [429, 500, 502, 503, 504] {
            assert!(statuses.contains(StatusCode::from_u16(code).expect("valid code")));
        }
        assert!(!statuses.contains(StatusCode::NOT_FOUND));
        assert!(!statuses.contains(StatusCode::CONFLICT));
    }

    #[test]
    fn write_options_override_replaces_default_set() {
        let options = WriteOptions::default().with_retry_on_status([409]);
        let resolved = options.resolved_statuses();
        assert!(resolved.contains(StatusCode::CONFLICT));
        assert!(!resolved.contains(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(WriteOptions::default().resolved_statuses(), RetryStatuses::default());
    }

    #[test]
    fn validate_rejects_zero_durations() {
        assert!(RequestOptions::default().validate().is_ok());

        let err = RequestOptions::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .expect_err("zero timeout must be rejected");
        assert!(matches!(err, Error::Config(_)));

        let err = RequestOptions::default()
            .with_retry_backoff(Duration::ZERO)
            .validate()
            .expect_err("zero backoff must be rejected");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn from_lookup_reads_values() {
        let options = RequestOptions::from_lookup(lookup(&[
            ("RESILIENT_HTTP_TIMEOUT_S", "2.5"),
            ("RESILIENT_HTTP_RETRIES", "5"),
            ("RESILIENT_HTTP_RETRY_SLEEP_S", "0.25"),
            ("RESILIENT_HTTP_RAISE_FOR_STATUS", "false"),
        ]))
        .expect("valid env must parse");

        assert_eq!(options.timeout, Duration::from_millis(2_500));
        assert_eq!(options.retries, 5);
        assert_eq!(options.retry_backoff, Duration::from_millis(250));
        assert!(!options.raise_for_status);
    }

    #[test]
    fn from_lookup_rejects_non_positive_timeout() {
        let err = RequestOptions::from_lookup(lookup(&[("RESILIENT_HTTP_TIMEOUT_S", "0")]))
            .expect_err("zero timeout must be rejected");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn from_lookup_rejects_garbage_retries() {
        let err = RequestOptions::from_lookup(lookup(&[("RESILIENT_HTTP_RETRIES", "many")]))
            .expect_err("non-numeric retries must be rejected");
        assert!(matches!(err, Error::Config(_)));
    }
}
