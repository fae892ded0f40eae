use reqwest::{
    header::{AsHeaderName, HeaderMap},
    StatusCode,
};
use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Fully buffered HTTP response returned by a [`Transport`](crate::Transport).
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    /// Builds a response from already-buffered parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Status code of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// All response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Looks up a header value as a string. Header names are case-insensitive.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Raw body bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::Encode)
    }

    /// Returns `true` for 4xx and 5xx statuses.
    pub fn is_error_status(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }

    /// Turns a 4xx/5xx response into [`Error::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_error_status() {
            Err(Error::Status {
                status: self.status.as_u16(),
                response: Box::new(self),
            })
        } else {
            Ok(self)
        }
    }
}
