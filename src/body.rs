use serde::Serialize;

use crate::Result;

/// Request payload for write verbs.
///
/// Exactly one representation is sent per request; use `Option<Body>` for
/// requests without a payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// JSON document, sent with `Content-Type: application/json`.
    Json(serde_json::Value),
    /// Raw bytes, sent as-is.
    Raw(Vec<u8>),
    /// Form fields, sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

impl Body {
    /// Serializes any `Serialize` value into a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Raw bytes body.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Raw(bytes.into())
    }

    /// Builds form fields from key/value pairs.
    pub fn form<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Form(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Raw(text.as_bytes().to_vec())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Raw(text.into_bytes())
    }
}
