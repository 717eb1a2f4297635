//! Response envelope used by the JSON API.
//!
//! The API answers with `{code, data, error, message}`. Server failures
//! carry a `message` (or, for some handlers, a bare JSON array of strings);
//! validation failures carry a non-empty `error` list.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use assetry_core::Error;

/// Decoded API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    pub data: Option<T>,
    pub error: Option<Vec<String>>,
}

impl<T> Envelope<T> {
    /// Apply `f` to the payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope { code: self.code, data: self.data.map(f), error: self.error }
    }
}

/// Validate and decode an envelope body received with `status`.
pub fn decode<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<Envelope<T>, Error> {
    let json: Value =
        serde_json::from_slice(body).map_err(|e| Error::Decode(format!("invalid envelope (status {status}): {e}")))?;

    if status >= 500
        && let Some(message) = json
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| json.get(0).and_then(Value::as_str))
    {
        return Err(Error::Api(message.to_string()));
    }

    let error = match json.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(items.iter().map(value_to_string).collect::<Vec<_>>()),
        Some(other) => Some(vec![value_to_string(other)]),
    };
    if let Some(first) = error.as_ref().and_then(|errors| errors.first()) {
        return Err(Error::Api(first.clone()));
    }

    let code = json.get("code").and_then(Value::as_i64).unwrap_or(i64::from(status));
    let data = match json.get("data") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            T::deserialize(value).map_err(|e| Error::Decode(format!("unexpected envelope data: {e}")))?,
        ),
    };

    Ok(Envelope { code, data, error })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
