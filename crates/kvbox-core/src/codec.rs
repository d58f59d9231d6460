//! JSON value codec shared by every store.
//!
//! Structured values are stored as JSON text inside a string. On the way out a stored
//! string is decoded when it parses as JSON; anything else (numbers, booleans, plain
//! strings that are not JSON) passes through untouched.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode failed: {reason}")]
    Encode { reason: String },
    #[error("decode failed: {reason}")]
    Decode { reason: String },
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Encode {
        reason: e.to_string(),
    })
}

pub fn decode(text: &str) -> Result<Value, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })
}

/// Convert a decoded value into a caller type.
pub fn decode_into<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })
}

/// Apply the read-side passthrough rule to a raw stored value.
pub fn decode_stored(raw: Value) -> Value {
    match raw {
        Value::String(text) => match decode(&text) {
            Ok(decoded) => decoded,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        age: Option<u32>,
    }

    #[test]
    fn structured_value_round_trips() {
        let profile = Profile {
            name: "ada".into(),
            tags: vec!["admin".into()],
            age: None,
        };
        let text = encode(&profile).expect("encode");
        let value = decode(&text).expect("decode");
        assert_eq!(
            value,
            json!({"name": "ada", "tags": ["admin"], "age": null})
        );
        assert_eq!(decode_into::<Profile>(value).expect("typed"), profile);
    }

    #[test]
    fn encoded_strings_are_decoded_on_read() {
        let stored = Value::String(encode(&json!({"a": [1, 2]})).expect("encode"));
        assert_eq!(decode_stored(stored), json!({"a": [1, 2]}));
    }

    #[test]
    fn non_json_strings_pass_through() {
        let stored = Value::String("hello world".into());
        assert_eq!(decode_stored(stored.clone()), stored);
    }

    #[test]
    fn raw_scalars_pass_through() {
        assert_eq!(decode_stored(json!(42)), json!(42));
        assert_eq!(decode_stored(json!(true)), json!(true));
        assert_eq!(decode_stored(json!(["x"])), json!(["x"]));
    }

    #[test]
    fn decode_reports_invalid_json() {
        assert!(matches!(decode("{"), Err(CodecError::Decode { .. })));
    }
}
