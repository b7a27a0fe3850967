//! RON encoding of document trees.

use super::error::{DeserializeError, SerializeError};
use super::value::Value;

/// Encodes a document as RON text.
pub fn encode(value: &Value, pretty: bool) -> Result<String, SerializeError> {
    let text = if pretty {
        ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())
    } else {
        ron::to_string(value)
    };
    text.map_err(|e| SerializeError::Format(e.to_string()))
}

/// Decodes RON text into a document tree.
pub fn decode(text: &str) -> Result<Value, DeserializeError> {
    ron::from_str(text).map_err(|e| DeserializeError::Format(e.to_string()))
}
