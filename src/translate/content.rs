//! Lenient content model shared by both wire formats.
//!
//! Message and system content arrive as a string, an array of parts, or something
//! unexpected. All three are modelled explicitly so every coercion is an exhaustive
//! match, and deserialization never fails: unknown shapes are kept as raw JSON and
//! rendered as their JSON text when a flat string is needed.

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// A `{"type":"text"}` part; any other keys (e.g. `cache_control`) are kept in `extra`.
    Text {
        text: String,
        extra: Map<String, Value>,
    },
    Other(Value),
}

impl Content {
    /// Flatten to a string: text parts contribute their text, anything else its JSON.
    pub fn flatten(&self, separator: &str) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(Part::flatten)
                .collect::<Vec<_>>()
                .join(separator),
            Self::Unknown(value) => json_text(value),
        }
    }

    /// Only the prose: text parts and bare strings, other parts contribute nothing.
    pub fn prose(&self, separator: &str) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    Part::Text { text, .. } => text.as_str(),
                    Part::Other(Value::String(text)) => text.as_str(),
                    Part::Other(_) => "",
                })
                .collect::<Vec<_>>()
                .join(separator),
            Self::Unknown(Value::String(text)) => text.clone(),
            Self::Unknown(_) => String::new(),
        }
    }
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn flatten(&self) -> String {
        match self {
            Self::Text { text, .. } => text.clone(),
            Self::Other(value) => json_text(value),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Unknown(Value::Null)
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Array(items) => Self::Parts(items.into_iter().map(Part::from).collect()),
            other => Self::Unknown(other),
        }
    }
}

impl From<Value> for Part {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut map)
                if map.get("type").and_then(Value::as_str) == Some("text")
                    && map.get("text").is_some_and(Value::is_string) =>
            {
                map.remove("type");
                let text = match map.remove("text") {
                    Some(Value::String(text)) => text,
                    _ => String::new(),
                };
                Self::Text { text, extra: map }
            }
            other => Self::Other(other),
        }
    }
}

impl<'de> Deserialize<'de> for Content {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

impl Serialize for Content {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Parts(parts) => parts.serialize(serializer),
            Self::Unknown(value) => value.serialize(serializer),
        }
    }
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text { text, extra } => {
                let mut map = serializer.serialize_map(Some(extra.len() + 2))?;
                map.serialize_entry("type", "text")?;
                map.serialize_entry("text", text)?;
                for (key, value) in extra {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Self::Other(value) => value.serialize(serializer),
        }
    }
}

/// A value as text: strings verbatim, null as empty, everything else as compact JSON.
pub fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// JavaScript-style truthiness, used where the wire formats coerce flags.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Deserialize a field, falling back to its default when the shape doesn't fit.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Deserialize an array item by item; items that don't fit become their default.
pub(crate) fn lenient_items<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    })
}

/// Deserialize an optional array keeping only the items that fit.
pub(crate) fn well_formed_items<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}
