//! Error-event schema
//!
//! Events are sent by catchers (language-specific SDKs) and routed through the
//! processors. Missing and `null` fields decode to their empty value; a field
//! of the wrong type is a decoding error.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    #[serde(deserialize_with = "null_as_default")]
    pub project_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub payload: EventPayload,
    /// Name of the catcher, e.g. `errors/nodejs`
    #[serde(deserialize_with = "null_as_default")]
    pub catcher_type: String,
}

impl Event {
    /// Whether the event carries enough to be grouped: a project and an
    /// error type.
    pub fn is_routable(&self) -> bool {
        !self.project_id.is_empty() && !self.payload.kind.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    /// Error class, e.g. `TypeError`
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub backtrace: Vec<BacktraceFrame>,
    /// Free-form context attached by the application
    pub context: Option<serde_json::Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub catcher_version: String,
    /// Unix timestamp, seconds
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BacktraceFrame {
    #[serde(deserialize_with = "null_as_default")]
    pub file: String,
    #[serde(deserialize_with = "null_as_default")]
    pub line: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub column: i64,
    pub function: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub source_code: Vec<SourceLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLine {
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub line: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
