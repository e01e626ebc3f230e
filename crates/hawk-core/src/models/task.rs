use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::WorkerError;

/// Unit of work handed to a handler.
///
/// The payload is the raw message body as a string. An absent payload means
/// the message carried no body at all; handlers decide what that means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Task {
    payload: Option<String>,
}

impl Task {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }

    /// A task without payload.
    pub fn empty() -> Self {
        Self { payload: None }
    }

    /// Builds a task from a raw message body.
    ///
    /// An empty body yields a task without payload. A body that is not UTF-8
    /// or not a well-formed JSON document is a parse failure. The payload is
    /// kept byte-for-byte; it is validated, not re-serialised.
    pub fn from_body(body: &[u8]) -> Result<Self, WorkerError> {
        if body.is_empty() {
            return Ok(Self::empty());
        }

        let payload = std::str::from_utf8(body)
            .map_err(|e| WorkerError::Parse(format!("body is not valid UTF-8: {}", e)))?;

        serde_json::from_str::<serde_json::Value>(payload)
            .map_err(|e| WorkerError::Parse(format!("body is not valid JSON: {}", e)))?;

        Ok(Self::new(payload))
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn into_payload(self) -> Option<String> {
        self.payload
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.payload {
            Some(payload) => write!(f, "{}", payload),
            None => write!(f, "<no payload>"),
        }
    }
}
