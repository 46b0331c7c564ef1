//! Wire envelopes.
//!
//! Requests are `{Action, Data?, ResponseMessageID?}` with field names matched
//! case-insensitively. Responses and pushes are
//! `{MessageID?, Time, Topic, Data}`; `MessageID` echoes the request's
//! `ResponseMessageID` and is omitted when absent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::errors::DispatchError;

/// A parsed client request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestEnvelope {
    /// Action name, trimmed.
    pub action: String,
    /// `None` when `Data` is absent or null.
    pub data: Option<Value>,
    /// Echoed back as the reply's `MessageID`.
    pub response_message_id: Option<String>,
}

impl RequestEnvelope {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_str(text).map_err(|e| DispatchError::InvalidEnvelope(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(DispatchError::InvalidEnvelope("expected a JSON object".into()));
        };

        let mut action = None;
        let mut data = None;
        let mut response_message_id = None;
        for (name, value) in fields {
            if name.eq_ignore_ascii_case("Action") {
                action = value.as_str().map(str::to_owned);
            } else if name.eq_ignore_ascii_case("Data") {
                data = Some(value).filter(|v| !v.is_null());
            } else if name.eq_ignore_ascii_case("ResponseMessageID") {
                response_message_id = value.as_str().map(str::to_owned);
            }
        }

        let action = action
            .map(|a| a.trim().to_owned())
            .filter(|a| !a.is_empty())
            .ok_or(DispatchError::MissingAction)?;
        Ok(Self {
            action,
            data,
            response_message_id,
        })
    }
}

/// A server-to-client message.
#[derive(Clone, Debug, Serialize)]
pub struct ResponseEnvelope<T> {
    /// Correlates a reply with its request. Absent on pushes.
    #[serde(rename = "MessageID", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// When the message was built.
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
    /// Action name for replies, push topic otherwise.
    #[serde(rename = "Topic")]
    pub topic: String,
    /// Payload.
    #[serde(rename = "Data")]
    pub data: T,
}

impl<T: Serialize> ResponseEnvelope<T> {
    /// Push on `topic`, stamped now.
    pub fn new(topic: impl Into<String>, data: T) -> Self {
        Self {
            message_id: None,
            time: Utc::now(),
            topic: topic.into(),
            data,
        }
    }

    /// Echo the request's `ResponseMessageID`.
    #[must_use]
    pub fn in_reply_to(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    /// Serialize to the text sent on the socket.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
