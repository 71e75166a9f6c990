use std::collections::HashMap;
use std::fmt;

use super::error::SocketError;
use super::frame::{parse_header_block, Frame};

/// Known event kinds the collector reacts to.
///
/// Everything the collector does not special-case is carried through as
/// `Other` with its original `Event-Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Heartbeat,
    Other(String),
    Unnamed,
}

impl EventKind {
    /// Classify a raw `Event-Name` value.
    pub fn from_name(name: &str) -> Self {
        match name {
            "HEARTBEAT" => Self::Heartbeat,
            "" => Self::Unnamed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the label used for the per-event counter.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::Other(name) => name,
            Self::Unnamed => "",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An asynchronous notification pushed by the switch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl Event {
    pub fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        Self { headers, body }
    }

    /// Build an event carrying only an `Event-Name` header.
    pub fn named(name: &str) -> Self {
        let mut headers = HashMap::with_capacity(1);
        headers.insert("Event-Name".to_string(), name.to_string());
        Self {
            headers,
            body: None,
        }
    }

    /// Decode an event frame (`text/event-json` or `text/event-plain`).
    pub fn from_frame(frame: &Frame) -> Result<Self, SocketError> {
        let body = frame.body.as_deref().unwrap_or_default();

        match frame.content_type() {
            Some("text/event-json") => decode_json(body),
            Some("text/event-plain") => decode_plain(body),
            other => Err(SocketError::Malformed(format!(
                "not an event frame: {other:?}"
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns the raw `Event-Name` header, or "" when missing.
    pub fn name(&self) -> &str {
        self.get("Event-Name").unwrap_or_default()
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_name(self.name())
    }
}

fn decode_json(body: &str) -> Result<Event, SocketError> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| SocketError::Malformed(format!("event json: {e}")))?;

    let mut headers = HashMap::with_capacity(map.len());
    let mut event_body = None;

    for (key, value) in map {
        let value = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        if key == "_body" {
            event_body = Some(value);
        } else {
            headers.insert(key, value);
        }
    }

    Ok(Event::new(headers, event_body))
}

fn decode_plain(body: &str) -> Result<Event, SocketError> {
    // A plain event is a header block, optionally followed by its own body.
    let (block, rest) = match body.split_once("\n\n") {
        Some((block, rest)) => (block, Some(rest)),
        None => (body, None),
    };

    let headers = parse_header_block(block)?;
    let event_body = match (headers.get("Content-Length"), rest) {
        (Some(_), Some(rest)) => Some(rest.to_string()),
        _ => None,
    };

    Ok(Event::new(headers, event_body))
}

/// The switch's answer to a single command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Reply {
    pub fn new(headers: HashMap<String, String>, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Build an `api/response` reply with the given body.
    pub fn api(body: impl Into<String>) -> Self {
        let mut headers = HashMap::with_capacity(1);
        headers.insert("Content-Type".to_string(), "api/response".to_string());
        Self::new(headers, body)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.headers.get("Reply-Text").map(String::as_str)
    }

    /// Convert a reply frame into a result, surfacing `-ERR` answers.
    pub fn from_frame(frame: Frame) -> Result<Self, SocketError> {
        let reply = Self::new(frame.headers, frame.body.unwrap_or_default());

        if let Some(text) = reply.reply_text() {
            if text.starts_with("-ERR") {
                return Err(SocketError::Command(text.to_string()));
            }
        }
        if reply.body.starts_with("-ERR") {
            return Err(SocketError::Command(reply.body.trim().to_string()));
        }

        Ok(reply)
    }
}
