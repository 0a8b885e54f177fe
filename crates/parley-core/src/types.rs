use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque JSON object carried by sessions, actors and requests.
pub type DataMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Durable per-conversation state, keyed by the event's source id.
///
/// `topic` names the skill that currently owns the conversation. A session
/// without a topic never carries data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub topic: Option<String>,
    pub data: DataMap,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            topic: None,
            data: DataMap::new(),
            updated_at: now,
        }
    }

    /// Drop the active topic together with its data.
    pub fn clear(&mut self) {
        self.topic = None;
        self.data.clear();
    }

    /// True when more than `timeout` has elapsed since the last persisted
    /// update. A timeout too large to represent never expires.
    pub fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(limit) => now.signed_duration_since(self.updated_at) > limit,
            Err(_) => false,
        }
    }

    /// The topic if it is set and non-empty.
    pub fn active_topic(&self) -> Option<&str> {
        self.topic.as_deref().filter(|t| !t.is_empty())
    }

    /// Empty topic becomes `None`; a topic-less session loses its data.
    pub fn normalize(&mut self) {
        if self.active_topic().is_none() {
            self.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Profile fields reported by a channel for an individual participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: Option<String>,
    pub locale: Option<String>,
    pub avatar_url: Option<String>,
    pub status_message: Option<String>,
}

/// A participant whose `data` survives session resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub display_name: Option<String>,
    pub locale: Option<String>,
    pub avatar_url: Option<String>,
    pub status_message: Option<String>,
    pub data: DataMap,
    pub updated_at: DateTime<Utc>,
}

impl Actor {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            locale: None,
            avatar_url: None,
            status_message: None,
            data: DataMap::new(),
            updated_at: now,
        }
    }

    /// Copy the fields present in `profile`; absent ones are left as they were.
    pub fn apply_profile(&mut self, profile: Profile) {
        if let Some(v) = profile.display_name {
            self.display_name = Some(v);
        }
        if let Some(v) = profile.locale {
            self.locale = Some(v);
        }
        if let Some(v) = profile.avatar_url {
            self.avatar_url = Some(v);
        }
        if let Some(v) = profile.status_message {
            self.status_message = Some(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Kind of source an event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    #[default]
    User,
    Group,
    Room,
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::User => "user",
            SourceType::Group => "group",
            SourceType::Room => "room",
            SourceType::Other(s) => s,
        }
    }
}

impl From<&str> for SourceType {
    fn from(s: &str) -> Self {
        match s {
            "user" => SourceType::User,
            "group" => SourceType::Group,
            "room" => SourceType::Room,
            other => SourceType::Other(other.to_string()),
        }
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        SourceType::from(s.as_str())
    }
}

impl From<SourceType> for String {
    fn from(t: SourceType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form of one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The raw payload as received.
    pub event: Value,
    pub source_id: String,
    pub source_type: SourceType,
    pub timestamp: DateTime<Utc>,
    pub intent: Option<String>,
    pub entities: DataMap,
}

impl Request {
    pub fn new(source_id: impl Into<String>, event: Value) -> Self {
        Self {
            event,
            source_id: source_id.into(),
            source_type: SourceType::User,
            timestamp: Utc::now(),
            intent: None,
            entities: DataMap::new(),
        }
    }

    /// Message text, read from `message.text` or a top-level `text`.
    pub fn text(&self) -> Option<&str> {
        self.event
            .get("message")
            .and_then(|m| m.get("text"))
            .or_else(|| self.event.get("text"))
            .and_then(Value::as_str)
    }

    /// Postback payload, read from `postback.data`.
    pub fn postback_data(&self) -> Option<&str> {
        self.event
            .get("postback")
            .and_then(|p| p.get("data"))
            .and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

fn default_end_session() -> bool {
    true
}

/// What a skill produced for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default = "default_end_session")]
    pub end_session: bool,
}

impl Outcome {
    pub fn new(messages: Vec<Value>, end_session: bool) -> Self {
        Self {
            messages,
            end_session,
        }
    }

    /// A single text message that ends the session.
    pub fn reply(text: impl Into<String>) -> Self {
        Self::new(vec![Value::String(text.into())], true)
    }

    /// A single text message that keeps the session open.
    pub fn continuing(text: impl Into<String>) -> Self {
        Self::new(vec![Value::String(text.into())], false)
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), true)
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::empty()
    }
}
