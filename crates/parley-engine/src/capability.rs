//! Injected capabilities around the pipeline.
//!
//! Each capability is a single-method trait with a default implementation,
//! so a pipeline can be assembled with only the pieces a channel needs to
//! override.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use parley_core::types::{Actor, DataMap, Outcome, Profile, Request, Session, SourceType};

use crate::error::{EngineError, SkillError};

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

/// Converts a raw channel payload into a `Request`.
pub trait EventCanonicalizer: Send + Sync {
    fn canonicalize(&self, event: &Value) -> Result<Request, EngineError>;
}

/// Reads a flat JSON event.
///
/// Recognized fields: `source_id` (required, or `source.id`), `source_type`
/// (or `source.type`, default `user`), `timestamp` (RFC 3339 string or unix
/// seconds, default now), `intent` and `entities`. The whole payload is kept
/// as `Request::event`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCanonicalizer;

impl JsonCanonicalizer {
    fn field<'a>(event: &'a Value, flat: &str, nested: &str) -> Option<&'a Value> {
        event
            .get(flat)
            .or_else(|| event.get("source").and_then(|s| s.get(nested)))
    }

    fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>, EngineError> {
        match value {
            None | Some(Value::Null) => Ok(Utc::now()),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| EngineError::MalformedEvent(format!("invalid timestamp: {}", e))),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| {
                    EngineError::MalformedEvent(format!("timestamp out of range: {}", n))
                }),
            Some(other) => Err(EngineError::MalformedEvent(format!(
                "unsupported timestamp: {}",
                other
            ))),
        }
    }
}

impl EventCanonicalizer for JsonCanonicalizer {
    fn canonicalize(&self, event: &Value) -> Result<Request, EngineError> {
        if !event.is_object() {
            return Err(EngineError::MalformedEvent(
                "event must be a JSON object".to_string(),
            ));
        }

        let source_id = Self::field(event, "source_id", "id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::MalformedEvent("missing source_id".to_string()))?;

        let source_type = Self::field(event, "source_type", "type")
            .and_then(Value::as_str)
            .map(SourceType::from)
            .unwrap_or_default();

        let intent = match event.get("intent") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(EngineError::MalformedEvent(format!(
                    "intent must be a string, got {}",
                    other
                )))
            }
        };

        let entities = match event.get("entities") {
            None | Some(Value::Null) => DataMap::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(EngineError::MalformedEvent(
                    "entities must be an object".to_string(),
                ))
            }
        };

        Ok(Request {
            event: event.clone(),
            source_id: source_id.to_string(),
            source_type,
            timestamp: Self::parse_timestamp(event.get("timestamp"))?,
            intent,
            entities,
        })
    }
}

// ---------------------------------------------------------------------------
// Intent classification
// ---------------------------------------------------------------------------

/// Result of intent extraction: an optional topic plus extracted entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub intent: Option<String>,
    pub entities: DataMap,
}

impl Classification {
    pub fn none() -> Self {
        Self::default()
    }
}

impl From<&str> for Classification {
    fn from(intent: &str) -> Self {
        Some(intent.to_string()).into()
    }
}

impl From<String> for Classification {
    fn from(intent: String) -> Self {
        Some(intent).into()
    }
}

impl From<Option<String>> for Classification {
    fn from(intent: Option<String>) -> Self {
        Self {
            intent,
            entities: DataMap::new(),
        }
    }
}

impl From<(String, DataMap)> for Classification {
    fn from((intent, entities): (String, DataMap)) -> Self {
        Self {
            intent: Some(intent),
            entities,
        }
    }
}

impl From<(&str, DataMap)> for Classification {
    fn from((intent, entities): (&str, DataMap)) -> Self {
        (intent.to_string(), entities).into()
    }
}

impl From<(Option<String>, DataMap)> for Classification {
    fn from((intent, entities): (Option<String>, DataMap)) -> Self {
        Self { intent, entities }
    }
}

/// Decides which topic an event asks for.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(
        &self,
        request: &Request,
        actor: Option<&Actor>,
        session: &Session,
    ) -> Result<Classification, SkillError>;
}

/// Keeps whatever intent and entities the canonicalizer found.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughIntent;

#[async_trait]
impl IntentExtractor for PassthroughIntent {
    async fn extract(
        &self,
        request: &Request,
        _actor: Option<&Actor>,
        _session: &Session,
    ) -> Result<Classification, SkillError> {
        Ok((request.intent.clone(), request.entities.clone()).into())
    }
}

struct KeywordRule {
    regex: Regex,
    topic: String,
}

/// Ordered regex rules over message text (or postback data).
///
/// The first matching rule wins and its named capture groups become
/// entities. With no match, an intent already on the request is kept; the
/// fallback topic applies only when the session has no active topic.
#[derive(Default)]
pub struct KeywordIntentExtractor {
    rules: Vec<KeywordRule>,
    fallback: Option<String>,
}

impl KeywordIntentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, pattern: &str, topic: impl Into<String>) -> Result<Self, regex::Error> {
        self.rules.push(KeywordRule {
            regex: Regex::new(pattern)?,
            topic: topic.into(),
        });
        Ok(self)
    }

    pub fn with_fallback(mut self, topic: impl Into<String>) -> Self {
        self.fallback = Some(topic.into());
        self
    }

    fn classify(&self, request: &Request, session: &Session) -> Classification {
        if let Some(text) = request.text().or_else(|| request.postback_data()) {
            for rule in &self.rules {
                if let Some(caps) = rule.regex.captures(text) {
                    let mut entities = DataMap::new();
                    for name in rule.regex.capture_names().flatten() {
                        if let Some(m) = caps.name(name) {
                            entities
                                .insert(name.to_string(), Value::String(m.as_str().to_string()));
                        }
                    }
                    return (rule.topic.clone(), entities).into();
                }
            }
        }

        if request.intent.is_some() {
            return (request.intent.clone(), request.entities.clone()).into();
        }

        match &self.fallback {
            Some(topic) if session.active_topic().is_none() => topic.clone().into(),
            _ => Classification::none(),
        }
    }
}

#[async_trait]
impl IntentExtractor for KeywordIntentExtractor {
    async fn extract(
        &self,
        request: &Request,
        _actor: Option<&Actor>,
        session: &Session,
    ) -> Result<Classification, SkillError> {
        Ok(self.classify(request, session))
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Sends an outcome back to the channel.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        request: &Request,
        actor: Option<&Actor>,
        session: &Session,
        outcome: &Outcome,
    ) -> Result<(), SkillError>;
}

/// Logs the outcome and sends nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeliverer;

#[async_trait]
impl Deliverer for NoopDeliverer {
    async fn deliver(
        &self,
        request: &Request,
        _actor: Option<&Actor>,
        _session: &Session,
        outcome: &Outcome,
    ) -> Result<(), SkillError> {
        tracing::debug!(
            source_id = %request.source_id,
            messages = outcome.messages.len(),
            "Outcome not delivered (no deliverer configured)"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Actor resolution
// ---------------------------------------------------------------------------

/// Whether a request has an individual actor, and its profile if known.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorLookup {
    /// The source is a group or room with no individual to track.
    NotAddressable,
    /// The source is an individual; `Some` profile refreshes the actor.
    Addressable(Option<Profile>),
}

/// Resolves the actor behind a request.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn lookup(&self, request: &Request) -> Result<ActorLookup, SkillError>;
}

/// Treats every source as an individual with no profile information.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAddressable;

#[async_trait]
impl ProfileLookup for AlwaysAddressable {
    async fn lookup(&self, _request: &Request) -> Result<ActorLookup, SkillError> {
        Ok(ActorLookup::Addressable(None))
    }
}

/// Only `user` sources have an actor. Profiles come from a static directory
/// keyed by source id.
#[derive(Debug, Default, Clone)]
pub struct AddressableProfiles {
    profiles: HashMap<String, Profile>,
}

impl AddressableProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, source_id: impl Into<String>, profile: Profile) -> Self {
        self.profiles.insert(source_id.into(), profile);
        self
    }
}

#[async_trait]
impl ProfileLookup for AddressableProfiles {
    async fn lookup(&self, request: &Request) -> Result<ActorLookup, SkillError> {
        match request.source_type {
            SourceType::User => Ok(ActorLookup::Addressable(
                self.profiles.get(&request.source_id).cloned(),
            )),
            _ => Ok(ActorLookup::NotAddressable),
        }
    }
}
