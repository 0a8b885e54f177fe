//! Skill trait and per-engine registry.
//!
//! A skill owns one topic. While the session's topic names it, every turn
//! for that conversation is handed to it until it ends the session, fails,
//! or is pre-empted by an explicit intent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use parley_core::types::{Actor, Outcome, Request, Session};

use crate::error::{EngineError, SkillError};

/// A topic handler.
///
/// `handle` may mutate `session.data` and, when present, `actor.data`. The
/// actor is absent for group and room sources.
#[async_trait]
pub trait Skill: Send + Sync {
    /// The unique, non-empty topic this skill answers to.
    fn topic(&self) -> &str;

    async fn handle(
        &self,
        request: &Request,
        actor: Option<&mut Actor>,
        session: &mut Session,
    ) -> Result<SkillReply, SkillError>;
}

/// The shapes a skill may answer with. Normalized into an `Outcome`.
#[derive(Debug, Clone, PartialEq)]
pub enum SkillReply {
    Outcome(Outcome),
    /// One message; ends the session.
    Message(Value),
    /// Several messages; ends the session.
    Messages(Vec<Value>),
    /// Nothing to say; ends the session.
    Nothing,
}

impl SkillReply {
    pub fn into_outcome(self) -> Outcome {
        match self {
            SkillReply::Outcome(outcome) => outcome,
            SkillReply::Message(message) => Outcome::new(vec![message], true),
            SkillReply::Messages(messages) => Outcome::new(messages, true),
            SkillReply::Nothing => Outcome::empty(),
        }
    }
}

impl From<Outcome> for SkillReply {
    fn from(outcome: Outcome) -> Self {
        SkillReply::Outcome(outcome)
    }
}

impl From<Value> for SkillReply {
    fn from(message: Value) -> Self {
        SkillReply::Message(message)
    }
}

impl From<Vec<Value>> for SkillReply {
    fn from(messages: Vec<Value>) -> Self {
        SkillReply::Messages(messages)
    }
}

impl From<String> for SkillReply {
    fn from(text: String) -> Self {
        SkillReply::Message(Value::String(text))
    }
}

impl From<&str> for SkillReply {
    fn from(text: &str) -> Self {
        SkillReply::Message(Value::String(text.to_string()))
    }
}

impl From<()> for SkillReply {
    fn from(_: ()) -> Self {
        SkillReply::Nothing
    }
}

/// Topic-keyed table of skills owned by one pipeline.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an ordered list; later duplicates win.
    pub fn from_skills(
        skills: impl IntoIterator<Item = Arc<dyn Skill>>,
    ) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for skill in skills {
            registry.register(skill)?;
        }
        Ok(registry)
    }

    /// Register a skill under its topic, replacing any previous holder.
    pub fn register(&mut self, skill: Arc<dyn Skill>) -> Result<(), EngineError> {
        let topic = skill.topic().to_string();
        if topic.is_empty() {
            return Err(EngineError::InvalidTopic);
        }
        if self.skills.insert(topic.clone(), skill).is_some() {
            tracing::warn!(topic = %topic, "Skill topic registered twice; last registration wins");
        }
        Ok(())
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(topic).cloned()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.skills.contains_key(topic)
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named {
        topic: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Skill for Named {
        fn topic(&self) -> &str {
            self.topic
        }

        async fn handle(
            &self,
            _request: &Request,
            _actor: Option<&mut Actor>,
            _session: &mut Session,
        ) -> Result<SkillReply, SkillError> {
            Ok(self.reply.into())
        }
    }

    fn named(topic: &'static str, reply: &'static str) -> Arc<dyn Skill> {
        Arc::new(Named { topic, reply })
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = SkillRegistry::new();
        assert!(registry.is_empty());
        registry.register(named("echo", "a")).unwrap();
        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_topic_rejected() {
        let mut registry = SkillRegistry::new();
        let err = registry.register(named("", "a")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTopic));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_topic_last_wins() {
        let registry =
            SkillRegistry::from_skills(vec![named("echo", "first"), named("echo", "second")])
                .unwrap();
        assert_eq!(registry.len(), 1);

        let skill = registry.get("echo").unwrap();
        let request = Request::new("u1", json!({}));
        let mut session = Session::new("u1", chrono::Utc::now());
        let reply = skill.handle(&request, None, &mut session).await.unwrap();
        assert_eq!(reply, SkillReply::Message(json!("second")));
    }

    #[test]
    fn test_reply_normalization() {
        assert_eq!(
            SkillReply::from("hi").into_outcome(),
            Outcome::new(vec![json!("hi")], true)
        );
        assert_eq!(
            SkillReply::from(vec![json!("a"), json!("b")]).into_outcome(),
            Outcome::new(vec![json!("a"), json!("b")], true)
        );
        assert_eq!(SkillReply::from(()).into_outcome(), Outcome::empty());

        let open = Outcome::continuing("more?");
        assert_eq!(SkillReply::from(open.clone()).into_outcome(), open);
    }

    #[test]
    fn test_topics_sorted() {
        let registry =
            SkillRegistry::from_skills(vec![named("b", "x"), named("a", "y")]).unwrap();
        assert_eq!(registry.topics(), vec!["a", "b"]);
    }
}
