//! Demo skills wired into the binary.
//!
//! `echo` answers once and ends the conversation. `chat` keeps the session
//! open, counting turns, until the user says "bye".

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use parley_core::types::{Actor, Outcome, Request, Session};
use parley_engine::{KeywordIntentExtractor, Skill, SkillError, SkillReply};

pub const ECHO_TOPIC: &str = "echo";
pub const CHAT_TOPIC: &str = "chat";

pub struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn topic(&self) -> &str {
        ECHO_TOPIC
    }

    async fn handle(
        &self,
        request: &Request,
        _actor: Option<&mut Actor>,
        _session: &mut Session,
    ) -> Result<SkillReply, SkillError> {
        let text = request
            .entities
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| request.text())
            .unwrap_or_default();
        Ok(text.to_string().into())
    }
}

/// Multi-turn echo. Keeps `turns` in the session and the last message in
/// the actor's data when the sender is addressable.
pub struct MultiTurnEcho;

#[async_trait]
impl Skill for MultiTurnEcho {
    fn topic(&self) -> &str {
        CHAT_TOPIC
    }

    async fn handle(
        &self,
        request: &Request,
        actor: Option<&mut Actor>,
        session: &mut Session,
    ) -> Result<SkillReply, SkillError> {
        let text = request.text().unwrap_or_default().trim().to_string();

        if text.eq_ignore_ascii_case("bye") {
            return Ok(Outcome::reply("bye").into());
        }

        let turns = session.data.get("turns").and_then(Value::as_u64).unwrap_or(0) + 1;
        session.data.insert("turns".to_string(), Value::from(turns));

        if let Some(actor) = actor {
            actor
                .data
                .insert("last_message".to_string(), Value::String(text.clone()));
        }

        Ok(Outcome::continuing(format!("[{}] {}", turns, text)).into())
    }
}

pub fn demo_skills() -> Vec<Arc<dyn Skill>> {
    vec![Arc::new(EchoSkill), Arc::new(MultiTurnEcho)]
}

/// `echo <text>` and `chat` start their skills; anything else with no
/// active topic falls back to echo.
pub fn demo_extractor() -> Result<KeywordIntentExtractor, Box<dyn std::error::Error>> {
    Ok(KeywordIntentExtractor::new()
        .rule(r"(?i)^echo\s+(?P<text>.+)$", ECHO_TOPIC)?
        .rule(r"(?i)^chat\b", CHAT_TOPIC)?
        .with_fallback(ECHO_TOPIC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_engine::IntentExtractor;
    use serde_json::json;

    fn text_request(text: &str) -> Request {
        Request::new("u1", json!({ "message": { "text": text } }))
    }

    #[tokio::test]
    async fn test_echo_prefers_captured_text() {
        let mut request = text_request("echo   hello");
        request
            .entities
            .insert("text".to_string(), Value::String("hello".to_string()));
        let mut session = Session::new("u1", Default::default());

        let reply = EchoSkill
            .handle(&request, None, &mut session)
            .await
            .unwrap()
            .into_outcome();
        assert_eq!(reply.messages, vec![Value::String("hello".to_string())]);
        assert!(reply.end_session);
    }

    #[tokio::test]
    async fn test_multi_turn_counts_and_ends_on_bye() {
        let mut session = Session::new("u1", Default::default());
        let mut actor = Actor::new("u1", Default::default());

        let first = MultiTurnEcho
            .handle(&text_request("chat"), Some(&mut actor), &mut session)
            .await
            .unwrap()
            .into_outcome();
        assert!(!first.end_session);
        assert_eq!(first.messages, vec![Value::String("[1] chat".to_string())]);

        let second = MultiTurnEcho
            .handle(&text_request("again"), Some(&mut actor), &mut session)
            .await
            .unwrap()
            .into_outcome();
        assert_eq!(second.messages, vec![Value::String("[2] again".to_string())]);
        assert_eq!(actor.data["last_message"], "again");

        let last = MultiTurnEcho
            .handle(&text_request("Bye"), None, &mut session)
            .await
            .unwrap()
            .into_outcome();
        assert!(last.end_session);
    }

    #[tokio::test]
    async fn test_demo_extractor_rules() {
        let extractor = demo_extractor().unwrap();
        let session = Session::new("u1", Default::default());

        let c = extractor
            .extract(&text_request("echo hi there"), None, &session)
            .await
            .unwrap();
        assert_eq!(c.intent.as_deref(), Some(ECHO_TOPIC));
        assert_eq!(c.entities["text"], "hi there");

        let c = extractor
            .extract(&text_request("Chat please"), None, &session)
            .await
            .unwrap();
        assert_eq!(c.intent.as_deref(), Some(CHAT_TOPIC));

        let c = extractor
            .extract(&text_request("random"), None, &session)
            .await
            .unwrap();
        assert_eq!(c.intent.as_deref(), Some(ECHO_TOPIC));
    }
}
