//! Topic routing.

use std::sync::Arc;

use parley_core::types::{Request, Session};

use crate::skill::{Skill, SkillRegistry};

/// Chooses the skill for a turn from the request intent and session topic.
#[derive(Debug)]
pub struct Router {
    registry: SkillRegistry,
}

impl Router {
    pub fn new(registry: SkillRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// An explicit intent naming a registered topic clears the session and
    /// takes it over. Otherwise the session's current topic continues.
    pub fn route(&self, request: &Request, session: &mut Session) -> Option<Arc<dyn Skill>> {
        if let Some(intent) = request.intent.as_deref() {
            if self.registry.contains(intent) {
                session.clear();
                session.topic = Some(intent.to_string());
            }
        }

        session
            .active_topic()
            .and_then(|topic| self.registry.get(topic))
    }
}
