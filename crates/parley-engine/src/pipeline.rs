//! The per-event turn loop.
//!
//! One batch opens one store connection and runs its events in order. Each
//! event is an independent unit of work: whatever happens inside the turn,
//! the session, actor and history record are staged and committed at the
//! end, and a failed turn leaves the session cleared.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use parley_core::config::EngineConfig;
use parley_core::error::ParleyError;
use parley_core::history::{HistoryRecord, HistoryVerbosity};
use parley_core::types::{Actor, Outcome, Request, Session};
use parley_storage::store::{SessionStore, StoreConnection};

use crate::capability::{
    ActorLookup, AlwaysAddressable, Deliverer, EventCanonicalizer, IntentExtractor,
    JsonCanonicalizer, NoopDeliverer, PassthroughIntent, ProfileLookup,
};
use crate::error::{EngineError, SkillError};
use crate::history::{HistoryRecorder, TurnRecord};
use crate::router::Router;
use crate::skill::{Skill, SkillRegistry};

/// How a single event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// A skill ran and its outcome was delivered.
    Completed,
    /// No registered skill matched; state was still persisted.
    NoSkill,
    /// The turn raised an error; the session was cleared.
    Failed,
    /// The event could not be canonicalized and was dropped.
    Malformed,
}

/// Result of `Pipeline::handle_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    pub status: TurnStatus,
    /// Whether the unit of work was committed.
    pub persisted: bool,
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Events that produced a turn (completed, unrouted or failed).
    pub processed: usize,
    /// Turns that recorded an error.
    pub failed: usize,
    /// Events dropped before any state was touched.
    pub malformed: usize,
    /// Turns whose commit failed and was rolled back.
    pub unpersisted: usize,
}

impl BatchReport {
    fn record(&mut self, summary: TurnSummary) {
        match summary.status {
            TurnStatus::Malformed => {
                self.malformed += 1;
                return;
            }
            TurnStatus::Failed => self.failed += 1,
            TurnStatus::Completed | TurnStatus::NoSkill => {}
        }
        self.processed += 1;
        if !summary.persisted {
            self.unpersisted += 1;
        }
    }
}

/// Assembles a `Pipeline`. Every capability has a default.
pub struct PipelineBuilder {
    store: Arc<dyn SessionStore>,
    skills: Vec<Arc<dyn Skill>>,
    canonicalizer: Arc<dyn EventCanonicalizer>,
    extractor: Arc<dyn IntentExtractor>,
    deliverer: Arc<dyn Deliverer>,
    profiles: Arc<dyn ProfileLookup>,
    verbosity: HistoryVerbosity,
    stale_timeout: Duration,
}

impl PipelineBuilder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            store,
            skills: Vec::new(),
            canonicalizer: Arc::new(JsonCanonicalizer),
            extractor: Arc::new(PassthroughIntent),
            deliverer: Arc::new(NoopDeliverer),
            profiles: Arc::new(AlwaysAddressable),
            verbosity: defaults.history_verbosity,
            stale_timeout: defaults.stale_timeout(),
        }
    }

    /// Apply staleness and history settings from configuration.
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.verbosity = config.history_verbosity;
        self.stale_timeout = config.stale_timeout();
        self
    }

    pub fn stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    pub fn history_verbosity(mut self, verbosity: HistoryVerbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn skill(mut self, skill: Arc<dyn Skill>) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn skills(mut self, skills: impl IntoIterator<Item = Arc<dyn Skill>>) -> Self {
        self.skills.extend(skills);
        self
    }

    pub fn canonicalizer(mut self, canonicalizer: Arc<dyn EventCanonicalizer>) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn intent_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn deliverer(mut self, deliverer: Arc<dyn Deliverer>) -> Self {
        self.deliverer = deliverer;
        self
    }

    pub fn profile_lookup(mut self, profiles: Arc<dyn ProfileLookup>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Register the skills in order and build. Fails on an empty topic.
    pub fn build(self) -> Result<Pipeline, EngineError> {
        let registry = SkillRegistry::from_skills(self.skills)?;
        if registry.is_empty() {
            warn!("Pipeline built with no skills; every event will go unrouted");
        }
        Ok(Pipeline {
            store: self.store,
            router: Router::new(registry),
            canonicalizer: self.canonicalizer,
            extractor: self.extractor,
            deliverer: self.deliverer,
            profiles: self.profiles,
            recorder: HistoryRecorder::new(self.verbosity),
            stale_timeout: self.stale_timeout,
        })
    }
}

/// Processes batches of raw events against a session store.
pub struct Pipeline {
    store: Arc<dyn SessionStore>,
    router: Router,
    canonicalizer: Arc<dyn EventCanonicalizer>,
    extractor: Arc<dyn IntentExtractor>,
    deliverer: Arc<dyn Deliverer>,
    profiles: Arc<dyn ProfileLookup>,
    recorder: HistoryRecorder,
    stale_timeout: Duration,
}

impl Pipeline {
    pub fn builder(store: Arc<dyn SessionStore>) -> PipelineBuilder {
        PipelineBuilder::new(store)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Run a batch sequentially on one store connection.
    ///
    /// Only a failure to connect is returned; every per-event failure is
    /// handled inside its turn and counted in the report.
    pub async fn process_events(&self, events: Vec<Value>) -> Result<BatchReport, EngineError> {
        let mut conn = self.store.connect().map_err(|e| {
            error!(error = %e, events = events.len(), "Failed to connect to session store");
            EngineError::Connection(e.to_string())
        })?;

        let mut report = BatchReport::default();
        for event in &events {
            let summary = self.handle_event(conn.as_mut(), event).await;
            report.record(summary);
        }

        debug!(
            processed = report.processed,
            failed = report.failed,
            malformed = report.malformed,
            unpersisted = report.unpersisted,
            "Batch finished"
        );
        Ok(report)
    }

    /// Run one event as a complete turn on an open connection.
    ///
    /// A panic inside a skill or capability is caught and handled like any
    /// other turn failure.
    pub async fn handle_event(&self, conn: &mut dyn StoreConnection, event: &Value) -> TurnSummary {
        let mut request = match self.canonicalizer.canonicalize(event) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Dropping malformed event");
                return TurnSummary {
                    status: TurnStatus::Malformed,
                    persisted: false,
                };
            }
        };

        let mut turn = self.recorder.begin(&request);
        let mut session: Option<Session> = None;
        let mut actor: Option<Actor> = None;

        let outcome = AssertUnwindSafe(self.run_turn(
            conn,
            &mut request,
            &mut session,
            &mut actor,
            &mut turn,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(SkillError::Panicked(panic_message(payload.as_ref()))));

        let status = match outcome {
            Ok(Some(_)) => TurnStatus::Completed,
            Ok(None) => TurnStatus::NoSkill,
            Err(e) => {
                let err = EngineError::from(e);
                error!(source_id = %request.source_id, error = %err, "Turn failed");
                turn.error(&err);
                if let Some(session) = session.as_mut() {
                    session.clear();
                }
                TurnStatus::Failed
            }
        };

        let topic = session.as_ref().and_then(|s| s.topic.clone());
        if let Some(session) = session.as_ref() {
            turn.session_on_end(session);
        }
        turn.actor_on_end(actor.as_ref());
        let record = turn.finish();
        let elapsed_ms = record.as_ref().map(|r| r.response_time_ms);

        let persisted = match stage_and_commit(conn, session.as_ref(), actor.as_ref(), record) {
            Ok(()) => true,
            Err(e) => {
                let err = EngineError::Persistence(e.to_string());
                error!(
                    source_id = %request.source_id,
                    error = %err,
                    "Failed to store turn; rolled back"
                );
                conn.rollback();
                false
            }
        };

        info!(
            source_id = %request.source_id,
            topic = ?topic,
            status = ?status,
            elapsed_ms = ?elapsed_ms,
            persisted,
            "Turn finished"
        );
        TurnSummary { status, persisted }
    }

    /// Steps from loading state through delivery. `Ok(None)` means no skill
    /// matched.
    async fn run_turn(
        &self,
        conn: &mut dyn StoreConnection,
        request: &mut Request,
        session_slot: &mut Option<Session>,
        actor_slot: &mut Option<Actor>,
        turn: &mut TurnRecord,
    ) -> Result<Option<Outcome>, SkillError> {
        let mut loaded = conn.get_or_create_session(&request.source_id)?;
        if loaded.is_stale(self.stale_timeout, Utc::now()) {
            debug!(
                source_id = %request.source_id,
                topic = ?loaded.topic,
                "Session stale; clearing"
            );
            loaded.clear();
        }
        turn.session_on_start(&loaded);
        let session = session_slot.insert(loaded);

        if let ActorLookup::Addressable(profile) = self.profiles.lookup(request).await? {
            let mut actor = conn.get_or_create_actor(&request.source_id)?;
            if let Some(profile) = profile {
                actor.apply_profile(profile);
            }
            *actor_slot = Some(actor);
        }
        turn.actor_on_start(actor_slot.as_ref());

        let classification = self
            .extractor
            .extract(request, actor_slot.as_ref(), session)
            .await?;
        request.intent = classification.intent;
        request.entities = classification.entities;
        turn.classification(request);

        let Some(skill) = self.router.route(request, session) else {
            info!(source_id = %request.source_id, intent = ?request.intent, "No skill found");
            return Ok(None);
        };

        debug!(source_id = %request.source_id, topic = %skill.topic(), "Running skill");
        let outcome = skill
            .handle(request, actor_slot.as_mut(), session)
            .await?
            .into_outcome();
        turn.response(&outcome);

        self.deliverer
            .deliver(request, actor_slot.as_ref(), session, &outcome)
            .await?;

        if outcome.end_session {
            session.clear();
        }
        Ok(Some(outcome))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn stage_and_commit(
    conn: &mut dyn StoreConnection,
    session: Option<&Session>,
    actor: Option<&Actor>,
    record: Option<HistoryRecord>,
) -> Result<(), ParleyError> {
    if let Some(session) = session {
        conn.stage_session(session)?;
    }
    if let Some(actor) = actor {
        conn.stage_actor(actor)?;
    }
    if let Some(record) = record {
        conn.append_history(&record)?;
    }
    conn.commit()
}
