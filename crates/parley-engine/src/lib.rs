//! Event-processing engine for Parley.
//!
//! Turns batches of raw channel events into skill invocations: canonicalize,
//! load session and actor, classify intent, route by topic, run the skill,
//! deliver, then persist state and history in one unit of work.

pub mod capability;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod router;
pub mod skill;

pub use capability::{
    ActorLookup, AddressableProfiles, AlwaysAddressable, Classification, Deliverer,
    EventCanonicalizer, IntentExtractor, JsonCanonicalizer, KeywordIntentExtractor, NoopDeliverer,
    PassthroughIntent, ProfileLookup,
};
pub use dispatcher::Dispatcher;
pub use error::{EngineError, SkillError};
pub use history::HistoryRecorder;
pub use pipeline::{BatchReport, Pipeline, PipelineBuilder, TurnStatus, TurnSummary};
pub use router::Router;
pub use skill::{Skill, SkillRegistry, SkillReply};
