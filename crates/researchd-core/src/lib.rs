//! Researchd core: orchestration engine for long-running AI research jobs.
//!
//! This crate owns the session lifecycle state machine, the cost
//! accountant, the continuation context builder, and the redaction
//! boundary between raw internal reasoning and anything shown to a user.
//! The research workflow itself is an external collaborator behind the
//! [`ResearchEngine`] trait.

mod config;
mod context;
mod costs;
mod engine;
mod error;
mod orchestrator;
mod redaction;
mod session;
mod store;
mod trace;

pub use config::{
    AccountingSettings, ConfigLoader, CoreConfig, LoggingSettings, OrchestratorSettings,
};
pub use context::{ContinuationSource, build_context};
pub use costs::{CostAccountant, ModelRates, RateTable};
pub use engine::{
    DynResearchEngine, EngineOutcome, EngineRequest, ResearchEngine, StubEngine, TraceContext,
};
pub use error::CoreError;
pub use orchestrator::{ExecutionOutcome, Orchestrator, OrchestratorConfig};
pub use redaction::{ALLOWED_FIELDS, filter_reasoning, format_for_api};
pub use session::{
    CostRecord, CostSummary, ResearchReport, Session, SessionFile, SessionId, SessionStatus,
};
pub use store::{
    DynSessionStore, MemorySessionStore, SessionStore, SessionUpdate, UserCostTotals,
};
pub use trace::{DynTraceRecorder, TraceNode, TraceRecorder, UsageTotals};
