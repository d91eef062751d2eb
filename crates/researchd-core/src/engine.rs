//! External research engine seam.
//!
//! The actual multi-step research workflow is owned by an external
//! collaborator; the orchestrator only knows this trait. `Ok` with
//! `success: false` is a reported engine failure, while `Err` is an
//! unexpected fault that the orchestrator retries.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::session::SessionId;

/// Explicit identity and correlation data for one engine invocation.
/// Passed as a parameter on every call; there is no ambient request
/// context to fall back on.
#[derive(Debug, Clone, Serialize)]
pub struct TraceContext {
    pub user_id: String,
    pub session_id: SessionId,
    pub run_name: String,
    pub tags: Vec<String>,
}

impl TraceContext {
    pub fn for_session(user_id: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            user_id: user_id.into(),
            session_id,
            run_name: format!("research-session-{session_id}"),
            tags: vec!["researchd".to_string()],
        }
    }
}

/// One research invocation: the query, optional continuation context,
/// processed file summaries, tracing correlation, and pass-through
/// configuration overrides.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub query: String,
    pub context: Option<String>,
    pub file_context: Vec<String>,
    pub tracing: TraceContext,
    pub custom_config: Option<Value>,
}

/// What the engine reports back for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOutcome {
    pub success: bool,
    pub final_report: String,
    pub research_brief: String,
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
    pub messages: Vec<Value>,
    pub error: Option<String>,
    /// Correlation id minted by the engine's tracing subsystem. Absence is
    /// valid and must not fail the session.
    pub trace_id: Option<String>,
}

impl EngineOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ResearchEngine: Send + Sync {
    async fn invoke(&self, request: EngineRequest) -> anyhow::Result<EngineOutcome>;
}

pub type DynResearchEngine = Arc<dyn ResearchEngine>;

/// Deterministic offline engine for the CLI, demos, and tests.
#[derive(Default)]
pub struct StubEngine;

impl StubEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResearchEngine for StubEngine {
    async fn invoke(&self, request: EngineRequest) -> anyhow::Result<EngineOutcome> {
        let mut report = format!(
            "Research findings for \"{}\":\n\
             1. Demand-side drivers dominate the near-term outlook.\n\
             2. Supply constraints are easing but remain regional.\n\
             3. Capital allocation favors incumbents with existing capacity.",
            request.query
        );
        if let Some(context) = &request.context {
            report.push_str("\n\nBuilds on prior work:\n");
            report.push_str(context);
        }

        Ok(EngineOutcome {
            success: true,
            research_brief: format!("Structured brief for \"{}\"", request.query),
            notes: vec![
                "Compiled from three synthesized findings".to_string(),
                format!("{} uploaded document(s) considered", request.file_context.len()),
            ],
            raw_notes: vec!["internal scratchpad: stub engine has no real sources".to_string()],
            messages: Vec::new(),
            error: None,
            trace_id: Some(format!("trace-{}", Uuid::new_v4())),
            final_report: report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_engine_weaves_continuation_context_into_report() {
        let engine = StubEngine::new();
        let session_id = Uuid::new_v4();
        let outcome = engine
            .invoke(EngineRequest {
                query: "battery markets".to_string(),
                context: Some("Previous research brief: basics".to_string()),
                file_context: Vec::new(),
                tracing: TraceContext::for_session("alice", session_id),
                custom_config: None,
            })
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.final_report.contains("Previous research brief: basics"));
        assert!(outcome.trace_id.is_some());
    }
}
