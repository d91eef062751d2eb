//! Session/cost persistence seam.
//!
//! The orchestrator and cost accountant only talk to [`SessionStore`]; the
//! in-memory implementation backs tests, the CLI, and offline runs.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::CoreError;
use crate::session::{
    CostRecord, ResearchReport, Session, SessionFile, SessionId, SessionStatus,
};

/// Partial update applied to a session as one atomic unit.
///
/// All fields set on one update land together with a single `updated_at`
/// bump, so a crash between lifecycle steps never leaves a half-written
/// report/status pair behind.
#[derive(Debug, Default, Clone)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub report: Option<ResearchReport>,
    pub summary: Option<String>,
    pub reasoning: Option<Value>,
    pub trace_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_report(mut self, report: ResearchReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: Value) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn completed_now(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }
}

/// Aggregated spend for one user across all of their sessions.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UserCostTotals {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub session_count: usize,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: SessionId) -> Result<Option<Session>, CoreError>;

    async fn insert(&self, session: Session) -> Result<(), CoreError>;

    /// Apply a partial update, enforcing the status transition rules and
    /// bumping `updated_at`. Returns the session as stored afterwards.
    async fn apply(&self, id: SessionId, update: SessionUpdate) -> Result<Session, CoreError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, CoreError>;

    /// Sessions still in `Processing` whose last update predates `cutoff`.
    async fn list_processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, CoreError>;

    async fn upsert_cost(&self, cost: CostRecord) -> Result<(), CoreError>;

    async fn get_cost(&self, session_id: SessionId) -> Result<Option<CostRecord>, CoreError>;

    async fn add_file(&self, file: SessionFile) -> Result<(), CoreError>;

    async fn files_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<SessionFile>, CoreError>;

    /// Ancestor chain of `id` in root-to-leaf order.
    ///
    /// Parent pointers are untrusted; a revisited id aborts the walk with
    /// [`CoreError::LineageCycle`] instead of looping.
    async fn lineage(&self, id: SessionId) -> Result<Vec<Session>, CoreError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(CoreError::LineageCycle(id, current));
            }
            let session = self
                .get(current)
                .await?
                .ok_or(CoreError::SessionNotFound(current))?;
            cursor = session.parent_id;
            chain.push(session);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Spend aggregation consumed by the API layer's cost endpoints.
    async fn user_cost_totals(&self, user_id: &str) -> Result<UserCostTotals, CoreError> {
        let mut totals = UserCostTotals::default();
        for session in self.list_by_user(user_id).await? {
            if let Some(cost) = self.get_cost(session.id).await? {
                totals.total_cost += cost.estimated_cost;
                totals.total_tokens += cost.total_tokens;
                totals.session_count += 1;
            }
        }
        Ok(totals)
    }
}

pub type DynSessionStore = Arc<dyn SessionStore>;

/// DashMap-backed store for tests, the CLI, and offline runs.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Session>,
    costs: DashMap<SessionId, CostRecord>,
    files: DashMap<SessionId, Vec<SessionFile>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: SessionId) -> Result<Option<Session>, CoreError> {
        Ok(self.sessions.get(&id).map(|entry| entry.clone()))
    }

    async fn insert(&self, session: Session) -> Result<(), CoreError> {
        self.sessions.insert(session.id, session);
        Ok(())
    }

    async fn apply(&self, id: SessionId, update: SessionUpdate) -> Result<Session, CoreError> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or(CoreError::SessionNotFound(id))?;
        let session = entry.value_mut();

        if let Some(next) = update.status {
            if next != session.status && !session.status.can_transition_to(next) {
                return Err(CoreError::InvalidTransition {
                    session_id: id,
                    from: session.status,
                    to: next,
                });
            }
            session.status = next;
            // completed_at is set iff the session is terminal; retry
            // re-entry into Processing must drop the stale timestamp.
            if !next.is_terminal() {
                session.completed_at = None;
            }
        }
        if let Some(report) = update.report {
            session.report = Some(report);
        }
        if let Some(summary) = update.summary {
            session.summary = summary;
        }
        if let Some(reasoning) = update.reasoning {
            session.reasoning = Some(reasoning);
        }
        if let Some(trace_id) = update.trace_id {
            session.trace_id = Some(trace_id);
        }
        if let Some(completed_at) = update.completed_at {
            session.completed_at = Some(completed_at);
        }
        session.updated_at = Utc::now();

        debug!(session_id = %id, status = session.status.as_str(), "session updated");
        Ok(session.clone())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, CoreError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn list_processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, CoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| {
                entry.status == SessionStatus::Processing && entry.updated_at < cutoff
            })
            .map(|entry| entry.clone())
            .collect())
    }

    async fn upsert_cost(&self, mut cost: CostRecord) -> Result<(), CoreError> {
        cost.recompute_total();
        if let Some(existing) = self.costs.get(&cost.session_id) {
            cost.created_at = existing.created_at;
        }
        self.costs.insert(cost.session_id, cost);
        Ok(())
    }

    async fn get_cost(&self, session_id: SessionId) -> Result<Option<CostRecord>, CoreError> {
        Ok(self.costs.get(&session_id).map(|entry| entry.clone()))
    }

    async fn add_file(&self, file: SessionFile) -> Result<(), CoreError> {
        self.files.entry(file.session_id).or_default().push(file);
        Ok(())
    }

    async fn files_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<SessionFile>, CoreError> {
        Ok(self
            .files
            .get(&session_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }
}
