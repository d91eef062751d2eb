//! Data model for research sessions, their cost records, and uploaded files.
//!
//! A [`Session`] tracks one research job from submission to a terminal
//! state. Continuations reference their predecessor through `parent_id`,
//! forming an ancestor chain used to seed follow-up research context.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Lifecycle state of a research session.
///
/// Transitions are `Pending -> Processing -> {Completed | Failed}`, with
/// `Cancelled` reachable from either non-terminal state. `Failed ->
/// Processing` is additionally allowed so the orchestrator's bounded retry
/// can re-enter a session that a failed attempt already finalized; no other
/// transition out of a terminal state exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, Processing) | (Pending, Failed) | (Pending, Cancelled) => true,
            (Processing, Completed) | (Processing, Failed) | (Processing, Cancelled) => true,
            // Retry re-entry only.
            (Failed, Processing) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Structured result of a completed research run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchReport {
    pub final_report: String,
    pub notes: Vec<String>,
    pub sources: Vec<String>,
}

/// One research job and its full lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub query: String,
    pub status: SessionStatus,
    pub report: Option<ResearchReport>,
    pub summary: String,
    /// Raw reasoning payload for internal/audit use. Never exposed to users
    /// without passing through the redaction filter.
    pub reasoning: Option<Value>,
    pub parent_id: Option<SessionId>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            query: query.into(),
            status: SessionStatus::Pending,
            report: None,
            summary: String::new(),
            reasoning: None,
            parent_id: None,
            trace_id: None,
            created_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn with_parent(mut self, parent_id: SessionId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Wall-clock time from submission to finalization, once terminal.
    pub fn duration(&self) -> Option<Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }
}

/// Token usage and estimated spend for one session. One-to-one with
/// [`Session`], created by the cost accountant exactly once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub session_id: SessionId,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Estimated spend, rounded to six decimal places.
    pub estimated_cost: f64,
    pub provider_costs: BTreeMap<String, f64>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CostRecord {
    pub fn zero(session_id: SessionId, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            estimated_cost: 0.0,
            provider_costs: BTreeMap::new(),
            currency: currency.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-derive `total_tokens` from the input/output counts. Must run after
    /// every mutation, including update paths that only touch one field.
    pub fn recompute_total(&mut self) {
        self.total_tokens = self.input_tokens + self.output_tokens;
        self.updated_at = Utc::now();
    }

    pub fn cost_per_token(&self) -> f64 {
        if self.total_tokens > 0 {
            self.estimated_cost / self.total_tokens as f64
        } else {
            0.0
        }
    }
}

/// User-facing cost view produced for the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub cost_per_token: f64,
    pub currency: String,
    pub provider_breakdown: BTreeMap<String, f64>,
}

impl From<&CostRecord> for CostSummary {
    fn from(record: &CostRecord) -> Self {
        Self {
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            total_tokens: record.total_tokens,
            estimated_cost: record.estimated_cost,
            cost_per_token: record.cost_per_token(),
            currency: record.currency.clone(),
            provider_breakdown: record.provider_costs.clone(),
        }
    }
}

/// File uploaded as extra research context. Owned by the upload pipeline;
/// the orchestrator only reads processed summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    pub id: Uuid,
    pub session_id: SessionId,
    pub filename: String,
    pub content_summary: String,
    pub is_processed: bool,
    pub uploaded_at: DateTime<Utc>,
}

impl SessionFile {
    pub fn processed(
        session_id: SessionId,
        filename: impl Into<String>,
        content_summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            filename: filename.into(),
            content_summary: content_summary.into(),
            is_processed: true,
            uploaded_at: Utc::now(),
        }
    }
}
