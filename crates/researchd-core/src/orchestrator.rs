//! Session lifecycle driver.
//!
//! One `execute` call drives one session through
//! `Pending -> Processing -> {Completed | Failed}` with bounded retry on
//! unexpected faults. The external engine call is the single suspension
//! point and is awaited to completion within the invocation; cancellation
//! is honored before the call, never mid-flight.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use crate::context::{ContinuationSource, build_context};
use crate::costs::CostAccountant;
use crate::engine::{DynResearchEngine, EngineRequest, TraceContext};
use crate::error::CoreError;
use crate::session::{ResearchReport, Session, SessionId, SessionStatus};
use crate::store::{DynSessionStore, SessionUpdate};

/// Orchestrator tuning, injected at construction time.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retries after the initial attempt on unexpected failure.
    pub max_retries: u32,
    /// Fixed delay between retry attempts.
    pub retry_delay: Duration,
    /// Age at which a `Processing` session is considered abandoned.
    pub stuck_after: Duration,
    /// Report prefix length used when the engine returns no brief.
    pub summary_prefix_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            stuck_after: Duration::from_secs(3600),
            summary_prefix_chars: 500,
        }
    }
}

/// Structured result of one `execute` call, also the status payload
/// handed to the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ExecutionOutcome {
    fn failure(session_id: SessionId, status: Option<SessionStatus>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id,
            status,
            summary: None,
            error: Some(error.into()),
            trace_id: None,
        }
    }
}

pub struct Orchestrator {
    store: DynSessionStore,
    engine: DynResearchEngine,
    accountant: CostAccountant,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: DynSessionStore,
        engine: DynResearchEngine,
        accountant: CostAccountant,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            accountant,
            config,
        }
    }

    /// Drive the session identified by `session_id` to a terminal state.
    ///
    /// Unexpected faults mark the session failed and re-enter from the top
    /// up to `max_retries` times; re-entry re-validates against the stored
    /// session, and every side effect along the way is an idempotent
    /// upsert, so a retry never double-counts.
    #[instrument(name = "orchestrator.execute", skip(self, custom_config))]
    pub async fn execute(
        &self,
        session_id: SessionId,
        custom_config: Option<Value>,
    ) -> ExecutionOutcome {
        let mut attempt: u32 = 0;
        loop {
            match self.run_once(session_id, custom_config.clone()).await {
                Ok(outcome) => return outcome,
                Err(err) => {
                    if let Err(mark_err) = self
                        .fail_session(session_id, &format!("task execution error: {err}"))
                        .await
                    {
                        warn!(
                            session_id = %session_id,
                            error = %mark_err,
                            "could not mark session failed"
                        );
                    }

                    if attempt < self.config.max_retries {
                        attempt += 1;
                        warn!(
                            session_id = %session_id,
                            error = %err,
                            attempt,
                            "unexpected failure, retrying execution"
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                        continue;
                    }

                    error!(
                        session_id = %session_id,
                        error = %err,
                        retries = self.config.max_retries,
                        "execution failed permanently"
                    );
                    return ExecutionOutcome::failure(
                        session_id,
                        Some(SessionStatus::Failed),
                        format!("failed after {} retries: {err}", self.config.max_retries),
                    );
                }
            }
        }
    }

    async fn run_once(
        &self,
        session_id: SessionId,
        custom_config: Option<Value>,
    ) -> Result<ExecutionOutcome, CoreError> {
        let Some(session) = self.store.get(session_id).await? else {
            warn!(session_id = %session_id, "execution requested for unknown session");
            return Ok(ExecutionOutcome::failure(
                session_id,
                None,
                "research session not found",
            ));
        };

        // Cooperative cancellation: act on it before invoking the engine.
        // Completed sessions are equally final.
        if matches!(
            session.status,
            SessionStatus::Cancelled | SessionStatus::Completed
        ) {
            info!(
                session_id = %session_id,
                status = session.status.as_str(),
                "refusing to execute terminal session"
            );
            return Ok(ExecutionOutcome::failure(
                session_id,
                Some(session.status),
                format!("session is already {}", session.status.as_str()),
            ));
        }

        // Validation happens before any state transition.
        if session.query.trim().is_empty() {
            return Ok(ExecutionOutcome::failure(
                session_id,
                Some(session.status),
                "research query must not be blank",
            ));
        }
        let continuation = match self.continuation_context(&session).await? {
            Ok(context) => context,
            Err(reason) => {
                return Ok(ExecutionOutcome::failure(
                    session_id,
                    Some(session.status),
                    reason,
                ));
            }
        };

        // Move to Processing before the engine call so a crash from here on
        // is observable as a stuck Processing session for the reaper.
        let session = self
            .store
            .apply(session_id, SessionUpdate::status(SessionStatus::Processing))
            .await?;

        let file_context: Vec<String> = self
            .store
            .files_for_session(session_id)
            .await?
            .into_iter()
            .filter(|file| file.is_processed && !file.content_summary.is_empty())
            .map(|file| file.content_summary)
            .collect();

        info!(
            session_id = %session_id,
            user_id = %session.user_id,
            continuation = continuation.is_some(),
            files = file_context.len(),
            "invoking research engine"
        );

        // Single suspension point, drained fully before returning.
        let outcome = self
            .engine
            .invoke(EngineRequest {
                query: session.query.clone(),
                context: continuation,
                file_context,
                tracing: TraceContext::for_session(&session.user_id, session_id),
                custom_config,
            })
            .await?;

        if outcome.success {
            self.complete_session(&session, outcome).await
        } else {
            let message = outcome
                .error
                .unwrap_or_else(|| "research engine reported failure".to_string());
            error!(session_id = %session_id, error = %message, "research engine failed");
            self.fail_session(session_id, &message).await?;
            if let Err(err) = self.accountant.ensure_zero_record(session_id).await {
                warn!(session_id = %session_id, error = %err, "fallback cost record not created");
            }
            Ok(ExecutionOutcome::failure(
                session_id,
                Some(SessionStatus::Failed),
                message,
            ))
        }
    }

    /// Render the parent's brief/findings, or a rejection reason when the
    /// parent reference is invalid.
    async fn continuation_context(
        &self,
        session: &Session,
    ) -> Result<Result<Option<String>, String>, CoreError> {
        let Some(parent_id) = session.parent_id else {
            return Ok(Ok(None));
        };
        let Some(parent) = self.store.get(parent_id).await? else {
            return Ok(Err(format!("parent session {parent_id} not found")));
        };
        if parent.user_id != session.user_id {
            return Ok(Err(
                "parent session belongs to a different user".to_string()
            ));
        }

        let brief = parent
            .reasoning
            .as_ref()
            .and_then(|reasoning| reasoning.get("research_brief"))
            .and_then(|value| value.as_str())
            .map(str::to_string);
        let summary = (!parent.summary.is_empty()).then(|| parent.summary.clone());

        let rendered = build_context(&ContinuationSource { brief, summary });
        Ok(Ok((!rendered.is_empty()).then_some(rendered)))
    }

    async fn complete_session(
        &self,
        session: &Session,
        outcome: crate::engine::EngineOutcome,
    ) -> Result<ExecutionOutcome, CoreError> {
        let summary = if !outcome.research_brief.is_empty() {
            outcome.research_brief.clone()
        } else {
            prefix(&outcome.final_report, self.config.summary_prefix_chars)
        };

        let trace_id = outcome.trace_id.clone();

        // Full raw reasoning is kept for internal/audit use; the redaction
        // filter strips everything but the allow-listed fields on the way
        // out to a user.
        let reasoning = json!({
            "research_brief": outcome.research_brief,
            "methodology": "Multi-step AI research workflow",
            "raw_notes": outcome.raw_notes,
            "internal_agent_communications": outcome.messages,
            "execution_trace": {
                "trace_id": trace_id.clone(),
                "tracing_enabled": trace_id.is_some(),
            },
        });

        let mut update = SessionUpdate::status(SessionStatus::Completed)
            .with_report(ResearchReport {
                final_report: outcome.final_report,
                notes: outcome.notes,
                sources: Vec::new(),
            })
            .with_summary(summary.clone())
            .with_reasoning(reasoning)
            .completed_now();

        match &trace_id {
            Some(trace_id) => {
                info!(session_id = %session.id, %trace_id, "trace id captured");
                update = update.with_trace_id(trace_id.clone());
            }
            None => {
                warn!(session_id = %session.id, "no trace id available for session");
            }
        }

        let stored = self.store.apply(session.id, update).await?;

        // Accounting degradation never fails an otherwise-successful run.
        match self
            .accountant
            .account(&stored, stored.trace_id.as_deref())
            .await
        {
            Ok(cost) => {
                info!(
                    session_id = %session.id,
                    cost = cost.estimated_cost,
                    "cost tracking completed"
                );
            }
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "cost tracking failed");
                if let Err(err) = self.accountant.ensure_zero_record(session.id).await {
                    warn!(
                        session_id = %session.id,
                        error = %err,
                        "fallback cost record not created"
                    );
                }
            }
        }

        info!(
            session_id = %session.id,
            duration_secs = stored.duration().map(|d| d.num_seconds()),
            "research execution completed"
        );
        Ok(ExecutionOutcome {
            success: true,
            session_id: session.id,
            status: Some(SessionStatus::Completed),
            summary: Some(summary),
            error: None,
            trace_id: stored.trace_id,
        })
    }

    /// Mark a session failed, preserving the error inside `reasoning.error`
    /// alongside any reasoning already recorded.
    async fn fail_session(&self, session_id: SessionId, message: &str) -> Result<(), CoreError> {
        let reasoning = match self.store.get(session_id).await? {
            Some(Session {
                reasoning: Some(Value::Object(mut map)),
                ..
            }) => {
                map.insert("error".to_string(), Value::String(message.to_string()));
                Value::Object(map)
            }
            Some(_) => json!({ "error": message }),
            None => return Err(CoreError::SessionNotFound(session_id)),
        };

        self.store
            .apply(
                session_id,
                SessionUpdate::status(SessionStatus::Failed)
                    .with_reasoning(reasoning)
                    .completed_now(),
            )
            .await?;
        Ok(())
    }

    /// Force-fail `Processing` sessions whose last update is older than
    /// `max_age`. Concurrent with normal execution this is a benign
    /// last-writer-wins race on the status field.
    #[instrument(name = "orchestrator.sweep_stuck", skip(self))]
    pub async fn sweep_stuck(&self, max_age: Duration) -> Result<usize, CoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|err| CoreError::InvalidConfiguration(err.to_string()))?;

        let stuck = self.store.list_processing_older_than(cutoff).await?;
        let mut swept = 0;
        for session in stuck {
            self.fail_session(session.id, "session timeout - processing took too long")
                .await?;
            warn!(session_id = %session.id, "stuck session marked failed");
            swept += 1;
        }

        info!(swept, "stuck session sweep complete");
        Ok(swept)
    }

    /// Default-threshold sweep used by the periodic reaper.
    pub async fn sweep_stuck_default(&self) -> Result<usize, CoreError> {
        self.sweep_stuck(self.config.stuck_after).await
    }
}

fn prefix(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
