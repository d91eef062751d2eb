//! Cost accounting for completed research sessions.
//!
//! Prefers precise per-call token usage from the external trace recorder;
//! without one, falls back to a documented length-based estimator. Either
//! way exactly one cost record is upserted per session, keyed by session
//! id, so repeated accounting never double-counts.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::session::{CostRecord, Session, SessionId};
use crate::store::DynSessionStore;
use crate::trace::{DynTraceRecorder, UsageTotals};

/// Characters reserved for system prompts in the input-token estimate.
const SYSTEM_PROMPT_ALLOWANCE: usize = 2000;
/// Rough characters-per-token ratio for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Per-token USD rates for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelRates {
    pub input: f64,
    pub output: f64,
}

/// Immutable provider/model rate table injected into the accountant at
/// construction time.
#[derive(Debug, Clone)]
pub struct RateTable {
    rates: BTreeMap<String, BTreeMap<String, ModelRates>>,
    default_provider: String,
    default_model: String,
}

impl RateTable {
    pub fn new(
        rates: BTreeMap<String, BTreeMap<String, ModelRates>>,
        default_provider: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let default_provider = default_provider.into();
        let default_model = default_model.into();
        let has_default = rates
            .get(&default_provider)
            .is_some_and(|models| models.contains_key(&default_model));
        if !has_default {
            return Err(CoreError::InvalidConfiguration(format!(
                "rate table missing default model {default_provider}:{default_model}"
            )));
        }
        Ok(Self {
            rates,
            default_provider,
            default_model,
        })
    }

    /// Published per-million-token pricing as of late 2024.
    pub fn builtin() -> Self {
        let mut rates: BTreeMap<String, BTreeMap<String, ModelRates>> = BTreeMap::new();

        let openai = rates.entry("openai".to_string()).or_default();
        openai.insert("gpt-4o".into(), ModelRates { input: 0.000_005, output: 0.000_015 });
        openai.insert("gpt-4o-mini".into(), ModelRates { input: 0.000_000_15, output: 0.000_000_6 });
        openai.insert("gpt-4-turbo".into(), ModelRates { input: 0.000_01, output: 0.000_03 });
        openai.insert("gpt-4".into(), ModelRates { input: 0.000_03, output: 0.000_06 });

        let anthropic = rates.entry("anthropic".to_string()).or_default();
        anthropic.insert(
            "claude-3-5-sonnet-20241022".into(),
            ModelRates { input: 0.000_003, output: 0.000_015 },
        );
        anthropic.insert(
            "claude-3-5-haiku-20241022".into(),
            ModelRates { input: 0.000_000_25, output: 0.000_001_25 },
        );
        anthropic.insert("claude-3-opus".into(), ModelRates { input: 0.000_015, output: 0.000_075 });

        let google = rates.entry("google".to_string()).or_default();
        google.insert("gemini-pro".into(), ModelRates { input: 0.000_000_5, output: 0.000_001_5 });
        google.insert(
            "gemini-pro-vision".into(),
            ModelRates { input: 0.000_000_25, output: 0.000_000_75 },
        );

        Self::new(rates, "openai", "gpt-4o").expect("builtin table contains its default model")
    }

    /// Cost one model's usage, returning the provider bucket it lands in.
    ///
    /// Model names are `provider:model` or bare; bare names are attributed
    /// by family. Unknown models fall back to the default model's rates
    /// with a warning.
    pub fn model_cost(&self, model_name: &str, input_tokens: u64, output_tokens: u64) -> (String, f64) {
        let (provider, model) = self.resolve(model_name);
        let rates = match self.rates.get(&provider).and_then(|models| models.get(&model)) {
            Some(rates) => *rates,
            None => {
                warn!(
                    model = %model_name,
                    fallback = %format!("{}:{}", self.default_provider, self.default_model),
                    "no rates for model, using default rates"
                );
                self.rates[&self.default_provider][&self.default_model]
            }
        };

        let cost = input_tokens as f64 * rates.input + output_tokens as f64 * rates.output;
        (provider, cost)
    }

    fn resolve(&self, model_name: &str) -> (String, String) {
        if let Some((provider, model)) = model_name.split_once(':') {
            return (provider.to_string(), model.to_string());
        }
        let lowered = model_name.to_ascii_lowercase();
        if lowered.contains("gpt") {
            ("openai".to_string(), model_name.to_string())
        } else if lowered.contains("claude") {
            ("anthropic".to_string(), model_name.to_string())
        } else if lowered.contains("gemini") {
            ("google".to_string(), model_name.to_string())
        } else {
            (self.default_provider.clone(), self.default_model.clone())
        }
    }

    fn default_bucket(&self) -> &str {
        &self.default_provider
    }

    fn default_model_label(&self) -> String {
        format!("{}:{}", self.default_provider, self.default_model)
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Produces exactly one [`CostRecord`] per session.
pub struct CostAccountant {
    store: DynSessionStore,
    recorder: Option<DynTraceRecorder>,
    rates: RateTable,
    currency: String,
}

impl CostAccountant {
    pub fn new(store: DynSessionStore, recorder: Option<DynTraceRecorder>, rates: RateTable) -> Self {
        Self {
            store,
            recorder,
            rates,
            currency: "USD".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Derive and upsert the cost record for `session`.
    ///
    /// With a reachable recorder and a trace id, usage comes from the trace
    /// tree; a fetch failure degrades to zero usage rather than propagating.
    /// Without a trace, usage is estimated from content length. Calling
    /// twice with unchanged inputs stores identical values.
    pub async fn account(
        &self,
        session: &Session,
        trace_id: Option<&str>,
    ) -> Result<CostRecord, CoreError> {
        let usage = match (trace_id, &self.recorder) {
            (Some(trace_id), Some(recorder)) => match recorder.fetch_trace(trace_id).await {
                Ok(root) => {
                    let totals = UsageTotals::from_trace(&root);
                    debug!(
                        %trace_id,
                        input = totals.input_tokens,
                        output = totals.output_tokens,
                        "token usage extracted from trace"
                    );
                    totals
                }
                Err(err) => {
                    warn!(%trace_id, error = %err, "trace fetch failed, recording zero usage");
                    UsageTotals::default()
                }
            },
            _ => self.estimate_usage(session),
        };

        let provider_costs = self.provider_costs(&usage);
        let total_cost: f64 = provider_costs.values().sum();

        let mut record = CostRecord::zero(session.id, self.currency.clone());
        record.input_tokens = usage.input_tokens;
        record.output_tokens = usage.output_tokens;
        record.estimated_cost = round_usd(total_cost);
        record.provider_costs = provider_costs
            .into_iter()
            .map(|(provider, cost)| (provider, round_usd(cost)))
            .collect();
        record.recompute_total();

        self.store.upsert_cost(record.clone()).await?;
        info!(
            session_id = %session.id,
            tokens = record.total_tokens,
            cost = record.estimated_cost,
            "cost record stored"
        );
        Ok(record)
    }

    /// Create a zero-valued record only if none exists, so downstream
    /// aggregation never has to special-case a missing cost.
    pub async fn ensure_zero_record(&self, session_id: SessionId) -> Result<(), CoreError> {
        if self.store.get_cost(session_id).await?.is_none() {
            self.store
                .upsert_cost(CostRecord::zero(session_id, self.currency.clone()))
                .await?;
        }
        Ok(())
    }

    /// Length-based estimate: ~4 characters per token, plus a fixed
    /// system-prompt allowance on the input side.
    fn estimate_usage(&self, session: &Session) -> UsageTotals {
        let query_len = session.query.len();
        let report_len = session
            .report
            .as_ref()
            .map(|report| report.final_report.len())
            .unwrap_or(0);

        let input_tokens = ((query_len + SYSTEM_PROMPT_ALLOWANCE) / CHARS_PER_TOKEN).max(1) as u64;
        let output_tokens = if session.report.is_some() {
            (report_len / CHARS_PER_TOKEN).max(1) as u64
        } else {
            0
        };

        debug!(
            session_id = %session.id,
            input_tokens,
            output_tokens,
            "estimated token usage (no trace data)"
        );

        UsageTotals {
            input_tokens,
            output_tokens,
            by_model: BTreeMap::new(),
        }
    }

    fn provider_costs(&self, usage: &UsageTotals) -> BTreeMap<String, f64> {
        let mut costs: BTreeMap<String, f64> = BTreeMap::new();

        if !usage.by_model.is_empty() {
            for (model, (input, output)) in &usage.by_model {
                let (provider, cost) = self.rates.model_cost(model, *input, *output);
                *costs.entry(provider).or_insert(0.0) += cost;
            }
        } else if usage.input_tokens > 0 || usage.output_tokens > 0 {
            let (_, cost) = self.rates.model_cost(
                &self.rates.default_model_label(),
                usage.input_tokens,
                usage.output_tokens,
            );
            costs.insert(self.rates.default_bucket().to_string(), cost);
        }

        costs
    }
}

fn round_usd(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ResearchReport;
    use crate::store::{MemorySessionStore, SessionStore};
    use crate::trace::{TraceNode, TraceRecorder};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedRecorder(TraceNode);

    #[async_trait]
    impl TraceRecorder for FixedRecorder {
        async fn fetch_trace(&self, _trace_id: &str) -> anyhow::Result<TraceNode> {
            Ok(self.0.clone())
        }
    }

    struct BrokenRecorder;

    #[async_trait]
    impl TraceRecorder for BrokenRecorder {
        async fn fetch_trace(&self, _trace_id: &str) -> anyhow::Result<TraceNode> {
            anyhow::bail!("recorder offline")
        }
    }

    fn session_with_report(query: &str, report_len: usize) -> Session {
        let mut session = Session::new("alice", query);
        session.report = Some(ResearchReport {
            final_report: "r".repeat(report_len),
            notes: Vec::new(),
            sources: Vec::new(),
        });
        session
    }

    fn accountant(
        store: Arc<MemorySessionStore>,
        recorder: Option<DynTraceRecorder>,
    ) -> CostAccountant {
        CostAccountant::new(store, recorder, RateTable::builtin())
    }

    #[tokio::test]
    async fn estimator_applies_prompt_allowance_and_minimums() {
        let store = Arc::new(MemorySessionStore::new());
        let accountant = accountant(store.clone(), None);

        // 40-char query, 800-char report.
        let session = session_with_report(&"q".repeat(40), 800);
        let record = accountant.account(&session, None).await.unwrap();
        assert_eq!(record.input_tokens, (40 + 2000) / 4);
        assert_eq!(record.output_tokens, 200);
        assert_eq!(record.total_tokens, record.input_tokens + record.output_tokens);

        // No report at all: zero output tokens, input floor of 1 still holds.
        let bare = Session::new("alice", "");
        let record = accountant.account(&bare, None).await.unwrap();
        assert_eq!(record.input_tokens, 500);
        assert_eq!(record.output_tokens, 0);

        // Tiny report still counts one token.
        let tiny = session_with_report("short query here", 2);
        let record = accountant.account(&tiny, None).await.unwrap();
        assert_eq!(record.output_tokens, 1);
    }

    #[tokio::test]
    async fn estimated_usage_is_costed_at_default_rates() {
        let store = Arc::new(MemorySessionStore::new());
        let accountant = accountant(store.clone(), None);

        let session = session_with_report(&"q".repeat(400), 4000);
        let record = accountant.account(&session, None).await.unwrap();

        // 600 input + 1000 output at gpt-4o rates.
        let expected = 600.0 * 0.000_005 + 1000.0 * 0.000_015;
        assert!((record.estimated_cost - round_usd(expected)).abs() < 1e-9);
        assert_eq!(record.provider_costs.len(), 1);
        assert!(record.provider_costs.contains_key("openai"));
        assert_eq!(record.currency, "USD");
    }

    #[tokio::test]
    async fn trace_usage_is_grouped_and_costed_per_provider() {
        let root = TraceNode {
            input_tokens: 1000,
            output_tokens: 500,
            model_name: Some("openai:gpt-4o".to_string()),
            children: vec![TraceNode {
                input_tokens: 2000,
                output_tokens: 1000,
                model_name: Some("anthropic:claude-3-5-sonnet-20241022".to_string()),
                children: Vec::new(),
            }],
        };
        let store = Arc::new(MemorySessionStore::new());
        let accountant = accountant(store.clone(), Some(Arc::new(FixedRecorder(root))));

        let session = Session::new("alice", "traced query");
        let record = accountant.account(&session, Some("trace-1")).await.unwrap();

        assert_eq!(record.input_tokens, 3000);
        assert_eq!(record.output_tokens, 1500);
        assert_eq!(record.total_tokens, 4500);
        assert!(record.provider_costs.contains_key("openai"));
        assert!(record.provider_costs.contains_key("anthropic"));
    }

    #[tokio::test]
    async fn recorder_failure_degrades_to_zero_usage() {
        let store = Arc::new(MemorySessionStore::new());
        let accountant = accountant(store.clone(), Some(Arc::new(BrokenRecorder)));

        let session = session_with_report("a query long enough", 100);
        let record = accountant.account(&session, Some("trace-x")).await.unwrap();

        assert_eq!(record.total_tokens, 0);
        assert_eq!(record.estimated_cost, 0.0);
        assert!(record.provider_costs.is_empty());
    }

    #[tokio::test]
    async fn accounting_twice_is_idempotent() {
        let store = Arc::new(MemorySessionStore::new());
        let accountant = accountant(store.clone(), None);
        let session = session_with_report(&"q".repeat(100), 1200);

        let first = accountant.account(&session, None).await.unwrap();
        let second = accountant.account(&session, None).await.unwrap();

        assert_eq!(first.input_tokens, second.input_tokens);
        assert_eq!(first.output_tokens, second.output_tokens);
        assert_eq!(first.total_tokens, second.total_tokens);
        assert_eq!(first.estimated_cost, second.estimated_cost);

        let stored = store.get_cost(session.id).await.unwrap().unwrap();
        assert_eq!(stored.total_tokens, first.total_tokens);
    }

    #[tokio::test]
    async fn ensure_zero_record_never_overwrites_real_data() {
        let store = Arc::new(MemorySessionStore::new());
        let accountant = accountant(store.clone(), None);
        let session = session_with_report(&"q".repeat(100), 1200);

        accountant.account(&session, None).await.unwrap();
        accountant.ensure_zero_record(session.id).await.unwrap();
        let stored = store.get_cost(session.id).await.unwrap().unwrap();
        assert!(stored.total_tokens > 0);

        let other = Session::new("alice", "never accounted");
        accountant.ensure_zero_record(other.id).await.unwrap();
        let stored = store.get_cost(other.id).await.unwrap().unwrap();
        assert_eq!(stored.total_tokens, 0);
        assert_eq!(stored.estimated_cost, 0.0);
    }

    #[test]
    fn bare_model_names_are_attributed_by_family() {
        let rates = RateTable::builtin();
        assert_eq!(rates.model_cost("gpt-4o-mini", 10, 10).0, "openai");
        assert_eq!(rates.model_cost("claude-3-opus", 10, 10).0, "anthropic");
        assert_eq!(rates.model_cost("gemini-pro", 10, 10).0, "google");
    }

    #[test]
    fn unknown_model_uses_default_rates() {
        let rates = RateTable::builtin();
        let (provider, cost) = rates.model_cost("mystery:model-x", 1_000_000, 0);
        assert_eq!(provider, "mystery");
        // Falls back to gpt-4o input pricing.
        assert!((cost - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rate_table_requires_its_default_model() {
        let err = RateTable::new(BTreeMap::new(), "openai", "gpt-4o").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }
}
