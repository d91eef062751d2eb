//! Optional external trace recorder.
//!
//! When the engine's tracing subsystem minted a trace id, the recorder can
//! return the fine-grained call tree for precise token accounting. The
//! recorder is best-effort: an unreachable or erroring backend degrades to
//! estimation and never fails a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One call in a recorded trace, with its nested child calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceNode {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model_name: Option<String>,
    #[serde(default)]
    pub children: Vec<TraceNode>,
}

/// Token usage summed over a trace tree, grouped by model identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub by_model: BTreeMap<String, (u64, u64)>,
}

impl UsageTotals {
    /// Walk the full trace tree, root plus all nested calls.
    pub fn from_trace(root: &TraceNode) -> Self {
        let mut totals = Self::default();
        totals.accumulate(root);
        totals
    }

    fn accumulate(&mut self, node: &TraceNode) {
        if node.input_tokens > 0 || node.output_tokens > 0 {
            self.input_tokens += node.input_tokens;
            self.output_tokens += node.output_tokens;

            let model = node.model_name.as_deref().unwrap_or("unknown").to_string();
            let entry = self.by_model.entry(model).or_insert((0, 0));
            entry.0 += node.input_tokens;
            entry.1 += node.output_tokens;
        }
        for child in &node.children {
            self.accumulate(child);
        }
    }
}

#[async_trait]
pub trait TraceRecorder: Send + Sync {
    async fn fetch_trace(&self, trace_id: &str) -> anyhow::Result<TraceNode>;
}

pub type DynTraceRecorder = Arc<dyn TraceRecorder>;

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(model: &str, input: u64, output: u64) -> TraceNode {
        TraceNode {
            input_tokens: input,
            output_tokens: output,
            model_name: Some(model.to_string()),
            children: Vec::new(),
        }
    }

    #[test]
    fn usage_sums_nested_calls_grouped_by_model() {
        let root = TraceNode {
            input_tokens: 100,
            output_tokens: 50,
            model_name: Some("openai:gpt-4o".to_string()),
            children: vec![
                leaf("openai:gpt-4o-mini", 10, 20),
                TraceNode {
                    input_tokens: 0,
                    output_tokens: 0,
                    model_name: None,
                    children: vec![leaf("openai:gpt-4o", 5, 5)],
                },
            ],
        };

        let totals = UsageTotals::from_trace(&root);
        assert_eq!(totals.input_tokens, 115);
        assert_eq!(totals.output_tokens, 75);
        assert_eq!(totals.by_model["openai:gpt-4o"], (105, 55));
        assert_eq!(totals.by_model["openai:gpt-4o-mini"], (10, 20));
    }

    #[test]
    fn zero_usage_nodes_do_not_create_model_buckets() {
        let root = TraceNode {
            model_name: Some("openai:gpt-4o".to_string()),
            ..TraceNode::default()
        };
        let totals = UsageTotals::from_trace(&root);
        assert!(totals.by_model.is_empty());
    }
}
