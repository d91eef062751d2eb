//! Allow-list redaction of raw reasoning payloads.
//!
//! Raw reasoning stored on a session carries internal thought traces,
//! agent messages, and tool logs that must never reach a user. This is
//! the trust boundary: only keys on [`ALLOWED_FIELDS`] survive, checked
//! recursively at every nesting depth. Filtering is structural, never
//! content-based, so a value reachable only through a disallowed key is
//! gone even if the same text also appears under an allowed one.

use serde_json::{Map, Value};

/// Keys safe for user consumption. Everything else is dropped.
pub const ALLOWED_FIELDS: [&str; 7] = [
    "research_brief",
    "methodology",
    "approach",
    "summary",
    "key_findings",
    "sources_consulted",
    "research_steps",
];

fn is_allowed(key: &str) -> bool {
    ALLOWED_FIELDS.contains(&key)
}

/// Strip all non-allow-listed keys from a raw reasoning payload.
///
/// Always returns an object; absent or non-object input yields an empty
/// one. Nested objects are re-checked against the same allow-list, array
/// elements are walked in place, and scalar leaves pass through unchanged.
pub fn filter_reasoning(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::Object(map)) => Value::Object(filter_map(map)),
        _ => Value::Object(Map::new()),
    }
}

fn filter_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(key, _)| is_allowed(key))
        .map(|(key, value)| (key.clone(), filter_value(value)))
        .collect()
}

fn filter_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(filter_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(filter_value).collect()),
        scalar => scalar.clone(),
    }
}

/// Shape filtered reasoning for an API response.
///
/// Presentation defaults live here, not in the filter: an empty payload
/// becomes the documented placeholder, and partially present payloads get
/// per-field fallbacks for the two required fields.
pub fn format_for_api(filtered: &Value) -> Value {
    let map = match filtered {
        Value::Object(map) if !map.is_empty() => map,
        _ => {
            return serde_json::json!({
                "research_brief": "No reasoning information available",
                "methodology": "Standard research workflow",
            });
        }
    };

    let mut formatted = Map::new();
    formatted.insert(
        "research_brief".to_string(),
        map.get("research_brief")
            .cloned()
            .unwrap_or_else(|| Value::String("Research completed successfully".to_string())),
    );
    formatted.insert(
        "methodology".to_string(),
        map.get("methodology")
            .cloned()
            .unwrap_or_else(|| Value::String("Multi-step AI research workflow".to_string())),
    );

    for field in [
        "approach",
        "summary",
        "key_findings",
        "sources_consulted",
        "research_steps",
    ] {
        if let Some(value) = map.get(field) {
            formatted.insert(field.to_string(), value.clone());
        }
    }

    Value::Object(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_sensitive_top_level_keys() {
        let raw = json!({
            "research_brief": "brief text",
            "raw_notes": ["secret thought"],
            "internal_agent_communications": [{"role": "agent", "content": "hidden"}],
            "tool_execution_logs": ["called search"],
        });

        let filtered = filter_reasoning(Some(&raw));
        assert_eq!(filtered["research_brief"], "brief text");
        assert!(filtered.get("raw_notes").is_none());
        assert!(filtered.get("internal_agent_communications").is_none());
        assert!(filtered.get("tool_execution_logs").is_none());
    }

    #[test]
    fn filters_nested_objects_at_any_depth() {
        let raw = json!({
            "key_findings": {
                "summary": "visible",
                "execution_trace": {"steps": ["internal"]},
                "research_steps": [
                    {"approach": "web search", "debug_info": "drop me"}
                ],
            },
        });

        let filtered = filter_reasoning(Some(&raw));
        let findings = &filtered["key_findings"];
        assert_eq!(findings["summary"], "visible");
        assert!(findings.get("execution_trace").is_none());
        assert!(findings["research_steps"][0].get("debug_info").is_none());
        assert_eq!(findings["research_steps"][0]["approach"], "web search");
    }

    #[test]
    fn filtering_is_structural_not_content_based() {
        // Same literal text under an allowed and a disallowed key; only the
        // allowed path survives.
        let raw = json!({
            "summary": "shared text",
            "raw_thoughts": "shared text",
        });

        let filtered = filter_reasoning(Some(&raw));
        assert_eq!(filtered["summary"], "shared text");
        assert!(filtered.get("raw_thoughts").is_none());
    }

    #[test]
    fn scalars_pass_through_unchanged() {
        let raw = json!({
            "sources_consulted": ["https://example.com", 42, true, null],
        });
        let filtered = filter_reasoning(Some(&raw));
        assert_eq!(
            filtered["sources_consulted"],
            json!(["https://example.com", 42, true, null])
        );
    }

    #[test]
    fn missing_payload_yields_empty_object() {
        assert_eq!(filter_reasoning(None), json!({}));
        assert_eq!(filter_reasoning(Some(&json!("not a map"))), json!({}));
    }

    #[test]
    fn api_format_applies_defaults_for_empty_payload() {
        let formatted = format_for_api(&json!({}));
        assert_eq!(
            formatted["research_brief"],
            "No reasoning information available"
        );
        assert_eq!(formatted["methodology"], "Standard research workflow");
    }

    #[test]
    fn api_format_fills_only_missing_required_fields() {
        let formatted = format_for_api(&json!({
            "methodology": "custom pipeline",
            "approach": "breadth first",
        }));
        assert_eq!(formatted["research_brief"], "Research completed successfully");
        assert_eq!(formatted["methodology"], "custom pipeline");
        assert_eq!(formatted["approach"], "breadth first");
    }
}
