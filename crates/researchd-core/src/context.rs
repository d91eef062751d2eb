//! Continuation context rendering.
//!
//! When a session continues a prior one, the parent's brief and findings
//! are rendered into a context block injected into the new engine request.
//! The rendering is deterministic so continuation deduplication can be
//! verified property-style.

const MAX_FINDINGS_CHARS: usize = 1000;

/// Prior-session material a continuation is seeded from.
#[derive(Debug, Clone, Default)]
pub struct ContinuationSource {
    pub brief: Option<String>,
    pub summary: Option<String>,
}

/// Render the continuation context for a follow-up session.
///
/// Emits one line per present, non-empty field, joined by a blank line.
/// Findings longer than 1000 characters are truncated with an ellipsis
/// marker. No prior material yields an empty string, not an error.
pub fn build_context(prior: &ContinuationSource) -> String {
    let mut parts = Vec::new();

    if let Some(brief) = prior.brief.as_deref() {
        if !brief.is_empty() {
            parts.push(format!("Previous research brief: {brief}"));
        }
    }

    if let Some(summary) = prior.summary.as_deref() {
        if !summary.is_empty() {
            parts.push(format!(
                "Previous research findings: {}",
                truncate_with_ellipsis(summary, MAX_FINDINGS_CHARS)
            ));
        }
    }

    parts.join("\n\n")
}

fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(limit).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_both_lines_with_separator() {
        let context = build_context(&ContinuationSource {
            brief: Some("B".to_string()),
            summary: Some("S".to_string()),
        });

        assert!(context.contains("Previous research brief: B"));
        assert!(context.contains("Previous research findings: S"));
        assert_eq!(context.matches("\n\n").count(), 1);
    }

    #[test]
    fn empty_source_yields_empty_string() {
        assert_eq!(build_context(&ContinuationSource::default()), "");
    }

    #[test]
    fn blank_fields_are_skipped() {
        let context = build_context(&ContinuationSource {
            brief: Some(String::new()),
            summary: Some("only findings".to_string()),
        });
        assert_eq!(context, "Previous research findings: only findings");
    }

    #[test]
    fn long_findings_are_truncated_with_marker() {
        let summary = "x".repeat(1500);
        let context = build_context(&ContinuationSource {
            brief: None,
            summary: Some(summary),
        });

        assert!(context.ends_with("..."));
        let rendered = context
            .strip_prefix("Previous research findings: ")
            .unwrap();
        assert_eq!(rendered.chars().count(), 1003);
    }

    #[test]
    fn exactly_limit_length_is_untouched() {
        let summary = "y".repeat(1000);
        let context = build_context(&ContinuationSource {
            brief: None,
            summary: Some(summary.clone()),
        });
        assert_eq!(context, format!("Previous research findings: {summary}"));
    }

    #[test]
    fn deterministic_for_same_input() {
        let source = ContinuationSource {
            brief: Some("market drivers".to_string()),
            summary: Some("demand outpaces supply".to_string()),
        };
        assert_eq!(build_context(&source), build_context(&source));
    }
}
