//! Insight validator: raw synthesis text → typed insights.
//!
//! The synthesis step tends to wrap its answer in prose or code fences. The
//! first balanced `[...]` that parses as a JSON array wins; everything inside
//! it is coerced field by field, so one sloppy element never costs the batch.

use serde_json::{Map, Value};

use crate::ingest::types::normalize_tags;
use crate::insight::{clamp01, Insight, InsightKind, Pattern, Priority, SUMMARY_MAX_CHARS};

#[derive(Debug, thiserror::Error)]
pub enum SynthesisFormatError {
    #[error("no JSON array found in synthesis output")]
    NoArray,
    #[error("synthesis output contains a bracketed block but it is not a JSON array: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// Record of a coercion the validator had to make.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RemapNote {
    /// Position in the extracted array.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub insights: Vec<Insight>,
    pub notes: Vec<RemapNote>,
}

/// Parser bound to the kinds a destination store can hold.
#[derive(Debug, Clone)]
pub struct Validator {
    supported: Vec<InsightKind>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(&InsightKind::ALL)
    }
}

impl Validator {
    /// An empty list means "everything".
    pub fn new(supported_kinds: &[InsightKind]) -> Self {
        let supported = if supported_kinds.is_empty() {
            InsightKind::ALL.to_vec()
        } else {
            supported_kinds.to_vec()
        };
        Self { supported }
    }

    /// Closest stand-in for a kind the destination cannot hold.
    fn fallback_kind(&self) -> InsightKind {
        if self.supported.contains(&InsightKind::Divergence) {
            InsightKind::Divergence
        } else {
            self.supported[0]
        }
    }

    pub fn parse(&self, raw: &str) -> Result<ParseOutcome, SynthesisFormatError> {
        let items = extract_array(raw)?;
        let mut out = ParseOutcome::default();

        for (index, item) in items.into_iter().enumerate() {
            let Value::Object(obj) = item else {
                out.notes.push(RemapNote {
                    index,
                    message: "element is not an object, skipped".to_string(),
                });
                continue;
            };
            match self.coerce(index, &obj, &mut out.notes) {
                Some(insight) => out.insights.push(insight),
                None => out.notes.push(RemapNote {
                    index,
                    message: "element has no topic, skipped".to_string(),
                }),
            }
        }

        for n in &out.notes {
            tracing::warn!(index = n.index, note = %n.message, "synthesis output coerced");
        }
        tracing::debug!(
            insights = out.insights.len(),
            notes = out.notes.len(),
            "synthesis output parsed"
        );
        Ok(out)
    }

    fn coerce(
        &self,
        index: usize,
        obj: &Map<String, Value>,
        notes: &mut Vec<RemapNote>,
    ) -> Option<Insight> {
        let topic = str_field(obj, &["topic", "title"])
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())?;

        let raw_kind = str_field(obj, &["kind", "type"]);
        let kind = match raw_kind.and_then(InsightKind::parse) {
            Some(k) if self.supported.contains(&k) => k,
            parsed => {
                let to = self.fallback_kind();
                let message = match (raw_kind, parsed) {
                    (_, Some(k)) => format!("kind {k} unsupported by destination, stored as {to}"),
                    (Some(r), None) => format!("unknown kind {r:?}, stored as {to}"),
                    (None, None) => format!("missing kind, stored as {to}"),
                };
                notes.push(RemapNote { index, message });
                to
            }
        };

        let summary = str_field(obj, &["summary", "description"])
            .map(|s| truncate_chars(s.trim(), SUMMARY_MAX_CHARS))
            .unwrap_or_default();

        let confidence = obj.get("confidence").map(number_of).unwrap_or(0.0);

        let priority = match obj.get("priority") {
            None | Some(Value::Null) => Priority::default(),
            Some(v) => match value_as_str(v).as_deref().and_then(Priority::parse) {
                Some(p) => p,
                None => {
                    notes.push(RemapNote {
                        index,
                        message: format!("invalid priority {v}, stored as p2"),
                    });
                    Priority::default()
                }
            },
        };

        let pattern = str_field(obj, &["pattern"])
            .and_then(Pattern::parse)
            .unwrap_or_default();

        let mut insight = Insight::new(kind, topic, summary)
            .with_confidence(confidence)
            .with_priority(priority)
            .with_sources(string_list(obj.get("sources")))
            .with_pattern(pattern);
        insight.claimed_tiers = normalize_tags(string_list(obj.get("convergence_tiers")));
        Some(insight)
    }
}

/// `Validator::default().parse(raw)`.
pub fn parse(raw: &str) -> Result<ParseOutcome, SynthesisFormatError> {
    Validator::default().parse(raw)
}

/// First balanced bracket block that parses as an array.
fn extract_array(raw: &str) -> Result<Vec<Value>, SynthesisFormatError> {
    let mut first_err = None;
    let mut from = 0;
    while let Some(off) = raw[from..].find('[') {
        let start = from + off;
        let Some(end) = matching_bracket(raw, start) else {
            from = start + 1;
            continue;
        };
        match serde_json::from_str::<Vec<Value>>(&raw[start..=end]) {
            Ok(v) => return Ok(v),
            Err(e) => {
                first_err.get_or_insert(e);
                from = start + 1;
            }
        }
    }
    Err(match first_err {
        Some(e) => SynthesisFormatError::InvalidJson(e),
        None => SynthesisFormatError::NoArray,
    })
}

/// Byte index of the `]` closing the `[` at `start`, skipping string contents.
fn matching_bracket(s: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in s[start..].char_indices() {
        if in_str {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn str_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
}

fn value_as_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_of(v: &Value) -> f32 {
    let x = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => match s.trim().strip_suffix('%') {
            Some(pct) => pct.trim().parse::<f64>().map(|p| p / 100.0).unwrap_or(0.0),
            None => s.trim().parse::<f64>().unwrap_or(0.0),
        },
        _ => 0.0,
    };
    clamp01(x as f32)
}

/// Accepts an array of strings or one comma-separated string.
fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prose_without_array_is_a_format_error() {
        let err = parse("I cannot help.").unwrap_err();
        assert!(matches!(err, SynthesisFormatError::NoArray));
    }

    #[test]
    fn unparsable_array_is_a_format_error() {
        let err = parse("here: [ {\"topic\": } ]").unwrap_err();
        assert!(matches!(err, SynthesisFormatError::InvalidJson(_)));
    }

    #[test]
    fn array_is_extracted_from_surrounding_prose() {
        let raw = r#"Sure! Here you go:
```json
[ {"kind": "trend", "topic": "MCP servers [beta]", "summary": "s", "priority": "p1", "confidence": 0.7} ]
```
Let me know if you need more."#;
        let out = parse(raw).unwrap();
        assert_eq!(out.insights.len(), 1);
        let i = &out.insights[0];
        assert_eq!(i.topic, "MCP servers [beta]");
        assert_eq!(i.priority, Priority::P1);
        assert!((i.confidence - 0.7).abs() < 1e-6);
        assert!(out.notes.is_empty());
    }

    #[test]
    fn skips_a_bracketed_aside_that_is_not_json() {
        let raw = r#"Note [see below]: [{"kind":"consensus","topic":"x"}]"#;
        let out = parse(raw).unwrap();
        assert_eq!(out.insights[0].kind, InsightKind::Consensus);
    }

    #[test]
    fn missing_optional_fields_get_defaults() {
        let out = parse(r#"[{"kind": "trend", "topic": "agents"}]"#).unwrap();
        let i = &out.insights[0];
        assert_eq!(i.priority, Priority::P2);
        assert_eq!(i.confidence, 0.0);
        assert!(i.sources.is_empty());
        assert!(i.claimed_tiers.is_empty());
        assert_eq!(i.pattern, Pattern::None);
    }

    #[test]
    fn bad_values_are_coerced_per_element() {
        let raw = r#"[
            {"kind": "trend", "topic": "a", "confidence": 4.2, "priority": "urgent"},
            {"type": "tool-mention", "topic": "b", "confidence": "55%", "sources": "HN, Lobsters , hn"},
            42,
            {"kind": "trend", "summary": "no topic"}
        ]"#;
        let out = parse(raw).unwrap();
        assert_eq!(out.insights.len(), 2);
        assert_eq!(out.insights[0].confidence, 1.0);
        assert_eq!(out.insights[0].priority, Priority::P2);
        assert_eq!(out.insights[1].kind, InsightKind::ToolMention);
        assert!((out.insights[1].confidence - 0.55).abs() < 1e-6);
        assert_eq!(out.insights[1].sources, vec!["hn", "lobsters"]);
        // invalid priority, non-object, missing topic
        assert_eq!(out.notes.len(), 3);
    }

    #[test]
    fn gap_on_a_legacy_destination_becomes_divergence_with_a_note() {
        let legacy = [
            InsightKind::Trend,
            InsightKind::Consensus,
            InsightKind::Divergence,
            InsightKind::ToolMention,
        ];
        let out = Validator::new(&legacy)
            .parse(r#"[{"kind": "gap", "topic": "nobody benchmarks sandboxes"}]"#)
            .unwrap();
        assert_eq!(out.insights[0].kind, InsightKind::Divergence);
        assert_eq!(out.notes.len(), 1);
        assert!(out.notes[0].message.contains("gap"));
    }

    #[test]
    fn unknown_kind_is_remapped_and_noted() {
        let out = parse(r#"[{"kind": "hot take", "topic": "x"}]"#).unwrap();
        assert_eq!(out.insights[0].kind, InsightKind::Divergence);
        assert_eq!(out.notes.len(), 1);
    }

    #[test]
    fn summary_is_bounded() {
        let long = "é".repeat(SUMMARY_MAX_CHARS + 50);
        let raw = format!(r#"[{{"kind":"trend","topic":"x","summary":"{long}"}}]"#);
        let out = parse(&raw).unwrap();
        assert_eq!(out.insights[0].summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn order_is_preserved() {
        let out = parse(r#"[{"kind":"trend","topic":"1"},{"kind":"gap","topic":"2"},{"kind":"trend","topic":"3"}]"#)
            .unwrap();
        let topics: Vec<_> = out.insights.iter().map(|i| i.topic.as_str()).collect();
        assert_eq!(topics, vec!["1", "2", "3"]);
    }
}
