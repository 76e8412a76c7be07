//! Pull a JSON object out of a chat model reply that may wrap it in
//! reasoning tags, markdown fences or prose.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

const REASONING_TAGS: &[&str] = &["thinking", "think", "reasoning", "analysis"];

fn reasoning_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns = Vec::new();
        for tag in REASONING_TAGS {
            let sources = [
                format!(r"(?i)<{tag}\s*/>"),
                format!(r"(?is)<{tag}(\s[^>]*)?>.*?</{tag}>"),
                // unclosed: drop everything from the opening tag on
                format!(r"(?is)<{tag}(\s[^>]*)?>.*$"),
            ];
            for source in sources {
                if let Ok(re) = Regex::new(&source) {
                    patterns.push(re);
                }
            }
        }
        patterns
    })
}

fn strip_reasoning(text: &str) -> String {
    let mut out = text.to_string();
    for re in reasoning_patterns() {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}

fn fenced_body(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // skip an optional language tag on the fence line
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn as_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// First JSON object found by, in order: direct parse, parse after removing
/// reasoning tags, parse of a fenced block, parse of the outermost braces.
pub fn extract_object(reply: &str) -> Option<Map<String, Value>> {
    if let Some(map) = as_object(reply) {
        return Some(map);
    }
    let cleaned = strip_reasoning(reply);
    let cleaned = cleaned.trim();
    if let Some(map) = as_object(cleaned) {
        return Some(map);
    }
    if let Some(map) = fenced_body(cleaned).and_then(as_object) {
        return Some(map);
    }
    let (start, end) = (cleaned.find('{')?, cleaned.rfind('}')?);
    if start < end {
        return as_object(&cleaned[start..=end]);
    }
    None
}
