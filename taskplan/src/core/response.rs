//! Extraction of a JSON object from free-form model replies.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde_json::Value;

static OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\{.*\})").expect("object regex should be valid"));

/// Parse the JSON object in `text`.
///
/// Markdown code fences are stripped first (a ```json fence wins over a bare
/// one). If the remainder still does not parse, the span from the first `{`
/// to the last `}` is tried.
pub fn extract_json(text: &str) -> Result<Value> {
    let body = strip_fences(text.trim()).trim();
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }
    if let Some(caps) = OBJECT_RE.captures(body)
        && let Ok(value) = serde_json::from_str::<Value>(&caps[1])
    {
        return Ok(value);
    }
    let preview: String = body.chars().take(200).collect();
    Err(anyhow!("reply is not valid json: {preview}"))
}

fn strip_fences(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest);
    }
    let mut parts = text.split("```");
    match (parts.next(), parts.next()) {
        (Some(_), Some(inner)) => inner,
        _ => text,
    }
}
