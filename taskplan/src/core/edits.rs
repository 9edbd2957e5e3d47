//! Search/replace edit application for generated file updates.
//!
//! Update replies from the generator may carry edit blocks instead of a full
//! file. Each block is applied in order against the evolving content: an exact
//! first-occurrence match wins, otherwise a whitespace-insensitive line window
//! match is accepted when at least [`FUZZY_THRESHOLD`] of its lines agree.

use serde::{Deserialize, Serialize};

/// Minimum share of matching trimmed lines for a fuzzy window match.
pub const FUZZY_THRESHOLD: f64 = 0.8;

/// One search/replace block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub replace: String,
}

/// Result of applying a batch of edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub content: String,
    pub applied: usize,
    /// Indices (into the input slice) of edits that matched nowhere.
    pub failed: Vec<usize>,
}

/// Apply a single edit. Returns `None` when `search` cannot be located.
pub fn apply_edit(original: &str, search: &str, replace: &str) -> Option<String> {
    if original.is_empty() {
        return Some(replace.to_string());
    }
    if search.is_empty() {
        return Some(format!("{replace}{original}"));
    }

    let original = original.replace("\r\n", "\n");
    let search = search.replace("\r\n", "\n");
    let replace = replace.replace("\r\n", "\n");

    if original.contains(&search) {
        return Some(original.replacen(&search, &replace, 1));
    }

    let original_lines: Vec<&str> = original.split('\n').collect();
    let search_lines: Vec<&str> = search
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if search_lines.is_empty() || search_lines.len() > original_lines.len() {
        return None;
    }

    let mut best_start = None;
    let mut best_score = 0.0_f64;
    for start in 0..=(original_lines.len() - search_lines.len()) {
        let window = &original_lines[start..start + search_lines.len()];
        let matches = window
            .iter()
            .zip(&search_lines)
            .filter(|(line, wanted)| line.trim() == **wanted)
            .count();
        let score = matches as f64 / search_lines.len() as f64;
        if score > best_score {
            best_score = score;
            best_start = Some(start);
        }
    }

    let start = best_start.filter(|_| best_score >= FUZZY_THRESHOLD)?;
    let mut lines: Vec<&str> = original_lines[..start].to_vec();
    lines.extend(replace.split('\n'));
    lines.extend(&original_lines[start + search_lines.len()..]);
    Some(lines.join("\n"))
}

/// Apply edits in order; unmatched edits are skipped and reported.
pub fn apply_edits(original: &str, edits: &[Edit]) -> EditOutcome {
    let mut content = original.to_string();
    let mut failed = Vec::new();
    for (idx, edit) in edits.iter().enumerate() {
        match apply_edit(&content, &edit.search, &edit.replace) {
            Some(next) => content = next,
            None => failed.push(idx),
        }
    }
    EditOutcome {
        content,
        applied: edits.len() - failed.len(),
        failed,
    }
}
