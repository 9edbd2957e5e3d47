//! Persistence of pending diffs and review history across CLI invocations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::diff_store::DiffStore;
use crate::io::config::write_atomic;

/// Load review state; a missing file is an empty store.
pub fn load_review_state(path: &Path) -> Result<DiffStore> {
    if !path.exists() {
        return Ok(DiffStore::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read review state {}", path.display()))?;
    let store: DiffStore = serde_json::from_str(&contents)
        .with_context(|| format!("parse review state {}", path.display()))?;
    debug!(pending = store.pending_paths().len(), "loaded review state");
    Ok(store)
}

/// Atomically write review state.
pub fn write_review_state(path: &Path, store: &DiffStore) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(store).context("serialize review state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff_store::Decision;

    #[test]
    fn missing_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = load_review_state(&temp.path().join("review.json")).expect("load");
        assert!(store.is_empty());
    }

    #[test]
    fn pending_and_history_survive_reload() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state").join("review.json");
        let mut store = DiffStore::new();
        store.propose("src/App.jsx", "OLD", "NEW");
        store.propose("src/a.js", "a", "b");
        store.resolve("src/a.js", Decision::Rejected).expect("reject");
        write_review_state(&path, &store).expect("write");

        let loaded = load_review_state(&path).expect("load");
        assert_eq!(loaded.pending_paths(), vec!["src/App.jsx"]);
        assert_eq!(loaded.history().len(), 1);
    }
}
