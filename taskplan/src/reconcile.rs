//! Diff Reconciliation: per-file accept/reject of pending diffs.
//!
//! Accepting writes the proposed content to the runtime first and commits it
//! to the file store only once that write succeeded; a failed write leaves the
//! diff pending. Rejecting never touches the runtime.

use anyhow::{Context, Result};
use similar::TextDiff;
use tracing::{info, instrument, warn};

use crate::core::diff_store::{Decision, PendingDiff, ReviewError};
use crate::core::path::normalize_path;
use crate::io::runtime::Runtime;
use crate::workspace::Workspace;

/// Result of an accept-all or reject-all pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Paths resolved, in display order.
    pub resolved: Vec<String>,
    /// Paths that stayed pending, with the error text.
    pub failed: Vec<(String, String)>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<R: Runtime> Workspace<R> {
    /// Commit the proposed content of the pending diff for `path`.
    #[instrument(skip_all, fields(path = %path))]
    pub fn accept(&mut self, path: &str) -> Result<PendingDiff> {
        let key = normalize_path(path);
        let proposed = self
            .pending_diff(&key)
            .map(|diff| diff.proposed.clone())
            .ok_or_else(|| ReviewError::NoPendingDiff { path: key.clone() })?;
        self.runtime()
            .write_file(&key, &proposed)
            .with_context(|| format!("write accepted {key}"))?;
        self.files_mut().upsert(&key, &proposed);
        let diff = self.diffs_mut().resolve(&key, Decision::Accepted)?;
        info!("accepted diff");
        Ok(diff)
    }

    /// Drop the pending diff for `path`, keeping the committed content.
    #[instrument(skip_all, fields(path = %path))]
    pub fn reject(&mut self, path: &str) -> Result<PendingDiff> {
        let diff = self.diffs_mut().resolve(path, Decision::Rejected)?;
        info!("rejected diff");
        Ok(diff)
    }

    /// Accept every pending diff in display order; failures do not stop the pass.
    pub fn accept_all(&mut self) -> BatchOutcome {
        self.resolve_all(Decision::Accepted)
    }

    /// Reject every pending diff in display order.
    pub fn reject_all(&mut self) -> BatchOutcome {
        self.resolve_all(Decision::Rejected)
    }

    pub fn has_pending_diff(&self, path: &str) -> bool {
        self.diffs().has_pending(path)
    }

    pub fn pending_paths(&self) -> Vec<String> {
        self.diffs().pending_paths()
    }

    pub fn pending_diff(&self, path: &str) -> Option<&PendingDiff> {
        self.diffs()
            .get(path)
            .filter(|_| self.diffs().has_pending(path))
    }

    /// Unified diff of the pending change for `path`.
    pub fn render_diff(&self, path: &str) -> Result<String> {
        let key = normalize_path(path);
        let diff = self
            .pending_diff(&key)
            .ok_or_else(|| ReviewError::NoPendingDiff { path: key.clone() })?;
        Ok(unified_diff(&key, &diff.original, &diff.proposed))
    }

    fn resolve_all(&mut self, decision: Decision) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for path in self.pending_paths() {
            let result = match decision {
                Decision::Accepted => self.accept(&path),
                Decision::Rejected => self.reject(&path),
            };
            match result {
                Ok(_) => outcome.resolved.push(path),
                Err(err) => {
                    warn!(path = %path, err = %format!("{err:#}"), "could not resolve diff");
                    outcome.failed.push((path, format!("{err:#}")));
                }
            }
        }
        outcome
    }
}

/// Render a unified diff between two versions of `path`.
pub fn unified_diff(path: &str, original: &str, proposed: &str) -> String {
    TextDiff::from_lines(original, proposed)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unified_diff_has_headers_and_hunks() {
        let rendered = unified_diff("src/App.jsx", "a\nold\nc\n", "a\nnew\nc\n");
        assert!(rendered.starts_with("--- a/src/App.jsx\n+++ b/src/App.jsx\n"));
        assert!(rendered.contains("-old\n"));
        assert!(rendered.contains("+new\n"));
    }
}
