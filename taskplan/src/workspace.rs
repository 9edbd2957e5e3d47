//! The owned service bundle a session operates on.
//!
//! A [`Workspace`] owns the runtime adapter, the Virtual File Store and the
//! Diff Store. Executors and the reconciliation API borrow it mutably, so only
//! one of them can touch the stores at a time.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::core::diff_store::DiffStore;
use crate::core::file_store::FileStore;
use crate::core::types::FileTree;
use crate::io::runtime::{Runtime, load_tree};

pub struct Workspace<R> {
    runtime: R,
    files: FileStore,
    diffs: DiffStore,
    active_session: Option<CancellationToken>,
}

impl<R: Runtime> Workspace<R> {
    /// Wrap `runtime` with empty stores.
    pub fn new(runtime: R) -> Self {
        Self::with_stores(runtime, FileStore::new(), DiffStore::new())
    }

    pub fn with_stores(runtime: R, files: FileStore, diffs: DiffStore) -> Self {
        Self {
            runtime,
            files,
            diffs,
            active_session: None,
        }
    }

    /// Boot the runtime and seed the file store from its contents.
    #[instrument(skip_all)]
    pub fn open(runtime: R, ignore: &[String]) -> Result<Self> {
        runtime.boot().context("boot runtime")?;
        let tree = load_tree(&runtime, ignore).context("load project tree")?;
        let mut files = FileStore::new();
        files.set_all(&tree);
        info!(files = files.list().len(), "workspace opened");
        Ok(Self::with_stores(runtime, files, DiffStore::new()))
    }

    /// Mount `tree` into the runtime and reseed the file store from it.
    pub fn mount(&mut self, tree: &FileTree) -> Result<()> {
        self.runtime.mount(tree).context("mount tree")?;
        self.files.set_all(tree);
        Ok(())
    }

    /// Hand out the cancellation token for a new session.
    ///
    /// Any token handed out earlier is cancelled first, so a stale run stops
    /// at its next checkpoint.
    pub fn begin_session(&mut self) -> CancellationToken {
        if let Some(previous) = self.active_session.take()
            && !previous.is_cancelled()
        {
            info!("cancelling previous session");
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.active_session = Some(token.clone());
        token
    }

    /// Cancel the active session, if any.
    pub fn cancel_session(&mut self) {
        if let Some(token) = self.active_session.take() {
            token.cancel();
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FileStore {
        &mut self.files
    }

    pub fn diffs(&self) -> &DiffStore {
        &self.diffs
    }

    pub fn diffs_mut(&mut self) -> &mut DiffStore {
        &mut self.diffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::runtime::LocalRuntime;

    #[test]
    fn begin_session_cancels_previous_token() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut workspace = Workspace::new(LocalRuntime::new(temp.path()));
        let first = workspace.begin_session();
        let second = workspace.begin_session();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        workspace.cancel_session();
        assert!(second.is_cancelled());
    }

    #[test]
    fn open_seeds_files_and_skips_ignored_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        std::fs::create_dir_all(temp.path().join("node_modules/x")).expect("mkdir");
        std::fs::write(temp.path().join("src/App.jsx"), "app").expect("write");
        std::fs::write(temp.path().join("node_modules/x/i.js"), "x").expect("write");

        let workspace = Workspace::open(
            LocalRuntime::new(temp.path()),
            &["node_modules".to_string()],
        )
        .expect("open");
        assert_eq!(workspace.files().list(), vec!["src/App.jsx"]);
        assert_eq!(workspace.files().content("src/App.jsx"), Some("app"));
    }
}
