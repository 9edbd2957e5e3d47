//! In-memory virtual file store: the editor-facing source of truth.
//!
//! Paths are normalized on every entry point. Empty directories exist only as
//! folder-marker entries; writing a file beneath a marker drops the marker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::path::{ancestors, normalize_path};
use crate::core::types::{FileTree, TreeNode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
    /// Set by `upsert`; cleared when the store is reseeded.
    pub modified: bool,
    pub is_folder: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStore {
    entries: BTreeMap<String, FileEntry>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole store with `tree`. Entries start unmodified.
    pub fn set_all(&mut self, tree: &FileTree) {
        self.entries.clear();
        for (raw, node) in tree {
            let path = normalize_path(raw);
            if path.is_empty() {
                continue;
            }
            let entry = match node {
                TreeNode::File(content) => FileEntry {
                    path: path.clone(),
                    content: content.clone(),
                    modified: false,
                    is_folder: false,
                },
                TreeNode::Folder(_) => folder_entry(&path),
            };
            self.entries.insert(path, entry);
        }
        let files: Vec<String> = self.list();
        for path in files {
            self.drop_ancestor_markers(&path);
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(&normalize_path(path))
    }

    /// File content for `path`; `None` for missing paths and folder markers.
    pub fn content(&self, path: &str) -> Option<&str> {
        self.get(path)
            .filter(|entry| !entry.is_folder)
            .map(|entry| entry.content.as_str())
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.content(path).is_some()
    }

    /// Insert or overwrite a file and mark it modified.
    pub fn upsert(&mut self, path: &str, content: &str) {
        let path = normalize_path(path);
        if path.is_empty() {
            return;
        }
        self.drop_ancestor_markers(&path);
        self.entries.insert(
            path.clone(),
            FileEntry {
                path,
                content: content.to_string(),
                modified: true,
                is_folder: false,
            },
        );
    }

    /// Record an empty directory. No-op if the directory already holds files.
    pub fn add_folder(&mut self, path: &str) {
        let path = normalize_path(path);
        if path.is_empty() || self.entries.contains_key(&path) {
            return;
        }
        let prefix = format!("{path}/");
        if self.entries.keys().any(|key| key.starts_with(&prefix)) {
            return;
        }
        self.drop_ancestor_markers(&path);
        self.entries.insert(path.clone(), folder_entry(&path));
    }

    /// Remove a file or marker; removing a directory path removes its subtree.
    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        let path = normalize_path(path);
        let removed = self.entries.remove(&path);
        let prefix = format!("{path}/");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        removed
    }

    /// File paths in sorted order, excluding folder markers.
    pub fn list(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| !entry.is_folder)
            .map(|entry| entry.path.clone())
            .collect()
    }

    /// Paths modified since the last `set_all`.
    pub fn modified(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.modified && !entry.is_folder)
            .map(|entry| entry.path.clone())
            .collect()
    }

    /// Path → content for every file (no markers).
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .values()
            .filter(|entry| !entry.is_folder)
            .map(|entry| (entry.path.clone(), entry.content.clone()))
            .collect()
    }

    /// Full tree including folder markers, suitable for `Runtime::mount`.
    pub fn tree(&self) -> FileTree {
        self.entries
            .values()
            .map(|entry| {
                let node = if entry.is_folder {
                    TreeNode::folder()
                } else {
                    TreeNode::File(entry.content.clone())
                };
                (entry.path.clone(), node)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drop_ancestor_markers(&mut self, path: &str) {
        for dir in ancestors(path) {
            if self.entries.get(&dir).is_some_and(|entry| entry.is_folder) {
                self.entries.remove(&dir);
            }
        }
    }
}

fn folder_entry(path: &str) -> FileEntry {
    FileEntry {
        path: path.to_string(),
        content: String::new(),
        modified: false,
        is_folder: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[(&str, Option<&str>)]) -> FileTree {
        entries
            .iter()
            .map(|(path, content)| {
                let node = match content {
                    Some(text) => TreeNode::File(text.to_string()),
                    None => TreeNode::folder(),
                };
                (path.to_string(), node)
            })
            .collect()
    }

    #[test]
    fn set_all_normalizes_and_lists_files_only() {
        let mut store = FileStore::new();
        store.set_all(&tree(&[
            ("./src/App.jsx", Some("app")),
            ("public/", None),
        ]));
        assert_eq!(store.list(), vec!["src/App.jsx"]);
        assert!(store.get("public").expect("marker").is_folder);
        assert_eq!(store.content("src/App.jsx"), Some("app"));
        assert!(store.modified().is_empty());
    }

    #[test]
    fn upsert_marks_modified_and_clears_parent_marker() {
        let mut store = FileStore::new();
        store.add_folder("src/hooks");
        store.upsert("src/hooks/useTodo.js", "hook");
        assert!(store.get("src/hooks").is_none());
        assert_eq!(store.modified(), vec!["src/hooks/useTodo.js"]);
    }

    #[test]
    fn folder_marker_is_not_file_content() {
        let mut store = FileStore::new();
        store.add_folder("assets");
        assert_eq!(store.content("assets"), None);
        assert!(!store.contains_file("assets"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn add_folder_is_skipped_for_non_empty_directory() {
        let mut store = FileStore::new();
        store.upsert("src/main.jsx", "main");
        store.add_folder("src");
        assert!(store.get("src").is_none());
    }

    #[test]
    fn remove_drops_subtree() {
        let mut store = FileStore::new();
        store.upsert("src/a.js", "a");
        store.upsert("src/b/c.js", "c");
        store.upsert("other.js", "o");
        store.remove("src");
        assert_eq!(store.list(), vec!["other.js"]);
    }

    #[test]
    fn tree_round_trips_through_set_all() {
        let mut store = FileStore::new();
        store.upsert("src/App.jsx", "app");
        store.add_folder("public");
        let mut reseeded = FileStore::new();
        reseeded.set_all(&store.tree());
        assert_eq!(reseeded.snapshot(), store.snapshot());
        assert!(reseeded.get("public").expect("marker").is_folder);
    }
}
