//! Path normalization for the virtual file store and planned file tasks.

/// Filenames that live at the project root and are never moved under the
/// source directory.
pub const DEFAULT_ROOT_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "vite.config.js",
    "vite.config.ts",
    "tailwind.config.js",
    "postcss.config.js",
    "eslint.config.js",
    "tsconfig.json",
    "jsconfig.json",
    "components.json",
    "index.html",
    "README.md",
    ".gitignore",
    ".env",
];

/// Top-level directory names that belong inside the source directory.
pub const DEFAULT_SOURCE_SUBDIRS: &[&str] = &[
    "components",
    "lib",
    "hooks",
    "pages",
    "utils",
    "styles",
    "context",
    "assets",
];

/// Heuristic settings for placing planned files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRules {
    pub source_dir: String,
    pub root_files: Vec<String>,
    pub source_subdirs: Vec<String>,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            source_dir: "src".to_string(),
            root_files: DEFAULT_ROOT_FILES.iter().map(|s| s.to_string()).collect(),
            source_subdirs: DEFAULT_SOURCE_SUBDIRS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Normalize a store path: forward slashes, no leading `./` or `/`, no empty
/// segments, no trailing slash.
pub fn normalize_path(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a planned file path and apply the source-directory heuristic.
///
/// - A bare filename that is not a recognized root file gets `source_dir/`.
/// - A path whose first segment is a recognized source sub-directory
///   (`components/Button.jsx`) gets `source_dir/`.
/// - Everything else is kept as-is after normalization.
pub fn normalize_task_path(raw: &str, rules: &PathRules) -> String {
    let path = normalize_path(raw);
    if path.is_empty() {
        return path;
    }
    let source_dir = normalize_path(&rules.source_dir);
    if source_dir.is_empty() {
        return path;
    }
    if path == source_dir || path.starts_with(&format!("{source_dir}/")) {
        return path;
    }

    match path.split_once('/') {
        None => {
            if rules.root_files.iter().any(|name| name == &path) {
                path
            } else {
                format!("{source_dir}/{path}")
            }
        }
        Some((first, _)) => {
            if rules.source_subdirs.iter().any(|dir| dir == first) {
                format!("{source_dir}/{path}")
            } else {
                path
            }
        }
    }
}

/// Parent directories of `path`, nearest last (`a/b/c.js` → `a`, `a/b`).
pub fn ancestors(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').collect();
    (1..segments.len())
        .map(|end| segments[..end].join("/"))
        .collect()
}
