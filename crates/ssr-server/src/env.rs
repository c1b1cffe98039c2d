//! Filesystem layout and the renderer environment.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Resolve `path` against `root` unless it is already absolute.
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Directories resolved from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    pub root: PathBuf,
    pub dist: PathBuf,
    pub content_base: PathBuf,
    pub client_dir: PathBuf,
    pub entry_file: PathBuf,
    pub worker_script: PathBuf,
}

impl SiteLayout {
    /// Build the layout. `root` must already be absolute.
    ///
    /// `content_base` defaults to `dist`; `worker_script` defaults to
    /// `<root>/ssr/render-worker.mjs`.
    pub fn new(
        root: PathBuf,
        dist: &Path,
        content_base: Option<&Path>,
        worker_script: Option<&Path>,
    ) -> Self {
        let dist = resolve_path(&root, dist);
        let content_base = match content_base {
            Some(base) => resolve_path(&root, base),
            None => dist.clone(),
        };
        let worker_script = match worker_script {
            Some(script) => resolve_path(&root, script),
            None => root.join("ssr").join("render-worker.mjs"),
        };

        Self {
            client_dir: dist.join("client"),
            entry_file: dist.join("server").join("entry-server.mjs"),
            root,
            dist,
            content_base,
            worker_script,
        }
    }
}

/// `NODE_PATH` value from whichever module directories exist under `root`.
pub fn node_path(root: &Path) -> Option<OsString> {
    let candidates = [
        root.join("node_modules"),
        root.join("server").join("node_modules"),
    ];
    let existing: Vec<_> = candidates.into_iter().filter(|dir| dir.is_dir()).collect();
    if existing.is_empty() {
        return None;
    }
    std::env::join_paths(existing).ok()
}

/// Environment overlay for the renderer process.
pub fn renderer_env(layout: &SiteLayout) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("NODE_ENV".to_string(), "production".to_string());
    env.insert(
        "CONTENT_BASE".to_string(),
        layout.content_base.to_string_lossy().into_owned(),
    );
    env.insert("LOW_MEMORY_MODE".to_string(), "true".to_string());
    if let Some(path) = node_path(&layout.root) {
        env.insert("NODE_PATH".to_string(), path.to_string_lossy().into_owned());
    }
    env
}
