//! Repository snapshot: the evidence the detector scores against.
//!
//! Built either programmatically (tests, webhook payloads) or from a local
//! directory via the `ignore` walker (respects .gitignore). Dependency
//! names are parsed out of the common manifests; file contents are sampled
//! for small text files only.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Maximum bytes of a file sampled into the content channel
const MAX_CONTENT_BYTES: u64 = 64 * 1024;

/// Maximum number of files sampled into the content channel
const MAX_CONTENT_FILES: usize = 200;

const TEXT_EXTENSIONS: &[&str] = &[
    "json", "toml", "yaml", "yml", "md", "txt", "js", "ts", "tsx", "jsx", "nix", "cfg", "ini",
];

/// Evidence snapshot of one repository.
#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    /// Repo-relative file paths
    pub files: Vec<String>,
    /// Repo-relative directory paths
    pub folders: Vec<String>,
    /// Dependency names from manifests (package.json, Cargo.toml, requirements.txt)
    pub deps: Vec<String>,
    /// Recent commit messages, newest first
    pub commit_messages: Vec<String>,
    /// Sampled `(path, content)` pairs for the content channel
    pub contents: Vec<(String, String)>,
}

impl RepoSnapshot {
    /// Build a snapshot by walking a local directory.
    pub fn from_dir(root: &Utf8Path) -> Result<Self> {
        let mut snapshot = Self::default();
        let mut folders: BTreeSet<String> = BTreeSet::new();

        let walker = WalkBuilder::new(root).hidden(false).build();
        for entry in walker.flatten() {
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else {
                continue;
            };
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if relative.as_str().is_empty() || relative.as_str().starts_with(".git/") {
                continue;
            }

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                folders.insert(relative.as_str().to_string());
                continue;
            }

            snapshot.files.push(relative.as_str().to_string());
            for ancestor in relative.ancestors().skip(1) {
                if !ancestor.as_str().is_empty() {
                    folders.insert(ancestor.as_str().to_string());
                }
            }

            if snapshot.contents.len() < MAX_CONTENT_FILES && is_samplable(relative, &entry) {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    snapshot.parse_deps(relative.as_str(), &content);
                    snapshot
                        .contents
                        .push((relative.as_str().to_string(), content));
                }
            }
        }

        snapshot.folders = folders.into_iter().collect();
        snapshot.files.sort();
        snapshot.deps.sort();
        snapshot.deps.dedup();
        debug!(
            files = snapshot.files.len(),
            deps = snapshot.deps.len(),
            "built repo snapshot"
        );
        Ok(snapshot)
    }

    /// Attach commit messages (the walker cannot see git history).
    pub fn with_commits(mut self, messages: Vec<String>) -> Self {
        self.commit_messages = messages;
        self
    }

    fn parse_deps(&mut self, relative: &str, content: &str) {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        match name {
            "package.json" => self.parse_package_json(content),
            "Cargo.toml" => self.parse_cargo_toml(content),
            "requirements.txt" => self.parse_requirements(content),
            _ => {}
        }
    }

    fn parse_package_json(&mut self, content: &str) {
        let Ok(json) = serde_json::from_str::<Value>(content) else {
            return;
        };
        for section in ["dependencies", "devDependencies", "peerDependencies"] {
            if let Some(deps) = json.get(section).and_then(Value::as_object) {
                self.deps.extend(deps.keys().cloned());
            }
        }
    }

    fn parse_cargo_toml(&mut self, content: &str) {
        let Ok(toml) = content.parse::<toml::Table>() else {
            return;
        };
        for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
            if let Some(deps) = toml.get(section).and_then(|v| v.as_table()) {
                self.deps.extend(deps.keys().cloned());
            }
        }
    }

    fn parse_requirements(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let name: String = line
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
                .collect();
            if !name.is_empty() {
                self.deps.push(name);
            }
        }
    }
}

fn is_samplable(path: &Utf8Path, entry: &ignore::DirEntry) -> bool {
    let small = entry
        .metadata()
        .map(|m| m.len() <= MAX_CONTENT_BYTES)
        .unwrap_or(false);
    if !small {
        return false;
    }
    match path.extension() {
        Some(ext) => TEXT_EXTENSIONS.contains(&ext),
        // Dotfiles like .replit or .cursorrules carry strong signal
        None => path
            .file_name()
            .map(|n| n.starts_with('.'))
            .unwrap_or(false),
    }
}
