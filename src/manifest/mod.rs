//! Project file manifest.
//!
//! A manifest is a consistent snapshot of the project's files and derived
//! metadata at one point in sandbox time. It is always rebuilt whole from a
//! sandbox listing, never partially mutated, so every consumer of a manifest
//! sees the same state.

mod builder;

pub use builder::{build_manifest, extract_import_specifiers, is_relative_specifier, SourceFile};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One file inside a manifest snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// File content. Empty for binary or oversized files.
    pub content: String,
    /// Size in bytes on disk.
    pub size: u64,
    /// Modification marker (milliseconds since epoch) when scanned.
    pub mtime: u64,
    /// Manifest paths this file imports, resolved from its import statements.
    pub imports: Vec<String>,
    /// Whether content was withheld (binary or over the size cap).
    pub content_elided: bool,
}

/// Snapshot of the project's files keyed by normalized relative path.
///
/// Paths use forward slashes and carry no leading `./`. The BTreeMap keeps
/// iteration order stable, which downstream ranking relies on for
/// deterministic tie-breaking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileManifest {
    files: BTreeMap<String, FileRecord>,
}

impl FileManifest {
    pub fn new(files: BTreeMap<String, FileRecord>) -> Self {
        Self { files }
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate files in stable path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileRecord)> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    /// Files that import `path`, in stable path order.
    pub fn importers_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a String> {
        self.files
            .iter()
            .filter(move |(_, record)| record.imports.iter().any(|i| i == path))
            .map(|(p, _)| p)
    }

    /// Content digest over every path and file body.
    ///
    /// Two manifests with identical contents produce identical fingerprints,
    /// which makes snapshot identity checkable in logs and turn summaries.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, record) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update(record.content.as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Render the structural summary: a file tree plus import relationships.
    ///
    /// The summary is what the completion capability always sees, even when
    /// the token budget admits no file bodies, so it is kept compact and is
    /// truncated by the context selector to fit its reservation.
    pub fn structural_summary(&self) -> String {
        let mut out = String::from("Project structure:\n");
        for (path, record) in &self.files {
            out.push_str("  ");
            out.push_str(path);
            if record.content_elided {
                out.push_str(" (content elided)");
            }
            out.push('\n');
        }

        let mut edges = Vec::new();
        for (path, record) in &self.files {
            for import in &record.imports {
                edges.push(format!("  {} -> {}", path, import));
            }
        }
        if !edges.is_empty() {
            out.push_str("Import relationships:\n");
            for edge in edges {
                out.push_str(&edge);
                out.push('\n');
            }
        }
        out
    }
}

/// Normalize a relative path: forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches("./");
    path.trim_start_matches('/').to_string()
}

/// Whether a path names a project configuration file.
///
/// Touching one of these triggers a dev-server restart after apply.
pub fn is_config_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    matches!(
        name,
        "package.json" | "tsconfig.json" | "jsconfig.json" | ".env" | ".env.local"
    ) || name.starts_with("vite.config.")
        || name.starts_with("next.config.")
        || name.starts_with("tailwind.config.")
        || name.starts_with("postcss.config.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str, imports: Vec<&str>) -> FileRecord {
        FileRecord {
            content: content.to_string(),
            size: content.len() as u64,
            mtime: 0,
            imports: imports.into_iter().map(String::from).collect(),
            content_elided: false,
        }
    }

    fn sample() -> FileManifest {
        let mut files = BTreeMap::new();
        files.insert(
            "src/Header.tsx".to_string(),
            record("import './styles.css';", vec!["src/styles.css"]),
        );
        files.insert("src/styles.css".to_string(), record(".header {}", vec![]));
        FileManifest::new(files)
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/App.tsx"), "src/App.tsx");
        assert_eq!(normalize_path("src\\App.tsx"), "src/App.tsx");
        assert_eq!(normalize_path("/src/App.tsx"), "src/App.tsx");
    }

    #[test]
    fn test_importers_of() {
        let manifest = sample();
        let importers: Vec<_> = manifest.importers_of("src/styles.css").collect();
        assert_eq!(importers, vec!["src/Header.tsx"]);
    }

    #[test]
    fn test_fingerprint_is_content_addressed() {
        let a = sample();
        let b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut files = BTreeMap::new();
        files.insert("src/styles.css".to_string(), record(".header { color: blue }", vec![]));
        let c = FileManifest::new(files);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_structural_summary_lists_edges() {
        let summary = sample().structural_summary();
        assert!(summary.contains("src/Header.tsx"));
        assert!(summary.contains("src/Header.tsx -> src/styles.css"));
    }

    #[test]
    fn test_is_config_path() {
        assert!(is_config_path("package.json"));
        assert!(is_config_path("apps/web/vite.config.ts"));
        assert!(is_config_path(".env"));
        assert!(!is_config_path("src/Header.tsx"));
        assert!(!is_config_path("src/config.rs"));
    }
}
