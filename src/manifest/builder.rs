//! Manifest construction from a sandbox file listing.
//!
//! The builder turns raw listed files into a normalized snapshot and infers
//! the import graph from import/require statements in JS/TS-family sources.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

use super::{normalize_path, FileManifest, FileRecord};

/// One file as listed by a sandbox, before manifest normalization.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    /// None when the sandbox withheld content (binary or oversized).
    pub content: Option<String>,
    pub size: u64,
    pub mtime: u64,
}

/// Extensions tried when resolving an extensionless import specifier.
const RESOLVE_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "css", "json"];

fn import_regexes() -> &'static [Regex; 4] {
    static REGEXES: OnceLock<[Regex; 4]> = OnceLock::new();
    REGEXES.get_or_init(|| {
        [
            // import X from 'spec' / export { X } from 'spec'
            Regex::new(r#"(?m)^\s*(?:import|export)\s+[^'"\n;]*?from\s+['"]([^'"]+)['"]"#)
                .expect("import-from regex"),
            // side-effect import: import 'spec'
            Regex::new(r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#).expect("bare import regex"),
            // require('spec')
            Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).expect("require regex"),
            // CSS @import 'spec'
            Regex::new(r#"@import\s+(?:url\()?['"]([^'"]+)['"]"#).expect("css import regex"),
        ]
    })
}

/// Extract every import/require specifier from a file body, in source order.
///
/// Returns raw specifiers: relative ones (`./Header`) and bare package names
/// (`react`, `@radix-ui/themes`) alike. Callers decide which side they care
/// about — the manifest resolves relative ones, package detection takes the
/// bare ones.
pub fn extract_import_specifiers(content: &str) -> Vec<String> {
    let mut specs = Vec::new();
    for regex in import_regexes() {
        for capture in regex.captures_iter(content) {
            let spec = capture[1].to_string();
            if !specs.contains(&spec) {
                specs.push(spec);
            }
        }
    }
    specs
}

/// Whether a specifier refers to a project file rather than a package.
pub fn is_relative_specifier(spec: &str) -> bool {
    spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/')
}

/// Build a manifest snapshot from listed files.
///
/// Paths are normalized and deduplicated (first listing wins); import edges
/// are resolved against the final path set so the graph never points at a
/// path outside the snapshot.
pub fn build_manifest(files: Vec<SourceFile>) -> FileManifest {
    let mut records: BTreeMap<String, FileRecord> = BTreeMap::new();

    for file in files {
        let path = normalize_path(&file.path);
        if path.is_empty() || records.contains_key(&path) {
            continue;
        }
        let content_elided = file.content.is_none();
        records.insert(
            path,
            FileRecord {
                content: file.content.unwrap_or_default(),
                size: file.size,
                mtime: file.mtime,
                imports: Vec::new(),
                content_elided,
            },
        );
    }

    // Resolve import edges in a second pass, once all paths are known.
    let paths: Vec<String> = records.keys().cloned().collect();
    let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (path, record) in &records {
        if record.content_elided {
            continue;
        }
        let mut imports = Vec::new();
        for spec in extract_import_specifiers(&record.content) {
            if !is_relative_specifier(&spec) {
                continue;
            }
            if let Some(resolved) = resolve_relative(path, &spec, &paths) {
                if resolved != *path && !imports.contains(&resolved) {
                    imports.push(resolved);
                }
            }
        }
        if !imports.is_empty() {
            edges.insert(path.clone(), imports);
        }
    }
    for (path, imports) in edges {
        if let Some(record) = records.get_mut(&path) {
            record.imports = imports;
        }
    }

    debug!("Built manifest with {} files", records.len());
    FileManifest::new(records)
}

/// Resolve a relative specifier against the importer's directory.
///
/// Tries the literal path, then known extensions, then index files.
fn resolve_relative(importer: &str, spec: &str, paths: &[String]) -> Option<String> {
    let base_dir = match importer.rfind('/') {
        Some(idx) => &importer[..idx],
        None => "",
    };

    let joined = join_relative(base_dir, spec)?;

    if paths.iter().any(|p| *p == joined) {
        return Some(joined);
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{}.{}", joined, ext);
        if paths.iter().any(|p| *p == candidate) {
            return Some(candidate);
        }
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{}/index.{}", joined, ext);
        if paths.iter().any(|p| *p == candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Join a relative specifier onto a base directory, collapsing `.` and `..`.
/// Returns None if the specifier escapes the project root.
fn join_relative(base_dir: &str, spec: &str) -> Option<String> {
    let mut parts: Vec<&str> = if spec.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            content: Some(content.to_string()),
            size: content.len() as u64,
            mtime: 1,
        }
    }

    #[test]
    fn test_extract_specifiers() {
        let content = r#"
import React from 'react';
import { Button } from './components/Button';
import './styles.css';
export { helper } from '../lib/helper';
const fs = require('fs-extra');
"#;
        let specs = extract_import_specifiers(content);
        assert!(specs.contains(&"react".to_string()));
        assert!(specs.contains(&"./components/Button".to_string()));
        assert!(specs.contains(&"./styles.css".to_string()));
        assert!(specs.contains(&"../lib/helper".to_string()));
        assert!(specs.contains(&"fs-extra".to_string()));
    }

    #[test]
    fn test_css_import() {
        let specs = extract_import_specifiers("@import './base.css';\n@import url('./fonts.css');");
        assert_eq!(specs, vec!["./base.css".to_string(), "./fonts.css".to_string()]);
    }

    #[test]
    fn test_build_resolves_relative_imports() {
        let manifest = build_manifest(vec![
            source("src/App.tsx", "import Header from './Header';\nimport './app.css';"),
            source("src/Header.tsx", "export default function Header() {}"),
            source("src/app.css", "body {}"),
        ]);

        let app = manifest.get("src/App.tsx").unwrap();
        assert_eq!(app.imports, vec!["src/Header.tsx", "src/app.css"]);
    }

    #[test]
    fn test_build_resolves_index_files() {
        let manifest = build_manifest(vec![
            source("src/App.tsx", "import { api } from './api';"),
            source("src/api/index.ts", "export const api = {};"),
        ]);
        let app = manifest.get("src/App.tsx").unwrap();
        assert_eq!(app.imports, vec!["src/api/index.ts"]);
    }

    #[test]
    fn test_package_imports_not_edges() {
        let manifest = build_manifest(vec![source("src/App.tsx", "import React from 'react';")]);
        assert!(manifest.get("src/App.tsx").unwrap().imports.is_empty());
    }

    #[test]
    fn test_parent_escape_dropped() {
        let manifest = build_manifest(vec![source("App.tsx", "import x from '../../outside';")]);
        assert!(manifest.get("App.tsx").unwrap().imports.is_empty());
    }

    #[test]
    fn test_duplicate_paths_first_wins() {
        let manifest = build_manifest(vec![
            source("./src/a.ts", "first"),
            source("src/a.ts", "second"),
        ]);
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.get("src/a.ts").unwrap().content, "first");
    }

    #[test]
    fn test_elided_content() {
        let manifest = build_manifest(vec![SourceFile {
            path: "logo.png".to_string(),
            content: None,
            size: 4096,
            mtime: 1,
        }]);
        let record = manifest.get("logo.png").unwrap();
        assert!(record.content_elided);
        assert!(record.content.is_empty());
    }
}
