//! Package requirement detection.
//!
//! Scans newly written file content for import/require references that no
//! known dependency satisfies. Requirements are deduplicated across the
//! whole turn so installation happens as one batched command.

use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::manifest::{extract_import_specifiers, is_relative_specifier, FileManifest};

use super::parser::{CodeOperation, OpAction};

/// Node built-in modules that never need installation.
const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "crypto", "events", "fs", "http", "https", "net",
    "os", "path", "process", "stream", "url", "util", "zlib",
];

/// One inferred dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequirement {
    /// Package name as it would be installed (`react`, `@radix-ui/themes`).
    pub name: String,
    /// The import statement it was inferred from.
    pub source: String,
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    #[serde(default)]
    dependencies: std::collections::HashMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: std::collections::HashMap<String, String>,
}

/// Dependencies already satisfied, read from the turn's final package.json —
/// an operation rewriting package.json this turn wins over the manifest copy.
fn known_dependencies(operations: &[CodeOperation], manifest: &FileManifest) -> BTreeSet<String> {
    let package_json = operations
        .iter()
        .rev()
        .find(|op| op.path == "package.json" && op.action != OpAction::Delete)
        .map(|op| op.content.clone())
        .or_else(|| manifest.get("package.json").map(|r| r.content.clone()));

    let mut known = BTreeSet::new();
    if let Some(content) = package_json {
        match serde_json::from_str::<PackageJson>(&content) {
            Ok(parsed) => {
                known.extend(parsed.dependencies.into_keys());
                known.extend(parsed.dev_dependencies.into_keys());
            }
            Err(e) => debug!("Failed to parse package.json for dependency set: {}", e),
        }
    }
    known
}

/// Reduce an import specifier to its installable package name.
///
/// `@scope/pkg/sub` installs `@scope/pkg`; `pkg/sub` installs `pkg`.
fn package_name(specifier: &str) -> Option<String> {
    if specifier.starts_with("node:") {
        return None;
    }
    let mut segments = specifier.split('/');
    let first = segments.next()?;
    if first.is_empty() {
        return None;
    }
    let name = if first.starts_with('@') {
        let second = segments.next()?;
        format!("{}/{}", first, second)
    } else {
        first.to_string()
    };
    if NODE_BUILTINS.contains(&name.as_str()) {
        return None;
    }
    Some(name)
}

/// Detect unsatisfied package requirements across a turn's operations.
///
/// Deduplicated by package name; the first import statement seen is kept as
/// the provenance source.
pub fn detect_requirements(
    operations: &[CodeOperation],
    manifest: &FileManifest,
) -> Vec<PackageRequirement> {
    let known = known_dependencies(operations, manifest);
    let mut seen = BTreeSet::new();
    let mut requirements = Vec::new();

    for op in operations {
        if op.action == OpAction::Delete {
            continue;
        }
        for spec in extract_import_specifiers(&op.content) {
            if is_relative_specifier(&spec) {
                continue;
            }
            let name = match package_name(&spec) {
                Some(n) => n,
                None => continue,
            };
            if known.contains(&name) || !seen.insert(name.clone()) {
                continue;
            }
            let source = op
                .content
                .lines()
                .find(|line| line.contains(spec.as_str()))
                .unwrap_or(spec.as_str())
                .trim()
                .to_string();
            requirements.push(PackageRequirement { name, source });
        }
    }

    if !requirements.is_empty() {
        debug!(
            "Detected {} package requirement(s): {}",
            requirements.len(),
            requirements
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    requirements
}
