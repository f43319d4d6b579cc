//! Search plan execution.
//!
//! Runs a [`SearchPlan`] against a manifest snapshot and produces a ranked
//! file set. Matching is purely lexical plus import-graph adjacency; given
//! identical inputs the ordering is identical, which the rest of the
//! pipeline (and the tests) rely on.

use tracing::debug;

use crate::config::EngineConfig;
use crate::intent::{RoleHint, SearchPlan};
use crate::manifest::{is_config_path, FileManifest};

/// One ranked file with its score and the queries that matched it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFile {
    pub path: String,
    pub score: f32,
    pub matched_queries: Vec<String>,
}

/// Files ranked by descending relevance. Ties break by shorter path, then
/// lexical order. Zero-match files never appear.
pub type RankedFileSet = Vec<RankedFile>;

/// How strongly a file matched one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchStrength {
    None,
    Adjacency,
    Loose,
    Exact,
}

/// Execute a search plan against a manifest.
///
/// Per query, files are matched by exact substring (content or path), then
/// case-insensitive substring, then import-graph adjacency to a directly
/// matched file. A file's score sums, over all queries, the query's
/// positional weight times the strength weight of its best match method.
pub fn execute(plan: &SearchPlan, manifest: &FileManifest, config: &EngineConfig) -> RankedFileSet {
    let mut scores: Vec<(String, f32, Vec<String>)> = manifest
        .paths()
        .map(|p| (p.clone(), 0.0_f32, Vec::new()))
        .collect();

    for (index, query) in plan.queries.iter().enumerate() {
        let query_weight = config.query_decay.powi(index as i32);
        let direct = direct_matches(&query.term, query.role, manifest);

        for (path, score, matched) in scores.iter_mut() {
            let strength = match direct
                .iter()
                .find(|(p, _)| *p == *path)
                .map(|(_, s)| *s)
            {
                Some(s) => s,
                None if is_adjacent(path, &direct, manifest) => MatchStrength::Adjacency,
                None => MatchStrength::None,
            };

            let weight = match strength {
                MatchStrength::Exact => config.exact_match_weight,
                MatchStrength::Loose => config.loose_match_weight,
                MatchStrength::Adjacency => config.adjacency_match_weight,
                MatchStrength::None => continue,
            };

            *score += query_weight * weight;
            matched.push(query.term.clone());
        }
    }

    let mut ranked: RankedFileSet = scores
        .into_iter()
        .filter(|(_, score, _)| *score > 0.0)
        .map(|(path, score, matched_queries)| RankedFile {
            path,
            score,
            matched_queries,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.len().cmp(&b.path.len()))
            .then_with(|| a.path.cmp(&b.path))
    });

    debug!(
        "Search plan with {} queries matched {} of {} files",
        plan.queries.len(),
        ranked.len(),
        manifest.len()
    );
    ranked
}

/// Files directly matched by a query (exact or case-insensitive), with the
/// strength of the match.
fn direct_matches(
    term: &str,
    role: RoleHint,
    manifest: &FileManifest,
) -> Vec<(String, MatchStrength)> {
    let term_lower = term.to_lowercase();
    let mut matches = Vec::new();

    for (path, record) in manifest.iter() {
        let strength = if path.contains(term) || record.content.contains(term) {
            MatchStrength::Exact
        } else if path.to_lowercase().contains(&term_lower)
            || record.content.to_lowercase().contains(&term_lower)
        {
            MatchStrength::Loose
        } else if matches!(role, RoleHint::Entry | RoleHint::Config) && file_role(path) == role {
            // Structural queries ("main layout", "entry file") never appear
            // literally; the role hint is what locates them.
            MatchStrength::Adjacency
        } else {
            MatchStrength::None
        };

        if strength != MatchStrength::None {
            matches.push((path.clone(), strength));
        }
    }
    matches
}

/// Whether `path` sits one import edge away from any directly matched file.
///
/// Role-hint matches do not propagate adjacency; only substring matches do.
fn is_adjacent(
    path: &str,
    direct: &[(String, MatchStrength)],
    manifest: &FileManifest,
) -> bool {
    let directly_matched = |candidate: &str| {
        direct
            .iter()
            .any(|(p, s)| *s != MatchStrength::Adjacency && p.as_str() == candidate)
    };

    if let Some(record) = manifest.get(path) {
        if record.imports.iter().any(|i| directly_matched(i)) {
            return true;
        }
    }
    manifest
        .importers_of(path)
        .any(|importer| directly_matched(importer))
}

/// Coarse role classification of a manifest path.
fn file_role(path: &str) -> RoleHint {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");

    if is_config_path(path) {
        return RoleHint::Config;
    }
    if matches!(ext, "css" | "scss" | "less") {
        return RoleHint::Style;
    }
    if matches!(stem, "main" | "index" | "App" | "app") && matches!(ext, "tsx" | "ts" | "jsx" | "js")
    {
        return RoleHint::Entry;
    }
    if matches!(ext, "tsx" | "jsx" | "vue" | "svelte") {
        return RoleHint::Component;
    }
    RoleHint::Any
}
