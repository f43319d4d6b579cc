//! Context selection.
//!
//! Trims a ranked file set into the bounded context handed to the completion
//! capability. Admission is greedy in rank order under an estimated token
//! budget, with a fixed fraction reserved for the structural summary so the
//! model always sees the project's overall shape.

use tracing::debug;

use crate::config::EngineConfig;
use crate::intent::EditIntent;
use crate::manifest::{is_config_path, FileManifest};
use crate::search::RankedFileSet;

/// Template/config files included when ranking is bypassed for
/// CREATE / FULL_REBUILD turns.
const TEMPLATE_FILES: &[&str] = &["package.json", "index.html", "tsconfig.json"];

/// One admitted file with its content at selection time.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

/// The bounded context sent to the completion capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBundle {
    pub files: Vec<ContextFile>,
    pub summary: String,
    /// Estimated token cost of the admitted files.
    pub file_tokens: usize,
    /// Estimated token cost of the (possibly truncated) summary.
    pub summary_tokens: usize,
}

impl ContextBundle {
    /// Total estimated token cost of the bundle.
    pub fn estimated_tokens(&self) -> usize {
        self.file_tokens + self.summary_tokens
    }

    /// Render the completion prompt for one edit turn.
    ///
    /// The output-format instructions here are the contract the apply
    /// engine's stream parser decodes; keep the two in sync.
    pub fn render_prompt(&self, request: &str, intent: &EditIntent) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You are editing an existing web project. Respond ONLY with file operations \
             using these markers, one per file:\n\
             <file path=\"relative/path\" action=\"create\">\n\
             ...complete file content...\n\
             </file>\n\
             <file path=\"relative/path\" action=\"replace\">\n\
             ...complete file content...\n\
             </file>\n\
             <delete path=\"relative/path\"/>\n\
             Always emit complete file contents, never fragments or diffs.\n\n",
        );

        prompt.push_str(&self.summary);
        prompt.push('\n');

        for file in &self.files {
            prompt.push_str(&format!("Current content of {}:\n", file.path));
            prompt.push_str(&file.content);
            if !file.content.ends_with('\n') {
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "Change kind: {}\nChange target: {}\nRequest: {}\n",
            intent.kind.as_str(),
            intent.target,
            request
        ));
        prompt
    }
}

/// Estimate the token cost of a text under the configured ratio.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    let chars_per_token = chars_per_token.max(1);
    text.len().div_ceil(chars_per_token)
}

/// Select the bounded context for one turn.
///
/// Pure function of its inputs: calling it twice with identical arguments
/// yields an identical bundle. The cumulative estimated cost never exceeds
/// `token_budget`.
pub fn select(
    ranked: &RankedFileSet,
    manifest: &FileManifest,
    intent: &EditIntent,
    token_budget: usize,
    config: &EngineConfig,
) -> ContextBundle {
    let summary_budget = config.summary_token_budget(token_budget);
    let file_budget = config.file_token_budget(token_budget);

    let summary = truncate_to_tokens(
        &manifest.structural_summary(),
        summary_budget,
        config.chars_per_token,
    );
    let summary_tokens = estimate_tokens(&summary, config.chars_per_token);

    let candidate_paths: Vec<&str> = if intent.kind.is_rebuild_like() {
        // No prior code is being edited; ranking is meaningless. Include
        // only the named template/config files that exist.
        manifest
            .paths()
            .filter(|p| TEMPLATE_FILES.contains(&p.as_str()) || is_config_path(p))
            .map(|p| p.as_str())
            .collect()
    } else {
        ranked.iter().map(|r| r.path.as_str()).collect()
    };

    let mut files = Vec::new();
    let mut file_tokens = 0usize;
    for path in candidate_paths {
        let record = match manifest.get(path) {
            Some(r) if !r.content_elided => r,
            _ => continue,
        };
        let cost = estimate_tokens(&record.content, config.chars_per_token);
        if file_tokens + cost > file_budget {
            // Greedy admission stops before the budget would be exceeded;
            // later (cheaper) files are not back-filled, keeping rank order
            // meaningful.
            break;
        }
        file_tokens += cost;
        files.push(ContextFile {
            path: path.to_string(),
            content: record.content.clone(),
        });
    }

    debug!(
        "Selected {} files ({} tokens) + summary ({} tokens) under budget {}",
        files.len(),
        file_tokens,
        summary_tokens,
        token_budget
    );

    ContextBundle {
        files,
        summary,
        file_tokens,
        summary_tokens,
    }
}

/// Truncate text so its estimated cost fits `token_budget`, cutting on a
/// line boundary where possible.
fn truncate_to_tokens(text: &str, token_budget: usize, chars_per_token: usize) -> String {
    let max_chars = token_budget.saturating_mul(chars_per_token.max(1));
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &text[..cut];
    match truncated.rfind('\n') {
        Some(idx) if idx > 0 => truncated[..idx].to_string(),
        _ => truncated.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{EditKind, SearchPlan};
    use crate::manifest::{build_manifest, SourceFile};
    use crate::search::{execute, RankedFile};

    fn source(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            content: Some(content.to_string()),
            size: content.len() as u64,
            mtime: 1,
        }
    }

    fn intent(kind: EditKind) -> EditIntent {
        EditIntent {
            kind,
            target: "the header".to_string(),
            confidence: 0.9,
            plan: SearchPlan::default(),
        }
    }

    fn ranked(paths: &[&str]) -> RankedFileSet {
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| RankedFile {
                path: p.to_string(),
                score: 10.0 - i as f32,
                matched_queries: vec![],
            })
            .collect()
    }

    #[test]
    fn test_budget_never_exceeded() {
        let manifest = build_manifest(vec![
            source("a.ts", &"x".repeat(400)),
            source("b.ts", &"y".repeat(400)),
            source("c.ts", &"z".repeat(400)),
        ]);
        let config = EngineConfig::default();
        let budget = 150; // summary reserve 23, file budget 127; each file 100 tokens

        let bundle = select(
            &ranked(&["a.ts", "b.ts", "c.ts"]),
            &manifest,
            &intent(EditKind::UpdateComponent),
            budget,
            &config,
        );

        assert!(bundle.estimated_tokens() <= budget);
        assert_eq!(bundle.files.len(), 1);
        assert_eq!(bundle.files[0].path, "a.ts");
    }

    #[test]
    fn test_idempotent() {
        let manifest = build_manifest(vec![
            source("a.ts", "alpha beta"),
            source("b.ts", "gamma delta"),
        ]);
        let config = EngineConfig::default();
        let ranked = ranked(&["a.ts", "b.ts"]);
        let intent = intent(EditKind::UpdateComponent);

        let first = select(&ranked, &manifest, &intent, 1000, &config);
        let second = select(&ranked, &manifest, &intent, 1000, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_rebuild_bypasses_ranking() {
        let manifest = build_manifest(vec![
            source("package.json", "{\"name\": \"app\"}"),
            source("src/Header.tsx", "export function Header() {}"),
            source("index.html", "<html></html>"),
        ]);
        let config = EngineConfig::default();

        let bundle = select(
            &ranked(&["src/Header.tsx"]),
            &manifest,
            &intent(EditKind::FullRebuild),
            10_000,
            &config,
        );

        let paths: Vec<&str> = bundle.files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"package.json"));
        assert!(paths.contains(&"index.html"));
        assert!(!paths.contains(&"src/Header.tsx"));
    }

    #[test]
    fn test_summary_always_present_under_tight_budget() {
        let manifest = build_manifest(vec![source("a.ts", &"x".repeat(4000))]);
        let config = EngineConfig::default();

        let bundle = select(
            &ranked(&["a.ts"]),
            &manifest,
            &intent(EditKind::UpdateComponent),
            40,
            &config,
        );

        assert!(!bundle.summary.is_empty());
        assert!(bundle.files.is_empty());
        assert!(bundle.estimated_tokens() <= 40);
    }

    #[test]
    fn test_elided_files_never_admitted() {
        let mut files = vec![source("a.ts", "alpha")];
        files.push(SourceFile {
            path: "logo.png".to_string(),
            content: None,
            size: 1 << 20,
            mtime: 1,
        });
        let manifest = build_manifest(files);
        let config = EngineConfig::default();

        let bundle = select(
            &ranked(&["logo.png", "a.ts"]),
            &manifest,
            &intent(EditKind::UpdateComponent),
            10_000,
            &config,
        );
        let paths: Vec<&str> = bundle.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.ts"]);
    }

    #[test]
    fn test_prompt_includes_format_and_request() {
        let manifest = build_manifest(vec![source("src/Header.tsx", "export {}")]);
        let config = EngineConfig::default();
        let plan = crate::intent::SearchPlan {
            queries: vec![crate::intent::SearchQuery::new(
                "Header",
                crate::intent::RoleHint::Any,
            )],
        };
        let ranked = execute(&plan, &manifest, &config);
        let intent = intent(EditKind::StyleChange);
        let bundle = select(&ranked, &manifest, &intent, 10_000, &config);
        let prompt = bundle.render_prompt("make the header blue", &intent);

        assert!(prompt.contains("<file path="));
        assert!(prompt.contains("Current content of src/Header.tsx"));
        assert!(prompt.contains("Request: make the header blue"));
        assert!(prompt.contains("STYLE_CHANGE"));
    }
}
