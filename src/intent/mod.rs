//! Edit intent analysis.
//!
//! Classifies a free-text request into exactly one [`EditIntent`] and emits
//! the [`SearchPlan`] used to locate relevant code. Classification combines
//! lexical cues with delegated reasoning through the completion capability;
//! the delegated call is fallible and retried once with a simplified prompt
//! before degrading to the lexical result.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::completion::{collect_stream, Completion};
use crate::config::EngineConfig;
use crate::manifest::FileManifest;
use crate::session::ConversationState;

/// Kind of change a request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditKind {
    Create,
    UpdateComponent,
    AddFeature,
    FixBug,
    Refactor,
    StyleChange,
    FullRebuild,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Create => "CREATE",
            EditKind::UpdateComponent => "UPDATE_COMPONENT",
            EditKind::AddFeature => "ADD_FEATURE",
            EditKind::FixBug => "FIX_BUG",
            EditKind::Refactor => "REFACTOR",
            EditKind::StyleChange => "STYLE_CHANGE",
            EditKind::FullRebuild => "FULL_REBUILD",
        }
    }

    /// Kinds for which targeted file ranking is meaningless — nothing that
    /// exists is being edited.
    pub fn is_rebuild_like(&self) -> bool {
        matches!(self, EditKind::Create | EditKind::FullRebuild)
    }
}

/// Expected role of the file a query is hunting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleHint {
    Component,
    Style,
    Config,
    Entry,
    Any,
}

/// One query in a search plan. Order inside the plan is priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub term: String,
    pub role: RoleHint,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>, role: RoleHint) -> Self {
        Self {
            term: term.into(),
            role,
        }
    }
}

/// Ordered queries used to locate relevant code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPlan {
    pub queries: Vec<SearchQuery>,
}

/// Classification of one request. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditIntent {
    pub kind: EditKind,
    pub target: String,
    pub confidence: f32,
    pub plan: SearchPlan,
}

/// Minimum and maximum queries in a generated plan.
const MIN_PLAN_QUERIES: usize = 3;
const MAX_PLAN_QUERIES: usize = 8;

/// Generic structural queries appended when the plan must widen.
const STRUCTURAL_QUERIES: &[&str] = &["main layout", "entry file"];

/// Classify a request against the current project state.
///
/// Always returns exactly one intent. The completion call may fail or return
/// garbage; both paths degrade to the lexical classification rather than
/// surfacing an error to the caller.
pub async fn analyze(
    request: &str,
    manifest: &FileManifest,
    history: &ConversationState,
    completion: &dyn Completion,
    model_id: &str,
    config: &EngineConfig,
) -> Result<EditIntent> {
    let lexical = lexical_classify(request);
    debug!(
        "Lexical classification: {} (confidence {:.2})",
        lexical.0.as_str(),
        lexical.1
    );

    let verdict = classify_delegated(request, manifest, history, completion, model_id).await;

    let (kind, target, confidence) = match verdict {
        Some(v) => {
            let confidence = v.confidence.clamp(0.0, 1.0);
            let target = if v.target.trim().is_empty() {
                request.to_string()
            } else {
                v.target
            };
            (v.kind, target, confidence)
        }
        None => {
            warn!("Intent classification degraded to lexical cues");
            (lexical.0, request.to_string(), lexical.1)
        }
    };

    let mut kind = kind;
    let mut widen = false;

    // Low confidence forces a conservative strategy. Which one depends on
    // whether this session has ever applied a successful turn.
    if confidence < config.confidence_threshold {
        let has_prior_success = history.turns().iter().any(|t| t.succeeded);
        if has_prior_success {
            debug!(
                "Confidence {:.2} below threshold; defaulting to UPDATE_COMPONENT with widened plan",
                confidence
            );
            kind = EditKind::UpdateComponent;
            widen = true;
        } else {
            kind = if manifest.is_empty() {
                EditKind::Create
            } else {
                EditKind::FullRebuild
            };
            debug!(
                "Confidence {:.2} below threshold with no prior success; treating as {}",
                confidence,
                kind.as_str()
            );
        }
    }

    let plan = build_plan(request, &target, widen);

    Ok(EditIntent {
        kind,
        target,
        confidence,
        plan,
    })
}

// ---------------------------------------------------------------------------
// Delegated classification
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ClassifierVerdict {
    #[serde(rename = "type")]
    kind: EditKind,
    #[serde(default)]
    target: String,
    #[serde(default)]
    confidence: f32,
}

/// Ask the completion capability to classify the request.
///
/// Retried at most once with a simplified prompt when the output is
/// malformed; returns None when both attempts fail.
async fn classify_delegated(
    request: &str,
    manifest: &FileManifest,
    history: &ConversationState,
    completion: &dyn Completion,
    model_id: &str,
) -> Option<ClassifierVerdict> {
    let full_prompt = classifier_prompt(request, manifest, history, false);

    match classify_once(&full_prompt, completion, model_id).await {
        Some(verdict) => Some(verdict),
        None => {
            warn!("Classifier output malformed; retrying with simplified prompt");
            let simple_prompt = classifier_prompt(request, manifest, history, true);
            classify_once(&simple_prompt, completion, model_id).await
        }
    }
}

async fn classify_once(
    prompt: &str,
    completion: &dyn Completion,
    model_id: &str,
) -> Option<ClassifierVerdict> {
    let stream = match completion.stream(prompt, model_id, 512).await {
        Ok(s) => s,
        Err(e) => {
            warn!("Classifier call failed: {}", e);
            return None;
        }
    };
    let text = match collect_stream(stream).await {
        Ok(t) => t,
        Err(e) => {
            warn!("Classifier stream failed: {}", e);
            return None;
        }
    };
    parse_verdict(&text)
}

/// Pull the first JSON object out of the classifier response.
fn parse_verdict(text: &str) -> Option<ClassifierVerdict> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn classifier_prompt(
    request: &str,
    manifest: &FileManifest,
    history: &ConversationState,
    simplified: bool,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Classify this code-change request. Respond with a single JSON object:\n\
         {\"type\": one of CREATE | UPDATE_COMPONENT | ADD_FEATURE | FIX_BUG | REFACTOR | \
         STYLE_CHANGE | FULL_REBUILD, \"target\": short description of what changes, \
         \"confidence\": number 0..1}\n\n",
    );
    prompt.push_str("Request: ");
    prompt.push_str(request);
    prompt.push('\n');

    if simplified {
        return prompt;
    }

    let digest = history.summarize();
    if !digest.is_empty() {
        prompt.push_str("\nSession history:\n");
        prompt.push_str(&digest);
        prompt.push('\n');
    }

    if !manifest.is_empty() {
        prompt.push_str("\nProject files:\n");
        for path in manifest.paths().take(40) {
            prompt.push_str("  ");
            prompt.push_str(path);
            prompt.push('\n');
        }
    }
    prompt
}

// ---------------------------------------------------------------------------
// Lexical cues
// ---------------------------------------------------------------------------

const STYLE_CUES: &[&str] = &[
    "color", "colour", "style", "css", "font", "theme", "spacing", "padding", "margin",
    "dark mode", "blue", "red", "green", "white", "black", "background",
];
const FIX_CUES: &[&str] = &["fix", "bug", "broken", "crash", "error", "doesn't work", "not working"];
const REBUILD_CUES: &[&str] = &["rebuild", "start over", "from scratch", "redo the whole"];
const CREATE_CUES: &[&str] = &["create a", "build a", "new app", "scaffold", "generate a"];
const ADD_CUES: &[&str] = &["add", "implement", "support for", "introduce"];
const REFACTOR_CUES: &[&str] = &["refactor", "clean up", "reorganize", "extract", "rename", "simplify"];

fn contains_any(haystack: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| haystack.contains(cue))
}

/// Keyword-table classification. Returns the kind plus a coarse confidence:
/// strong single-category hits score higher than overlapping ones.
fn lexical_classify(request: &str) -> (EditKind, f32) {
    let lower = request.to_lowercase();

    let candidates = [
        (EditKind::FullRebuild, contains_any(&lower, REBUILD_CUES)),
        (EditKind::Create, contains_any(&lower, CREATE_CUES)),
        (EditKind::FixBug, contains_any(&lower, FIX_CUES)),
        (EditKind::StyleChange, contains_any(&lower, STYLE_CUES)),
        (EditKind::Refactor, contains_any(&lower, REFACTOR_CUES)),
        (EditKind::AddFeature, contains_any(&lower, ADD_CUES)),
    ];

    let hits: Vec<EditKind> = candidates
        .iter()
        .filter(|(_, hit)| *hit)
        .map(|(kind, _)| *kind)
        .collect();

    match hits.len() {
        0 => (EditKind::UpdateComponent, 0.4),
        1 => (hits[0], 0.75),
        _ => (hits[0], 0.55),
    }
}

// ---------------------------------------------------------------------------
// Search plan generation
// ---------------------------------------------------------------------------

/// Translate the target description into 3–8 ranked queries.
///
/// Quoted and capitalized tokens from the request are carried verbatim —
/// they are the strongest signal for component and identifier names.
fn build_plan(request: &str, target: &str, widen: bool) -> SearchPlan {
    let mut queries: Vec<SearchQuery> = Vec::new();

    for token in quoted_tokens(request) {
        push_query(&mut queries, SearchQuery::new(token, RoleHint::Component));
    }
    for token in capitalized_tokens(request) {
        push_query(&mut queries, SearchQuery::new(token, RoleHint::Component));
    }

    // Content words from the target description, longest first so specific
    // nouns outrank filler.
    let mut words: Vec<&str> = target
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4 && !is_stop_word(w))
        .collect();
    words.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    for word in words {
        let role = role_for_term(word);
        push_query(&mut queries, SearchQuery::new(word.to_lowercase(), role));
    }

    if queries.len() < MIN_PLAN_QUERIES {
        let whole = target.trim().to_lowercase();
        if !whole.is_empty() && whole.len() <= 64 {
            push_query(&mut queries, SearchQuery::new(whole, RoleHint::Any));
        }
    }
    if widen || queries.len() < MIN_PLAN_QUERIES {
        for term in STRUCTURAL_QUERIES {
            push_query(&mut queries, SearchQuery::new(*term, RoleHint::Entry));
        }
    }

    queries.truncate(MAX_PLAN_QUERIES);
    SearchPlan { queries }
}

fn push_query(queries: &mut Vec<SearchQuery>, query: SearchQuery) {
    if queries.len() >= MAX_PLAN_QUERIES {
        return;
    }
    if queries
        .iter()
        .any(|q| q.term.eq_ignore_ascii_case(&query.term))
    {
        return;
    }
    queries.push(query);
}

/// Tokens wrapped in single, double, or backtick quotes.
fn quoted_tokens(request: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for quote in ['"', '\'', '`'] {
        let mut parts = request.split(quote);
        // Every odd split segment sits between a quote pair.
        parts.next();
        while let (Some(inner), rest) = (parts.next(), parts.next()) {
            if rest.is_none() {
                break;
            }
            let inner = inner.trim();
            if !inner.is_empty() && inner.len() <= 64 {
                tokens.push(inner.to_string());
            }
        }
    }
    tokens
}

/// Capitalized or camelCase words — heuristic for component and identifier
/// names (`Header`, `NavBar`, `useCart`).
fn capitalized_tokens(request: &str) -> Vec<String> {
    request
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) if first.is_uppercase() => word.len() > 1,
                Some(_) => {
                    // camelCase: lowercase start with an interior uppercase
                    word.len() > 2 && chars.any(|c| c.is_uppercase())
                }
                None => false,
            }
        })
        .map(String::from)
        .collect()
}

fn role_for_term(term: &str) -> RoleHint {
    let lower = term.to_lowercase();
    if STYLE_CUES.contains(&lower.as_str()) {
        RoleHint::Style
    } else if lower.contains("config") || lower == "package" {
        RoleHint::Config
    } else if lower.contains("layout") || lower.contains("entry") || lower == "main" {
        RoleHint::Entry
    } else {
        RoleHint::Any
    }
}

fn is_stop_word(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "make" | "change" | "update" | "please" | "should" | "with" | "that" | "this"
            | "into" | "from" | "have" | "more" | "less" | "what" | "when" | "where"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedCompletion;
    use crate::session::ConversationState;

    fn empty_manifest() -> FileManifest {
        FileManifest::default()
    }

    #[test]
    fn test_lexical_style_change() {
        let (kind, confidence) = lexical_classify("make the header blue");
        assert_eq!(kind, EditKind::StyleChange);
        assert!(confidence >= 0.7);
    }

    #[test]
    fn test_lexical_fix() {
        let (kind, _) = lexical_classify("fix the crash on login");
        assert_eq!(kind, EditKind::FixBug);
    }

    #[test]
    fn test_lexical_default() {
        let (kind, confidence) = lexical_classify("the cart total");
        assert_eq!(kind, EditKind::UpdateComponent);
        assert!(confidence < 0.5);
    }

    #[test]
    fn test_quoted_tokens_verbatim() {
        let tokens = quoted_tokens("rename the 'SubmitButton' component");
        assert_eq!(tokens, vec!["SubmitButton"]);
    }

    #[test]
    fn test_capitalized_tokens() {
        let tokens = capitalized_tokens("make the Header use useCart");
        assert!(tokens.contains(&"Header".to_string()));
        assert!(tokens.contains(&"useCart".to_string()));
    }

    #[test]
    fn test_plan_size_bounds() {
        let plan = build_plan("x", "x", false);
        assert!(plan.queries.len() >= MIN_PLAN_QUERIES || !plan.queries.is_empty());
        let plan = build_plan(
            "change the Header Footer Sidebar NavBar Cart Checkout Login Signup Profile pages",
            "header footer sidebar navbar cart checkout login signup profile pages",
            true,
        );
        assert!(plan.queries.len() <= MAX_PLAN_QUERIES);
    }

    #[test]
    fn test_widened_plan_has_structural_queries() {
        let plan = build_plan("tweak it", "tweak it", true);
        assert!(plan.queries.iter().any(|q| q.term == "main layout"));
        assert!(plan.queries.iter().any(|q| q.term == "entry file"));
    }

    #[test]
    fn test_parse_verdict_with_prose() {
        let verdict = parse_verdict(
            "Sure, here is the classification:\n{\"type\": \"STYLE_CHANGE\", \"target\": \"header color\", \"confidence\": 0.9}\nDone.",
        )
        .unwrap();
        assert_eq!(verdict.kind, EditKind::StyleChange);
        assert_eq!(verdict.target, "header color");
    }

    #[tokio::test]
    async fn test_analyze_uses_classifier_verdict() {
        let completion = ScriptedCompletion::replying(
            r#"{"type": "STYLE_CHANGE", "target": "header color", "confidence": 0.9}"#,
        );
        let intent = analyze(
            "make the header blue",
            &empty_manifest(),
            &ConversationState::new(),
            &completion,
            "mock:classifier",
            &EngineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(intent.kind, EditKind::StyleChange);
        assert!((intent.confidence - 0.9).abs() < f32::EPSILON);
        assert!(intent.plan.queries.iter().any(|q| q.term == "header"));
    }

    #[tokio::test]
    async fn test_analyze_retries_then_degrades() {
        // Both attempts return garbage: the analyzer must fall back to the
        // lexical classification and still return exactly one intent.
        let completion = ScriptedCompletion::replying("not json at all");
        let intent = analyze(
            "fix the broken cart",
            &empty_manifest(),
            &ConversationState::new(),
            &completion,
            "mock:classifier",
            &EngineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(completion.calls(), 2);
        assert_eq!(intent.kind, EditKind::FixBug);
    }

    #[tokio::test]
    async fn test_low_confidence_with_prior_success_widens() {
        let completion = ScriptedCompletion::replying(
            r#"{"type": "REFACTOR", "target": "something", "confidence": 0.2}"#,
        );
        let mut history = ConversationState::new();
        history.push_turn(crate::session::Turn {
            request: "add a cart".to_string(),
            kind: EditKind::AddFeature,
            target: "cart".to_string(),
            files_touched: vec!["src/Cart.tsx".to_string()],
            succeeded: true,
            packages_installed: 0,
            completed_at: chrono::Utc::now(),
        });

        let intent = analyze(
            "hmm maybe adjust things",
            &empty_manifest(),
            &history,
            &completion,
            "mock:classifier",
            &EngineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(intent.kind, EditKind::UpdateComponent);
        assert!(intent.plan.queries.iter().any(|q| q.term == "entry file"));
    }

    #[tokio::test]
    async fn test_low_confidence_empty_session_rebuild_adjacent() {
        let completion = ScriptedCompletion::replying(
            r#"{"type": "REFACTOR", "target": "something", "confidence": 0.1}"#,
        );
        let intent = analyze(
            "do something",
            &empty_manifest(),
            &ConversationState::new(),
            &completion,
            "mock:classifier",
            &EngineConfig::default(),
        )
        .await
        .unwrap();

        // Empty manifest and no prior success: CREATE-adjacent.
        assert_eq!(intent.kind, EditKind::Create);
    }
}
