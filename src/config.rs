//! Engine configuration.
//!
//! All tuning values the edit pipeline depends on live here so that tests can
//! pin them explicitly and deployments can override them without code changes.
//! Relevance weights and decay factors are tuning values, not contracts.

use serde::Deserialize;
use std::time::Duration;

/// Default confidence below which intent classification falls back to a
/// conservative strategy.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Default per-position decay applied to search plan queries.
pub const DEFAULT_QUERY_DECAY: f32 = 0.8;

/// Default estimated characters per prompt token.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Default fraction of the token budget reserved for the structural summary.
pub const DEFAULT_SUMMARY_RESERVE: f32 = 0.15;

/// Runtime configuration for the edit engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Intent confidence threshold; below this the analyzer widens its plan.
    pub confidence_threshold: f32,

    /// Multiplier applied per query position when scoring search matches.
    pub query_decay: f32,

    /// Match-strength weight for an exact substring hit.
    pub exact_match_weight: f32,

    /// Match-strength weight for a case-insensitive hit.
    pub loose_match_weight: f32,

    /// Match-strength weight for an import-graph adjacency hit.
    pub adjacency_match_weight: f32,

    /// Estimated characters per token when costing files into the context.
    pub chars_per_token: usize,

    /// Fraction of the token budget reserved for the structural summary.
    pub summary_reserve: f32,

    /// Token budget handed to the context selector per turn.
    pub context_token_budget: usize,

    /// Max tokens requested from the completion capability per turn.
    pub max_completion_tokens: usize,

    /// Wall-clock limit for consuming one completion stream.
    #[serde(with = "duration_secs")]
    pub completion_timeout: Duration,

    /// Turns retained verbatim before old ones are compacted.
    pub max_history_turns: usize,

    /// Character cap on the conversation digest.
    pub max_summary_chars: usize,

    /// Command template for installing packages; package names are appended.
    pub install_command: String,

    /// Command issued when the restart policy fires.
    pub restart_command: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            query_decay: DEFAULT_QUERY_DECAY,
            exact_match_weight: 1.0,
            loose_match_weight: 0.6,
            adjacency_match_weight: 0.3,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            summary_reserve: DEFAULT_SUMMARY_RESERVE,
            context_token_budget: 24_000,
            max_completion_tokens: 16_000,
            completion_timeout: Duration::from_secs(300),
            max_history_turns: 40,
            max_summary_chars: 2_000,
            install_command: "npm install".to_string(),
            restart_command: "npm run dev:restart".to_string(),
        }
    }
}

impl EngineConfig {
    /// Token budget available for admitted files after the summary reserve.
    pub fn file_token_budget(&self, total_budget: usize) -> usize {
        let reserve = (total_budget as f32 * self.summary_reserve).ceil() as usize;
        total_budget.saturating_sub(reserve)
    }

    /// Token budget reserved for the structural summary.
    pub fn summary_token_budget(&self, total_budget: usize) -> usize {
        (total_budget as f32 * self.summary_reserve).ceil() as usize
    }
}

/// Completion endpoint settings, resolved env-first.
///
/// Priority:
/// 1. `CHISEL_API_URL` + `CHISEL_API_TOKEN` environment variables
/// 2. explicit values handed to `CompletionSettings::new`
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub base_url: String,
    pub api_token: Option<String>,
}

impl CompletionSettings {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token,
        }
    }

    /// Resolve settings from the environment, falling back to the defaults.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("CHISEL_API_URL").ok()?;
        if url.is_empty() {
            return None;
        }
        let token = std::env::var("CHISEL_API_TOKEN").ok().filter(|t| !t.is_empty());
        Some(Self {
            base_url: url,
            api_token: token,
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_split() {
        let config = EngineConfig::default();
        let total = 10_000;
        let summary = config.summary_token_budget(total);
        let files = config.file_token_budget(total);
        assert_eq!(summary, 1_500);
        assert_eq!(files, 8_500);
        assert!(summary + files <= total);
    }

    #[test]
    fn test_budget_split_never_underflows() {
        let config = EngineConfig::default();
        assert_eq!(config.file_token_budget(0), 0);
    }

    #[test]
    fn test_config_deserializes_partial() {
        let config: EngineConfig = serde_json::from_str(r#"{"query_decay": 0.5}"#).unwrap();
        assert_eq!(config.query_decay, 0.5);
        assert_eq!(config.chars_per_token, DEFAULT_CHARS_PER_TOKEN);
    }
}
