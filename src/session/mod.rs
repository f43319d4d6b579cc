//! Conversation state.
//!
//! Per-session record of prior turns and project evolution. The state is
//! appended after every applied turn, trimmed oldest-first into a compacted
//! record when it exceeds the configured cap, and serializes to a JSON file
//! so a session survives process restarts.

mod turn;

pub use turn::Session;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::apply::{ApplyResult, InstallOutcome};
use crate::intent::{EditIntent, EditKind};

/// Namespace for deriving per-project session ids (UUIDv5 of the root path).
const SESSION_NAMESPACE: Uuid = Uuid::from_bytes([
    0x1f, 0x3c, 0x52, 0xee, 0x70, 0x21, 0x4a, 0x8d, 0x9b, 0x55, 0x27, 0x0e, 0xc1, 0x88, 0x42, 0x6a,
]);

/// Default cap on verbatim turns before compaction.
const DEFAULT_MAX_TURNS: usize = 40;

/// Default cap on the digest length.
const DEFAULT_MAX_SUMMARY_CHARS: usize = 2_000;

/// One completed request -> apply cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub request: String,
    pub kind: EditKind,
    pub target: String,
    pub files_touched: Vec<String>,
    pub succeeded: bool,
    pub packages_installed: usize,
    pub completed_at: DateTime<Utc>,
}

/// Counts preserved when old turns are compacted away.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactedHistory {
    pub turns_compacted: usize,
    pub file_touch_counts: BTreeMap<String, u32>,
    pub kind_counts: BTreeMap<String, u32>,
}

/// Ordered record of a session's turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
    #[serde(default)]
    compacted: CompactedHistory,
    #[serde(default = "default_max_turns")]
    max_turns: usize,
    #[serde(default = "default_max_summary_chars")]
    max_summary_chars: usize,
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_max_summary_chars() -> usize {
    DEFAULT_MAX_SUMMARY_CHARS
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            compacted: CompactedHistory::default(),
            max_turns: DEFAULT_MAX_TURNS,
            max_summary_chars: DEFAULT_MAX_SUMMARY_CHARS,
        }
    }

    pub fn with_limits(max_turns: usize, max_summary_chars: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            max_summary_chars,
            ..Self::new()
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn compacted(&self) -> &CompactedHistory {
        &self.compacted
    }

    /// Append a completed turn, trimming oldest-first past the cap.
    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
        while self.turns.len() > self.max_turns {
            let oldest = self.turns.remove(0);
            self.compact(oldest);
        }
    }

    /// Record the outcome of one applied turn (success or failure).
    pub fn record_turn(&mut self, request: &str, intent: &EditIntent, result: &ApplyResult) {
        let files_touched = result.applied_paths();
        let packages_installed = match result.install {
            InstallOutcome::Installed => result.packages.len(),
            _ => 0,
        };

        self.push_turn(Turn {
            request: request.to_string(),
            kind: intent.kind,
            target: intent.target.clone(),
            files_touched,
            succeeded: result.succeeded(),
            packages_installed,
            completed_at: Utc::now(),
        });
    }

    /// Fold a trimmed turn into the compacted record. Nothing is dropped
    /// silently: file-touch counts and edit-kind counts survive compaction.
    fn compact(&mut self, turn: Turn) {
        self.compacted.turns_compacted += 1;
        for path in turn.files_touched {
            *self.compacted.file_touch_counts.entry(path).or_insert(0) += 1;
        }
        *self
            .compacted
            .kind_counts
            .entry(turn.kind.as_str().to_string())
            .or_insert(0) += 1;
    }

    /// Bounded textual digest of the session's major changes.
    pub fn summarize(&self) -> String {
        if self.turns.is_empty() && self.compacted.turns_compacted == 0 {
            return String::new();
        }

        let mut lines = Vec::new();

        if self.compacted.turns_compacted > 0 {
            let mut touched: Vec<(&String, &u32)> = self.compacted.file_touch_counts.iter().collect();
            touched.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            let top: Vec<String> = touched
                .iter()
                .take(5)
                .map(|(path, count)| format!("{} ({}x)", path, count))
                .collect();
            lines.push(format!(
                "{} earlier turn(s) compacted; most-touched files: {}",
                self.compacted.turns_compacted,
                if top.is_empty() {
                    "none".to_string()
                } else {
                    top.join(", ")
                }
            ));
        }

        // Recurring edit kinds across compacted and live turns.
        let mut kind_counts = self.compacted.kind_counts.clone();
        for turn in &self.turns {
            *kind_counts.entry(turn.kind.as_str().to_string()).or_insert(0) += 1;
        }
        let mut kinds: Vec<(&String, &u32)> = kind_counts.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        if !kinds.is_empty() {
            let top: Vec<String> = kinds
                .iter()
                .take(3)
                .map(|(kind, count)| format!("{} ({}x)", kind, count))
                .collect();
            lines.push(format!("recurring edit kinds: {}", top.join(", ")));
        }

        for turn in &self.turns {
            let marker = if turn.succeeded { "ok" } else { "failed" };
            let files = if turn.files_touched.is_empty() {
                "no files".to_string()
            } else {
                turn.files_touched.join(", ")
            };
            lines.push(format!(
                "[{}] {}: {} ({})",
                marker,
                turn.kind.as_str(),
                turn.target,
                files
            ));
        }

        // Keep the digest bounded; newest entries are the most useful, so
        // drop from the front when over the cap.
        let mut digest = lines.join("\n");
        while digest.len() > self.max_summary_chars && lines.len() > 1 {
            lines.remove(0);
            digest = lines.join("\n");
        }
        if digest.len() > self.max_summary_chars {
            let mut cut = self.max_summary_chars;
            while cut > 0 && !digest.is_char_boundary(cut) {
                cut -= 1;
            }
            digest.truncate(cut);
        }
        digest
    }

    /// Persist the state as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize session state")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write session state to {}", path.display()))
    }

    /// Load persisted state; a missing file yields a fresh session.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session state from {}", path.display()))?;
        match serde_json::from_str(&content) {
            Ok(state) => {
                debug!("Loaded session state from {}", path.display());
                Ok(state)
            }
            Err(e) => {
                warn!("Session state at {} is invalid ({}); starting fresh", path.display(), e);
                Ok(Self::new())
            }
        }
    }
}

/// Deterministic session id for a project root.
pub fn session_id_for_root(root: &Path) -> String {
    let normalized = root.to_string_lossy().replace('\\', "/");
    Uuid::new_v5(&SESSION_NAMESPACE, normalized.as_bytes()).to_string()
}

/// Where a project's session state lives on disk
/// (`~/.chisel/sessions/<uuid>.json`, or under `cache_dir` when given).
pub fn session_state_path(root: &Path, cache_dir: Option<&Path>) -> Result<PathBuf> {
    let base = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .context("Could not determine home directory")?
            .join(".chisel"),
    };
    Ok(base
        .join("sessions")
        .join(format!("{}.json", session_id_for_root(root))))
}
