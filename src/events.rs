//! Turn event stream.
//!
//! The session entry point reports progress as an ordered sequence of these
//! events: intent, context, one event per applied file, package outcome,
//! then a terminal Done or Failed.

use crate::apply::{FileResult, InstallOutcome};
use crate::intent::EditKind;

/// Final accounting for a completed turn.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub files_applied: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_incomplete: usize,
    pub packages_installed: usize,
    pub restarted: bool,
    /// Fingerprint of the manifest the turn started from.
    pub manifest_fingerprint: String,
}

/// One progress event emitted while a turn runs.
#[derive(Debug)]
pub enum TurnEvent {
    IntentDetermined {
        kind: EditKind,
        target: String,
        confidence: f32,
    },
    ContextBuilt {
        files: Vec<String>,
        estimated_tokens: usize,
    },
    FileApplied(FileResult),
    PackagesInstalled {
        packages: Vec<String>,
        outcome: InstallOutcome,
    },
    Done(TurnSummary),
    Failed {
        error: String,
    },
}
