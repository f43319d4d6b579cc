//! Error kinds for the edit pipeline.
//!
//! Every failure mode a turn can hit is represented here so callers always
//! see a structured outcome. Most kinds are recovered locally (a skipped
//! operation, a degraded context); only sandbox loss aborts a turn outright.

use thiserror::Error;

/// Errors surfaced while running one edit turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The classifier produced unusable output twice in a row.
    #[error("intent analysis failed: {0}")]
    IntentAnalysis(String),

    /// The search plan matched nothing in the manifest.
    #[error("search plan produced no matching files")]
    SearchNoMatch,

    /// The completion stream ended inside an operation for `path`.
    #[error("operation stream truncated mid-content for {path}")]
    ParseTruncation { path: String },

    /// An operation targeted a path outside the project root.
    #[error("operation path escapes the project root: {path}")]
    PathSafety { path: String },

    /// The batched package install command failed.
    #[error("package install failed: {0}")]
    PackageInstall(String),

    /// The sandbox stopped responding; fatal for the turn.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// The completion stream exceeded the configured wall-clock limit.
    #[error("completion timed out after {seconds}s")]
    CompletionTimeout { seconds: u64 },

    /// The completion transport failed before any operation was parsed.
    #[error("completion transport failed: {0}")]
    Completion(String),
}

impl TurnError {
    /// Whether this error aborts the whole turn (as opposed to a single
    /// operation or phase).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TurnError::SandboxUnavailable(_)
                | TurnError::CompletionTimeout { .. }
                | TurnError::Completion(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(TurnError::SandboxUnavailable("gone".into()).is_fatal());
        assert!(TurnError::CompletionTimeout { seconds: 300 }.is_fatal());
        assert!(!TurnError::SearchNoMatch.is_fatal());
        assert!(!TurnError::PathSafety { path: "../x".into() }.is_fatal());
        assert!(!TurnError::PackageInstall("npm exited 1".into()).is_fatal());
    }
}
