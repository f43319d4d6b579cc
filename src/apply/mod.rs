//! Code application engine.
//!
//! Consumes a streamed completion, parses it into file operations, and
//! commits them to the project through the sandbox capability. A turn moves
//! through explicit phases:
//!
//! Receiving -> Validating -> Committing -> PostProcess -> Done | Failed
//!
//! Writes are strictly sequential in parse order; package installation runs
//! once, after every write, so files overwritten later in the same turn
//! never trigger installs. Partial file content is never committed.

pub mod packages;
mod parser;

pub use packages::{detect_requirements, PackageRequirement};
pub use parser::{CodeOperation, OpAction, StreamParser, TruncatedOperation};

use tracing::{debug, warn};

use crate::completion::{ChunkStream, Completion};
use crate::config::EngineConfig;
use crate::error::TurnError;
use crate::manifest::{is_config_path, normalize_path, FileManifest};
use crate::sandbox::Sandbox;

use futures_util::StreamExt;

/// Engine phase, in order. `Failed` can be entered from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Receiving,
    Validating,
    Committing,
    PostProcess,
    Done,
    Failed,
}

/// Outcome for one file in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Applied,
    Skipped,
    Failed,
    Incomplete,
}

/// Per-file report entry.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: String,
    pub action: OpAction,
    pub outcome: FileOutcome,
    pub note: Option<String>,
}

impl FileResult {
    fn new(path: &str, action: OpAction, outcome: FileOutcome, note: Option<String>) -> Self {
        Self {
            path: path.to_string(),
            action,
            outcome,
            note,
        }
    }
}

/// Aggregate package-install outcome for the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    NotNeeded,
    Installed,
    Failed(String),
}

/// Result of applying one turn's operations.
#[derive(Debug)]
pub struct ApplyResult {
    pub files: Vec<FileResult>,
    pub packages: Vec<PackageRequirement>,
    pub install: InstallOutcome,
    pub restarted: bool,
    pub reached: ApplyPhase,
    pub failure: Option<TurnError>,
}

impl ApplyResult {
    fn failed(error: TurnError) -> Self {
        Self {
            files: Vec::new(),
            packages: Vec::new(),
            install: InstallOutcome::NotNeeded,
            restarted: false,
            reached: ApplyPhase::Failed,
            failure: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Paths whose outcome is Applied, in commit order.
    pub fn applied_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.outcome == FileOutcome::Applied)
            .map(|f| f.path.clone())
            .collect()
    }
}

/// Tail length of partial content included in a continuation prompt.
const CONTINUATION_TAIL_CHARS: usize = 600;

/// Apply one turn's streamed operations to the project.
///
/// `on_file` is invoked once per file as its outcome is determined, so
/// callers can surface progress while the turn is still running.
pub async fn apply<F>(
    stream: ChunkStream,
    manifest: &FileManifest,
    sandbox: &dyn Sandbox,
    completion: &dyn Completion,
    model_id: &str,
    config: &EngineConfig,
    mut on_file: F,
) -> ApplyResult
where
    F: FnMut(&FileResult) + Send,
{
    // -- Receiving ---------------------------------------------------------
    debug!("Apply phase: {:?}", ApplyPhase::Receiving);
    let received =
        tokio::time::timeout(config.completion_timeout, receive_operations(stream)).await;

    let (mut operations, truncated) = match received {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return ApplyResult::failed(TurnError::Completion(e.to_string())),
        Err(_) => {
            // Fully parsed operations are discarded along with the stream.
            return ApplyResult::failed(TurnError::CompletionTimeout {
                seconds: config.completion_timeout.as_secs(),
            });
        }
    };

    let mut results: Vec<FileResult> = Vec::new();

    if let Some(truncated) = truncated {
        warn!(
            "{}",
            TurnError::ParseTruncation {
                path: truncated.path.clone()
            }
        );
        match recover_truncated(&truncated, completion, model_id, config).await {
            Some(op) => {
                debug!("Continuation recovered complete content for {}", op.path);
                operations.push(op);
            }
            None => {
                let result = FileResult::new(
                    &truncated.path,
                    truncated.action,
                    FileOutcome::Incomplete,
                    Some("stream truncated; prior version left untouched".to_string()),
                );
                on_file(&result);
                results.push(result);
            }
        }
    }

    // -- Validating --------------------------------------------------------
    debug!("Apply phase: {:?}", ApplyPhase::Validating);
    let mut valid: Vec<CodeOperation> = Vec::new();
    for mut op in operations {
        match validate_path(&op.path) {
            Ok(normalized) => op.path = normalized,
            Err(e) => {
                warn!("{}", e);
                let result = FileResult::new(
                    &op.path,
                    op.action,
                    FileOutcome::Skipped,
                    Some(e.to_string()),
                );
                on_file(&result);
                results.push(result);
                continue;
            }
        }

        if op.action == OpAction::Delete && !manifest.contains(&op.path) {
            warn!("Delete targets a path not in the manifest: {}", op.path);
            let result = FileResult::new(
                &op.path,
                op.action,
                FileOutcome::Skipped,
                Some("path not present in manifest".to_string()),
            );
            on_file(&result);
            results.push(result);
            continue;
        }

        valid.push(op);
    }

    // Later operations on the same path win; superseded ones are never
    // committed, so package detection and installs see only final content.
    let final_ops = dedupe_last_wins(valid);

    // -- Committing --------------------------------------------------------
    debug!("Apply phase: {:?}", ApplyPhase::Committing);
    let mut committed: Vec<CodeOperation> = Vec::new();
    let mut fatal: Option<TurnError> = None;

    for (index, op) in final_ops.iter().enumerate() {
        let write = match op.action {
            OpAction::Delete => sandbox.delete_file(&op.path).await,
            OpAction::Create | OpAction::Replace => {
                sandbox.write_file(&op.path, &op.content).await
            }
        };

        match write {
            Ok(()) => {
                let result = FileResult::new(&op.path, op.action, FileOutcome::Applied, None);
                on_file(&result);
                results.push(result);
                committed.push(op.clone());
            }
            Err(e) => {
                // Once the sandbox fails a write, no further writes are
                // attempted this turn.
                let error = TurnError::SandboxUnavailable(e.to_string());
                warn!("{}", error);
                let result = FileResult::new(
                    &op.path,
                    op.action,
                    FileOutcome::Failed,
                    Some(e.to_string()),
                );
                on_file(&result);
                results.push(result);

                for remaining in &final_ops[index + 1..] {
                    let result = FileResult::new(
                        &remaining.path,
                        remaining.action,
                        FileOutcome::Failed,
                        Some("not attempted: sandbox unavailable".to_string()),
                    );
                    on_file(&result);
                    results.push(result);
                }
                fatal = Some(error);
                break;
            }
        }
    }

    if let Some(error) = fatal {
        return ApplyResult {
            files: results,
            packages: Vec::new(),
            install: InstallOutcome::NotNeeded,
            restarted: false,
            reached: ApplyPhase::Failed,
            failure: Some(error),
        };
    }

    // -- PostProcess -------------------------------------------------------
    debug!("Apply phase: {:?}", ApplyPhase::PostProcess);
    let packages = detect_requirements(&committed, manifest);

    let install = if packages.is_empty() {
        InstallOutcome::NotNeeded
    } else {
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        let command = format!("{} {}", config.install_command, names.join(" "));
        match sandbox.run_command(&command).await {
            Ok(output) if output.success() => InstallOutcome::Installed,
            Ok(output) => {
                let error = TurnError::PackageInstall(output.stderr.trim().to_string());
                warn!("{}", error);
                InstallOutcome::Failed(output.stderr.trim().to_string())
            }
            Err(e) => {
                let error = TurnError::PackageInstall(e.to_string());
                warn!("{}", error);
                InstallOutcome::Failed(e.to_string())
            }
        }
    };

    // Restart only when the environment actually changed under the dev
    // server's feet; plain component edits ride hot-reload.
    let config_touched = committed
        .iter()
        .any(|op| op.action != OpAction::Delete && is_config_path(&op.path));
    let should_restart = !packages.is_empty() || config_touched;

    let restarted = if should_restart {
        match sandbox.run_command(&config.restart_command).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!("Restart command failed: {}", output.stderr.trim());
                true
            }
            Err(e) => {
                warn!("Restart command failed: {}", e);
                false
            }
        }
    } else {
        false
    };

    debug!("Apply phase: {:?}", ApplyPhase::Done);
    ApplyResult {
        files: results,
        packages,
        install,
        restarted,
        reached: ApplyPhase::Done,
        failure: None,
    }
}

/// Drain the stream through the incremental parser.
async fn receive_operations(
    mut stream: ChunkStream,
) -> anyhow::Result<(Vec<CodeOperation>, Option<TruncatedOperation>)> {
    let mut parser = StreamParser::new();
    let mut operations = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        operations.extend(parser.push(&chunk));
    }

    let (tail, truncated) = parser.finish();
    operations.extend(tail);
    Ok((operations, truncated))
}

/// One continuation attempt scoped to a single truncated file.
///
/// The provider is asked to re-emit the complete file; a second failure
/// leaves the prior version untouched.
async fn recover_truncated(
    truncated: &TruncatedOperation,
    completion: &dyn Completion,
    model_id: &str,
    config: &EngineConfig,
) -> Option<CodeOperation> {
    let tail: String = truncated
        .partial_content
        .chars()
        .rev()
        .take(CONTINUATION_TAIL_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let prompt = format!(
        "The previous output was cut off while emitting {path}. Re-emit the COMPLETE \
         file as a single block:\n<file path=\"{path}\" action=\"{action}\">\n\
         ...entire file content...\n</file>\n\nThe output so far ended with:\n{tail}\n",
        path = truncated.path,
        action = truncated.action.as_str(),
        tail = tail,
    );

    let stream = match completion
        .stream(&prompt, model_id, config.max_completion_tokens)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!("Continuation call failed for {}: {}", truncated.path, e);
            return None;
        }
    };

    let received =
        tokio::time::timeout(config.completion_timeout, receive_operations(stream)).await;
    let (operations, still_truncated) = match received {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!("Continuation stream failed for {}: {}", truncated.path, e);
            return None;
        }
        Err(_) => {
            warn!("Continuation timed out for {}", truncated.path);
            return None;
        }
    };

    if still_truncated.is_some() {
        warn!("Continuation was itself truncated for {}", truncated.path);
        return None;
    }

    operations
        .into_iter()
        .find(|op| op.path == truncated.path && op.action != OpAction::Delete)
}

/// Validate an operation path and return its normalized form.
fn validate_path(path: &str) -> Result<String, TurnError> {
    let violation = || TurnError::PathSafety {
        path: path.to_string(),
    };

    if path.trim().is_empty() || path.starts_with('/') || path.contains('\\') && path.contains(':')
    {
        return Err(violation());
    }
    // Windows drive prefix (C:...) counts as absolute too.
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(violation());
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(violation());
    }

    let normalized = normalize_path(path);
    if normalized.is_empty() {
        return Err(violation());
    }
    Ok(normalized)
}

/// Keep only the last operation per path, preserving the order in which the
/// surviving operations were parsed.
fn dedupe_last_wins(operations: Vec<CodeOperation>) -> Vec<CodeOperation> {
    let mut result: Vec<CodeOperation> = Vec::new();
    for op in operations {
        if let Some(existing) = result.iter().position(|o| o.path == op.path) {
            debug!("Operation on {} superseded by a later one", op.path);
            result.remove(existing);
        }
        result.push(op);
    }
    result
}
