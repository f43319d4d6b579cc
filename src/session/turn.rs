//! Turn pipeline.
//!
//! One session owns one project and runs at most one turn at a time:
//! analyze -> search -> select -> stream completion -> apply -> record.
//! Submitting a new request aborts any in-flight turn; files the aborted
//! turn already committed stay as they are, and the new turn starts from a
//! fresh manifest snapshot.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::apply::{apply, FileOutcome, InstallOutcome};
use crate::completion::Completion;
use crate::config::EngineConfig;
use crate::context::select;
use crate::error::TurnError;
use crate::events::{TurnEvent, TurnSummary};
use crate::intent::analyze;
use crate::manifest::build_manifest;
use crate::sandbox::Sandbox;
use crate::search::execute;

use super::ConversationState;

/// One project-editing session.
///
/// Sessions are independent of each other; each holds its own sandbox,
/// conversation state, and at most one running turn.
pub struct Session {
    sandbox: Arc<dyn Sandbox>,
    completion: Arc<dyn Completion>,
    config: Arc<EngineConfig>,
    state: Arc<Mutex<ConversationState>>,
    state_path: Option<PathBuf>,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        completion: Arc<dyn Completion>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sandbox,
            completion,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(ConversationState::new())),
            state_path: None,
            active: Mutex::new(None),
        }
    }

    /// Resume from previously persisted state and keep persisting there.
    pub fn with_persistence(mut self, state: ConversationState, path: PathBuf) -> Self {
        self.state = Arc::new(Mutex::new(state));
        self.state_path = Some(path);
        self
    }

    /// Snapshot of the conversation state.
    pub fn state(&self) -> ConversationState {
        self.state.lock().unwrap().clone()
    }

    /// Submit a request, aborting any in-flight turn for this session.
    ///
    /// Returns the event stream for the new turn. The aborted turn's event
    /// channel closes without a terminal event.
    pub fn submit(&self, request: &str, model_id: &str) -> mpsc::UnboundedReceiver<TurnEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut active = self.active.lock().unwrap();
        if let Some(handle) = active.take() {
            if !handle.is_finished() {
                info!("Aborting in-flight turn; new request supersedes it");
            }
            handle.abort();
        }

        let turn = TurnTask {
            request: request.to_string(),
            model_id: model_id.to_string(),
            sandbox: Arc::clone(&self.sandbox),
            completion: Arc::clone(&self.completion),
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            state_path: self.state_path.clone(),
        };
        *active = Some(tokio::spawn(turn.run(tx)));

        rx
    }

    /// Wait for the current turn to finish (used by one-shot callers).
    pub async fn join(&self) {
        let handle = self.active.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

struct TurnTask {
    request: String,
    model_id: String,
    sandbox: Arc<dyn Sandbox>,
    completion: Arc<dyn Completion>,
    config: Arc<EngineConfig>,
    state: Arc<Mutex<ConversationState>>,
    state_path: Option<PathBuf>,
}

impl TurnTask {
    async fn run(self, events: mpsc::UnboundedSender<TurnEvent>) {
        // Fresh manifest snapshot; the turn never sees files mid-change.
        let listed = match self.sandbox.list_files().await {
            Ok(files) => files,
            Err(e) => {
                let error = TurnError::SandboxUnavailable(e.to_string());
                warn!("{}", error);
                let _ = events.send(TurnEvent::Failed {
                    error: error.to_string(),
                });
                return;
            }
        };
        let manifest = build_manifest(listed);
        debug!(
            "Turn starting against manifest {} ({} files)",
            &manifest.fingerprint()[..12],
            manifest.len()
        );

        let history = self.state.lock().unwrap().clone();

        let intent = match analyze(
            &self.request,
            &manifest,
            &history,
            self.completion.as_ref(),
            &self.model_id,
            &self.config,
        )
        .await
        {
            Ok(intent) => intent,
            Err(e) => {
                let error = TurnError::IntentAnalysis(e.to_string());
                warn!("{}", error);
                let _ = events.send(TurnEvent::Failed {
                    error: error.to_string(),
                });
                return;
            }
        };
        let _ = events.send(TurnEvent::IntentDetermined {
            kind: intent.kind,
            target: intent.target.clone(),
            confidence: intent.confidence,
        });

        let ranked = execute(&intent.plan, &manifest, &self.config);
        if ranked.is_empty() && !intent.kind.is_rebuild_like() {
            // Not fatal: the context degrades to the structural summary.
            warn!("{}", TurnError::SearchNoMatch);
        }

        let bundle = select(
            &ranked,
            &manifest,
            &intent,
            self.config.context_token_budget,
            &self.config,
        );
        let _ = events.send(TurnEvent::ContextBuilt {
            files: bundle.files.iter().map(|f| f.path.clone()).collect(),
            estimated_tokens: bundle.estimated_tokens(),
        });

        let prompt = bundle.render_prompt(&self.request, &intent);
        let stream = match self
            .completion
            .stream(&prompt, &self.model_id, self.config.max_completion_tokens)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                let error = TurnError::Completion(e.to_string());
                warn!("{}", error);
                let _ = events.send(TurnEvent::Failed {
                    error: error.to_string(),
                });
                return;
            }
        };

        let file_events = events.clone();
        let result = apply(
            stream,
            &manifest,
            self.sandbox.as_ref(),
            self.completion.as_ref(),
            &self.model_id,
            &self.config,
            move |file_result| {
                let _ = file_events.send(TurnEvent::FileApplied(file_result.clone()));
            },
        )
        .await;

        if !result.packages.is_empty() {
            let _ = events.send(TurnEvent::PackagesInstalled {
                packages: result.packages.iter().map(|p| p.name.clone()).collect(),
                outcome: result.install.clone(),
            });
        }

        // Record the turn whether it succeeded or not, then persist.
        {
            let mut state = self.state.lock().unwrap();
            state.record_turn(&self.request, &intent, &result);
            if let Some(path) = &self.state_path {
                if let Err(e) = state.save(path) {
                    warn!("Failed to persist session state: {}", e);
                }
            }
        }

        debug!("Apply finished in phase {:?}", result.reached);

        if result.succeeded() {
            let summary = TurnSummary {
                files_applied: count(&result, FileOutcome::Applied),
                files_skipped: count(&result, FileOutcome::Skipped),
                files_failed: count(&result, FileOutcome::Failed),
                files_incomplete: count(&result, FileOutcome::Incomplete),
                packages_installed: match result.install {
                    InstallOutcome::Installed => result.packages.len(),
                    _ => 0,
                },
                restarted: result.restarted,
                manifest_fingerprint: manifest.fingerprint(),
            };
            let _ = events.send(TurnEvent::Done(summary));
        } else {
            let message = match result.failure {
                Some(error) => {
                    if error.is_fatal() {
                        warn!("Turn failed: {}", error);
                    }
                    error.to_string()
                }
                None => "turn failed".to_string(),
            };
            let _ = events.send(TurnEvent::Failed { error: message });
        }
    }
}

fn count(result: &crate::apply::ApplyResult, outcome: FileOutcome) -> usize {
    result.files.iter().filter(|f| f.outcome == outcome).count()
}
