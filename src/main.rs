use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

mod apply;
mod completion;
mod config;
mod context;
mod error;
mod events;
mod intent;
mod manifest;
mod sandbox;
mod search;
mod session;

use apply::FileOutcome;
use completion::{resolve_provider, Completion, HttpCompletion, ProviderKind};
use config::{CompletionSettings, EngineConfig};
use events::TurnEvent;
use sandbox::{LocalSandbox, Sandbox};
use session::{ConversationState, Session};

/// Chisel - surgical edits for AI-generated codebases
#[derive(Parser)]
#[command(name = "chisel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root (defaults to the current directory)
    #[arg(short = 'w', long)]
    project_root: Option<String>,

    /// Select model to use
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Directory for chisel state files. Defaults to ~/.chisel
    #[arg(long)]
    cache_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply one natural-language edit to the project
    Edit {
        /// The change request, in plain language
        request: Vec<String>,
    },
    /// Show recorded turns for this project's session
    History,
    /// Show the project evolution digest
    Summary,
    /// Delete the persisted session record
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project_root = match &cli.project_root {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir().context("Could not determine current directory")?,
    };
    let cache_dir = cli.cache_dir.as_ref().map(PathBuf::from);
    let state_path = session::session_state_path(&project_root, cache_dir.as_deref())?;

    match cli.command {
        Commands::Edit { request } => {
            let request = request.join(" ");
            if request.trim().is_empty() {
                anyhow::bail!("Empty request. Usage: chisel edit <what to change>");
            }
            run_edit(&request, &project_root, state_path, cli.model).await
        }
        Commands::History => run_history(&state_path),
        Commands::Summary => run_summary(&state_path),
        Commands::Clear => run_clear(&state_path),
    }
}

async fn run_edit(
    request: &str,
    project_root: &std::path::Path,
    state_path: PathBuf,
    model: Option<String>,
) -> Result<()> {
    let model_id = model.unwrap_or_else(|| "default".to_string());

    let settings = CompletionSettings::from_env().context(
        "No completion endpoint configured. Set CHISEL_API_URL (and CHISEL_API_TOKEN if required).",
    )?;
    let completion: Arc<dyn Completion> = match resolve_provider(&model_id) {
        ProviderKind::Http => Arc::new(HttpCompletion::new(settings)),
        ProviderKind::Mock => {
            anyhow::bail!("mock: models are for tests only; pick a real model id")
        }
    };

    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::new(project_root));
    let state = ConversationState::load(&state_path)?;

    let session = Session::new(sandbox, completion, EngineConfig::default())
        .with_persistence(state, state_path);

    let mut events = session.submit(request, &model_id);
    let mut failed = false;

    while let Some(event) = events.recv().await {
        match event {
            TurnEvent::IntentDetermined {
                kind,
                target,
                confidence,
            } => {
                println!(
                    "🔍 Intent: {} — {} (confidence {:.2})",
                    kind.as_str(),
                    target,
                    confidence
                );
            }
            TurnEvent::ContextBuilt {
                files,
                estimated_tokens,
            } => {
                println!(
                    "📦 Context: {} file(s), ~{} tokens",
                    files.len(),
                    estimated_tokens
                );
            }
            TurnEvent::FileApplied(file) => match file.outcome {
                FileOutcome::Applied => println!("  ✅ {} ({})", file.path, file.action.as_str()),
                FileOutcome::Skipped => println!(
                    "  ⏭️  {} skipped{}",
                    file.path,
                    file.note.map(|n| format!(": {}", n)).unwrap_or_default()
                ),
                FileOutcome::Incomplete => println!(
                    "  ⚠️  {} incomplete — prior version kept",
                    file.path
                ),
                FileOutcome::Failed => println!(
                    "  ❌ {} failed{}",
                    file.path,
                    file.note.map(|n| format!(": {}", n)).unwrap_or_default()
                ),
            },
            TurnEvent::PackagesInstalled { packages, outcome } => match outcome {
                apply::InstallOutcome::Installed => {
                    println!("📦 Installed: {}", packages.join(", "))
                }
                apply::InstallOutcome::Failed(err) => {
                    println!("⚠️  Package install failed: {}", err)
                }
                apply::InstallOutcome::NotNeeded => {}
            },
            TurnEvent::Done(summary) => {
                println!(
                    "✅ Done: {} applied, {} skipped, {} failed, {} incomplete{}",
                    summary.files_applied,
                    summary.files_skipped,
                    summary.files_failed,
                    summary.files_incomplete,
                    if summary.restarted {
                        " (dev server restarted)"
                    } else {
                        ""
                    }
                );
            }
            TurnEvent::Failed { error } => {
                println!("❌ Turn failed: {}", error);
                failed = true;
            }
        }
    }
    session.join().await;
    debug!(
        "Session now holds {} recorded turn(s)",
        session.state().turns().len()
    );

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_history(state_path: &std::path::Path) -> Result<()> {
    let state = ConversationState::load(state_path)?;
    if state.turns().is_empty() && state.compacted().turns_compacted == 0 {
        println!("No recorded turns for this project.");
        return Ok(());
    }

    if state.compacted().turns_compacted > 0 {
        println!("({} earlier turn(s) compacted)", state.compacted().turns_compacted);
    }
    for turn in state.turns() {
        let marker = if turn.succeeded { "✅" } else { "❌" };
        println!(
            "{} [{}] {} — {}",
            marker,
            turn.completed_at.format("%Y-%m-%d %H:%M"),
            turn.kind.as_str(),
            turn.request
        );
        if !turn.files_touched.is_empty() {
            println!("     files: {}", turn.files_touched.join(", "));
        }
    }
    Ok(())
}

fn run_summary(state_path: &std::path::Path) -> Result<()> {
    let state = ConversationState::load(state_path)?;
    let summary = state.summarize();
    if summary.is_empty() {
        println!("No recorded turns for this project.");
    } else {
        println!("{}", summary);
    }
    Ok(())
}

fn run_clear(state_path: &std::path::Path) -> Result<()> {
    if state_path.exists() {
        std::fs::remove_file(state_path)
            .with_context(|| format!("Failed to remove {}", state_path.display()))?;
        println!("✅ Session record removed.");
    } else {
        println!("No session record to remove.");
    }
    Ok(())
}
