//! Conveyor Pipeline CLI
//!
//! # Usage
//!
//! ```bash
//! # Run the full greenfield pipeline
//! cargo run --bin conveyor -- run --mode greenfield --state-dir .conveyor
//!
//! # Resume a previous run
//! cargo run --bin conveyor -- resume --session pipeline-<uuid>
//!
//! # Re-execute from a specific stage onward
//! cargo run --bin conveyor -- start-from --stage generate-code
//!
//! # Inspect a persisted session
//! cargo run --bin conveyor -- monitor --session pipeline-<uuid>
//! ```

use clap::{Parser, Subcommand};
use conveyor_orchestration::{
    EchoInvoker, OrchestratorConfig, OrchestratorSession, PipelineMode, PipelineOrchestrator,
    SessionStatus,
};
use conveyor_store::FsStateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor - pipeline scheduling and work distribution", long_about = None)]
struct Cli {
    /// Directory holding persisted pipeline state
    #[arg(long, global = true, default_value = ".conveyor")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from scratch
    Run {
        /// Pipeline mode: greenfield, enhancement, or import
        #[arg(short, long, default_value = "greenfield")]
        mode: String,

        /// Retries per stage after the first attempt
        #[arg(long, default_value = "2")]
        max_retries: u32,
    },

    /// Resume a previous session, re-validating its artifacts
    Resume {
        /// Session id of the run to resume; its persisted mode is reused
        #[arg(short, long)]
        session: String,
    },

    /// Re-execute from a named stage onward
    StartFrom {
        /// Stage to begin execution at
        #[arg(long)]
        stage: String,

        /// Pipeline mode
        #[arg(short, long, default_value = "greenfield")]
        mode: String,
    },

    /// Show the persisted state of a session
    Monitor {
        /// Session id to inspect
        #[arg(short, long)]
        session: String,
    },

    /// List persisted sessions
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(FsStateStore::new(&cli.state_dir));

    match cli.command {
        Commands::Run { mode, max_retries } => {
            let mode = PipelineMode::from_str(&mode)?;
            let orchestrator = PipelineOrchestrator::new(mode, store, Arc::new(EchoInvoker::new()))
                .with_config(OrchestratorConfig {
                    max_retries,
                    ..Default::default()
                });
            let session = orchestrator.run().await?;
            report_outcome(&session);
        }
        Commands::Resume { session } => {
            let prior = OrchestratorSession::load(store.as_ref(), &session).await?;
            let orchestrator =
                PipelineOrchestrator::new(prior.mode, store, Arc::new(EchoInvoker::new()));
            let session = orchestrator.resume(&session).await?;
            report_outcome(&session);
        }
        Commands::StartFrom { stage, mode } => {
            let mode = PipelineMode::from_str(&mode)?;
            let orchestrator =
                PipelineOrchestrator::new(mode, store, Arc::new(EchoInvoker::new()));
            let session = orchestrator.start_from(&stage).await?;
            report_outcome(&session);
        }
        Commands::Monitor { session } => {
            let session = OrchestratorSession::load(store.as_ref(), &session).await?;
            print_session(&session);
        }
        Commands::List => {
            let ids = OrchestratorSession::list(store.as_ref()).await?;
            if ids.is_empty() {
                println!("no sessions in {:?}", cli.state_dir);
            }
            for id in ids {
                println!("{}", id);
            }
        }
    }

    Ok(())
}

fn report_outcome(session: &conveyor_orchestration::OrchestratorSession) {
    print_session(session);
    match session.status {
        SessionStatus::Completed => {}
        SessionStatus::Partial => {
            let (failed, skipped) = session.failure_report();
            eprintln!(
                "partial run: failed {:?}, skipped {:?} (rerun with `resume --session {}`)",
                failed, skipped, session.id
            );
        }
        _ => {
            eprintln!("pipeline failed; see stage errors above");
            std::process::exit(1);
        }
    }
}

fn print_session(session: &conveyor_orchestration::OrchestratorSession) {
    let stats = session.stats();
    println!("session {} [{}] mode={}", session.id, session.status, session.mode);
    if let Some(prior) = &session.resumed_from {
        println!("  resumed from {}", prior);
    }
    for result in &session.stage_results {
        let detail = match result.status {
            conveyor_orchestration::StageStatus::Completed => result
                .output
                .clone()
                .unwrap_or_default(),
            _ => result.error.clone().unwrap_or_default(),
        };
        let duration = result
            .duration_ms
            .map(|ms| format!(" ({}ms)", ms))
            .unwrap_or_default();
        println!("  {:<22} {:<9}{} {}", result.name, result.status.as_str(), duration, detail);
    }
    println!(
        "  {}/{} completed, {} failed, {} skipped",
        stats.completed, stats.total, stats.failed, stats.skipped
    );
}
