use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ovn_triage::analyzers::{register_builtin_analyzers, AnalyzerRegistry};
use ovn_triage::config::Config;
use ovn_triage::oracle::HttpOracle;
use ovn_triage::session::Session;
use ovn_triage::storage::{CheckpointStore, ReviewChoice, ReviewDecision, SqliteStore};
use ovn_triage::tools::{register_builtin_tools, ToolRegistry, ToolScheduler};
use ovn_triage::workflow::WorkflowEngine;

#[derive(Parser)]
#[command(name = "ovn-triage")]
#[command(about = "Checkpointed root-cause diagnosis for Kube-OVN overlay networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a diagnostic session from symptom to report.
    Diagnose {
        /// Session identifier; also names the report file.
        #[arg(long)]
        thread_id: String,

        /// Pick up an interrupted or failed session instead of starting fresh.
        #[arg(long)]
        resume: bool,

        /// Force a specific analyzer instead of evidence-based selection.
        #[arg(long)]
        analyzer: Option<String>,

        /// Propose fixes but never run them, regardless of configuration.
        #[arg(long)]
        no_execute: bool,

        /// Symptom description, e.g. "pod web-1 cannot reach service api".
        symptom: Vec<String>,
    },

    /// Record a reviewer decision for a session waiting at the approval gate.
    Review {
        /// Session the decision applies to.
        #[arg(long)]
        thread_id: String,

        /// "approved" or "rejected".
        #[arg(long)]
        decision: ReviewChoice,

        /// Optional note. A rejection note starting with "more-evidence:"
        /// sends the session back for another analysis pass.
        #[arg(long)]
        note: Option<String>,
    },

    /// Print the latest checkpoint of a session.
    Show {
        /// Session to inspect.
        #[arg(long)]
        thread_id: String,

        /// List every stored checkpoint instead of the latest snapshot.
        #[arg(long)]
        checkpoints: bool,
    },

    /// List known sessions.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    match cli.command {
        Command::Diagnose {
            thread_id,
            resume,
            analyzer,
            no_execute,
            symptom,
        } => run_diagnose(config, thread_id, resume, analyzer, no_execute, symptom).await,
        Command::Review {
            thread_id,
            decision,
            note,
        } => run_review(config, thread_id, decision, note).await,
        Command::Show {
            thread_id,
            checkpoints,
        } => run_show(config, thread_id, checkpoints).await,
        Command::List => run_list(config).await,
    }
}

async fn run_diagnose(
    mut config: Config,
    thread_id: String,
    resume: bool,
    analyzer: Option<String>,
    no_execute: bool,
    symptom: Vec<String>,
) -> anyhow::Result<()> {
    if no_execute {
        config.engine.execute_enabled = false;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        session_id = %thread_id,
        "Kube-OVN triage starting"
    );

    let store = open_store(&config).await?;

    // Initialize the oracle client
    let oracle = match HttpOracle::new(&config.oracle, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.oracle.base_url, "Decision oracle client ready");
            Arc::new(c)
        }
        Err(e) => {
            error!(error = %e, "Failed to build oracle client");
            return Err(e.into());
        }
    };

    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, &config.kube)?;
    let scheduler = ToolScheduler::new(
        Arc::new(tools),
        config.engine.tool_concurrency,
        config.engine.tool_timeout_ms,
    );

    let mut analyzers = AnalyzerRegistry::new();
    register_builtin_analyzers(&mut analyzers)?;

    let report_dir = config.report.dir.clone();
    let engine = WorkflowEngine::new(store, oracle, scheduler, analyzers, config);

    let mut handle = if resume {
        if !symptom.is_empty() {
            warn!("Symptom text is ignored on resume; the stored symptom is used");
        }
        if analyzer.is_some() {
            warn!("Analyzer override is ignored on resume; the stored override is used");
        }
        engine.resume(&thread_id).await?
    } else {
        engine.start(&thread_id, &symptom.join(" "), analyzer).await?
    };

    // Ctrl-C requests cooperative suspension; the current step finishes and
    // checkpoints before the run stops.
    let cancel = handle.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; suspending after the current step");
            cancel.request();
        }
    });

    let stage = engine.run_to_completion(&mut handle).await?;
    let session = &handle.session;

    if stage.is_terminal() {
        let status = session.overall_status();
        let report = report_dir.join(format!("{}.json", session.id));
        info!(session_id = %session.id, status = %status, "Session finished");
        println!("session {}: {}", session.id, status);
        if let Some(root_cause) = &session.root_cause {
            println!("root cause: {}", root_cause.cause);
        }
        println!("report: {}", report.display());
    } else {
        println!(
            "session {} suspended at {}; rerun with --resume to continue",
            session.id, stage
        );
    }

    Ok(())
}

async fn run_review(
    config: Config,
    thread_id: String,
    decision: ReviewChoice,
    note: Option<String>,
) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    if store.load_latest(&thread_id).await?.is_none() {
        anyhow::bail!("no session found with id {}", thread_id);
    }

    let decision = ReviewDecision::new(thread_id.clone(), decision, note);
    store.record_review(&decision).await?;

    info!(session_id = %thread_id, decision = %decision.decision, "Review recorded");
    println!("recorded {} for session {}", decision.decision, thread_id);
    Ok(())
}

async fn run_show(config: Config, thread_id: String, checkpoints: bool) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    if checkpoints {
        let metas = store.list_checkpoints(&thread_id).await?;
        if metas.is_empty() {
            anyhow::bail!("no session found with id {}", thread_id);
        }
        for meta in metas {
            println!("#{:<5} {:<13} {}", meta.seq, meta.stage.to_string(), meta.created_at);
        }
        return Ok(());
    }

    match store.load_latest(&thread_id).await? {
        Some(checkpoint) => {
            print_session(&checkpoint.session, checkpoint.seq);
            Ok(())
        }
        None => anyhow::bail!("no session found with id {}", thread_id),
    }
}

async fn run_list(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("no sessions recorded");
        return Ok(());
    }
    for summary in sessions {
        println!(
            "{:<24} {:<13} {:<24} {}  {}",
            summary.id, summary.stage.to_string(), summary.status, summary.updated_at, summary.symptom
        );
    }
    Ok(())
}

/// Open the checkpoint store configured by the environment.
async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    match SqliteStore::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Checkpoint store ready");
            Ok(Arc::new(s))
        }
        Err(e) => {
            error!(error = %e, "Failed to open checkpoint store");
            Err(e.into())
        }
    }
}

fn print_session(session: &Session, seq: i64) {
    println!("session:    {}", session.id);
    println!("stage:      {} (checkpoint #{})", session.stage, seq);
    let status = if session.stage.is_terminal() {
        session.overall_status().to_string()
    } else {
        "running".to_string()
    };
    println!("status:     {}", status);
    println!("symptom:    {}", session.symptom);
    if let Some(classification) = &session.classification {
        println!(
            "category:   {} (confidence {:.2})",
            classification.category, classification.confidence
        );
    }
    println!("round:      {}/{}", session.round, session.round_limit);
    let tags = session.evidence_tags();
    if !tags.is_empty() {
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        println!("evidence:   {}", tags.join(", "));
    }
    if let Some(root_cause) = &session.root_cause {
        println!(
            "root cause: {} (confidence {:.2}, analyzer {})",
            root_cause.cause, root_cause.confidence, root_cause.analyzer
        );
    }
    if let Some(fixes) = &session.fix_suggestions {
        let mutating = fixes.iter().filter(|f| f.mutating).count();
        println!("fixes:      {} steps ({} mutating)", fixes.len(), mutating);
    }
    println!("approval:   {}", session.approval);
    for entry in &session.errors {
        println!("error:      [{}] {} at {}", entry.code, entry.message, entry.stage);
    }
    println!("updated:    {}", session.updated_at);
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        ovn_triage::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        ovn_triage::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
