use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

mod cli;

use cli::commands::Commands;
use cli::{Cli, EXIT_NEGATIVE};
use runctl::domain::{ExecutionRecord, timefmt};
use runctl::{Config, Orchestrator, RunctlError};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runctl")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("runctl.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Cancel the token on Ctrl-C so running scripts are escalated and recorded.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            eprintln!("{}", "Interrupted, stopping script...".yellow());
            cancel.cancel();
        }
    });
}

async fn run_application(cli: &Cli, orchestrator: &Orchestrator, cancel: &CancellationToken) -> Result<i32> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Create { name, repo } => handle_create_command(orchestrator, repo, name).await,
        Commands::List { repo_id, all } => handle_list_command(orchestrator, repo_id.as_deref(), *all),
        Commands::Show { id } => handle_show_command(orchestrator, id),
        Commands::Verify { id } => handle_verify_command(orchestrator, id, cancel).await,
        Commands::Teardown { id } => handle_teardown_command(orchestrator, id, cancel).await,
        Commands::Gate { id } => handle_gate_command(orchestrator, id),
        Commands::Ack { id } => handle_ack_command(orchestrator, id),
    }
}

fn print_diagnostics(diagnostics: &[String]) {
    for d in diagnostics {
        eprintln!("  {} {}", "warning:".yellow(), d);
    }
}

fn print_record(label: &str, record: &ExecutionRecord) {
    let verdict = if record.ok { "ok".green() } else { "failed".red() };
    println!("  {:<9} {} - {}", label, verdict, record.summary);
    println!("            finished {} in {}ms", timefmt::format(&record.finished_at), record.duration_ms);
    println!("            log: {}", record.log_path.display());
    if let Some(error) = &record.error {
        println!("            error: {}", error);
    }
}

async fn handle_create_command(orchestrator: &Orchestrator, repo: &Path, name: &str) -> Result<i32> {
    info!("Creating run {} in {}", name, repo.display());
    let created = orchestrator.create(repo, name).await?;
    let meta = &created.meta;
    println!("{} {} ({})", "Created:".green(), meta.name, meta.run_id);
    println!("  branch:    {}", meta.branch);
    println!("  workspace: {}", meta.workspace_path.display());
    println!("  session:   {}", meta.session_name);
    print_diagnostics(&created.diagnostics);
    Ok(0)
}

fn handle_list_command(orchestrator: &Orchestrator, repo_id: Option<&str>, all: bool) -> Result<i32> {
    info!("Listing runs - repo: {:?}, all: {}", repo_id, all);
    let runs = orchestrator.list(repo_id, all)?;
    if runs.is_empty() {
        println!("{}", "No runs".dimmed());
        return Ok(0);
    }
    for run in runs {
        let state = if run.broken {
            "broken".red()
        } else if run.archived {
            "archived".dimmed()
        } else {
            "active".green()
        };
        let created = run.created_at.as_ref().map(timefmt::format).unwrap_or_default();
        println!(
            "{:<12} {:<24} {:<9} {:<12} {}",
            run.run_id, run.name, state, run.repo_id, created
        );
    }
    Ok(0)
}

fn handle_show_command(orchestrator: &Orchestrator, id: &str) -> Result<i32> {
    info!("Showing run {}", id);
    let details = orchestrator.show(id)?;
    let meta = &details.meta;
    println!("{} {} ({})", "Run:".green(), meta.name, meta.run_id);
    println!("  repo:      {} ({})", meta.repo_root.display(), meta.repo_id);
    println!("  branch:    {} (from {})", meta.branch, meta.base_branch);
    println!("  workspace: {}", meta.workspace_path.display());
    println!("  session:   {}", meta.session_name);
    println!("  created:   {}", timefmt::format(&meta.created_at));
    if let Some(archived) = &meta.archived_at {
        println!("  archived:  {}", timefmt::format(archived));
    }
    if meta.flags.needs_attention {
        println!("  {} {}", "attention:".red(), meta.flags.needs_attention_reason);
    }
    if let Some(record) = &details.verify {
        print_record("verify", record);
    }
    if let Some(record) = &details.teardown {
        print_record("teardown", record);
    }
    if !details.events.is_empty() {
        println!("  events:");
        for event in &details.events {
            println!("    {} {}", timefmt::format(&event.timestamp), event.event);
        }
    }
    print_diagnostics(&details.diagnostics);
    Ok(0)
}

async fn handle_verify_command(orchestrator: &Orchestrator, id: &str, cancel: &CancellationToken) -> Result<i32> {
    info!("Verifying run {}", id);
    let verified = orchestrator.verify(id, cancel).await?;
    let record = &verified.record;
    if record.ok {
        println!("{} {}", "Verified:".green(), record.summary);
    } else {
        println!("{} {}", "Verify failed:".red(), record.summary);
    }
    println!("  log: {}", record.log_path.display());
    print_diagnostics(&verified.diagnostics);
    Ok(if record.ok { 0 } else { EXIT_NEGATIVE })
}

async fn handle_teardown_command(orchestrator: &Orchestrator, id: &str, cancel: &CancellationToken) -> Result<i32> {
    info!("Tearing down run {}", id);
    let torn = orchestrator.teardown(id, cancel).await?;
    let result = &torn.result;
    let step = |name: &str, ok: bool, reason: &str| {
        let mark = if ok { "ok".green() } else { "failed".red() };
        println!("  {:<8} {} - {}", name, mark, reason);
    };
    step("script", result.script.ok, &result.script.reason);
    step("session", result.session.ok, &result.session.reason);
    step("delete", result.delete.ok, &result.delete.reason);
    print_diagnostics(&torn.diagnostics);

    if result.success() {
        println!("{} {} archived", "Torn down:".green(), torn.meta.run_id);
        Ok(0)
    } else {
        println!(
            "{} {}",
            "Teardown incomplete:".red(),
            torn.meta.flags.needs_attention_reason
        );
        Ok(EXIT_NEGATIVE)
    }
}

fn handle_gate_command(orchestrator: &Orchestrator, id: &str) -> Result<i32> {
    info!("Checking promotion gate for {}", id);
    let decision = orchestrator.promotion_gate(id)?;
    if decision.allowed {
        println!("{} {}", "Promotion allowed:".green(), decision.reason);
        Ok(0)
    } else {
        println!("{} {}", "Promotion blocked:".red(), decision.reason);
        Ok(EXIT_NEGATIVE)
    }
}

fn handle_ack_command(orchestrator: &Orchestrator, id: &str) -> Result<i32> {
    info!("Clearing attention for {}", id);
    let (meta, diagnostics) = orchestrator.clear_attention(id)?;
    println!("{} {} ({})", "Acknowledged:".green(), meta.name, meta.run_id);
    print_diagnostics(&diagnostics);
    Ok(0)
}

/// Print a failure and map it to the process exit code.
fn report_failure(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<RunctlError>() {
        Some(e) => {
            eprintln!("{}: {}", format!("error[{}]", e.code()).red(), e);
            cli::exit_code(e)
        }
        None => {
            eprintln!("{}: {:#}", "error".red(), err);
            cli::exit_code(&RunctlError::Config(err.to_string()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging first
    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = match Config::load(cli.config.as_ref()).context("Failed to load configuration") {
        Ok(config) => config,
        Err(e) => std::process::exit(report_failure(&e)),
    };

    info!("Starting with config from: {:?}", cli.config);

    let orchestrator = Orchestrator::from_config(config);
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    // Run the main application logic
    let code = match run_application(&cli, &orchestrator, &cancel).await {
        Ok(code) => code,
        Err(e) => report_failure(&e),
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
