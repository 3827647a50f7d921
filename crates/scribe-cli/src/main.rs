//! scribe: autonomous long-form writing agent
//!
//! Drives an OpenAI-compatible chat model through project and file tools
//! until a novel, book or story collection is written to disk.

mod agent;
mod checkpoint;
mod context;
mod conversation;
mod error;
mod interrupt;
mod progress;
mod tools;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use scribe_core::{mask_key, ChatClient, Config};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::agent::{AgentConfig, AgentLoop, RunReport};
use crate::checkpoint::CheckpointStore;
use crate::error::{AgentError, EXIT_SUCCESS};
use crate::interrupt::InterruptFlag;
use crate::progress::StatusLine;

#[derive(Debug, Parser)]
#[command(name = "scribe")]
#[command(about = "Autonomous writing agent for novels, books and story collections", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start or resume a writing run
    Run {
        /// What to write (prompted for when omitted)
        prompt: Option<String>,

        /// Resume from a checkpoint or summary file
        #[arg(long, value_name = "PATH")]
        recover: Option<PathBuf>,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum iterations for this run
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Output directory for projects
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Config file (defaults to scribe.toml lookup)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// List saved checkpoints, newest first
    Checkpoints {
        /// Only this project
        #[arg(short, long)]
        project: Option<String>,

        /// Config file (defaults to scribe.toml lookup)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins when set
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "Loaded .env");
    }

    let code = match cli.command {
        Commands::Run {
            prompt,
            recover,
            model,
            max_iterations,
            output,
            config,
        } => {
            let mut cfg = load_config(config.as_ref())?;
            if let Some(model) = model {
                cfg.api.model = model;
            }
            if let Some(max) = max_iterations {
                cfg.agent.max_iterations = max;
            }
            if let Some(output) = output {
                cfg.output.root = output;
            }
            run(cfg, prompt, recover).await?
        }
        Commands::Checkpoints { project, config } => {
            let cfg = load_config(config.as_ref())?;
            list_checkpoints(&cfg, project.as_deref())?;
            EXIT_SUCCESS
        }
    };

    if code != EXIT_SUCCESS {
        std::process::exit(code);
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

async fn run(config: Config, prompt: Option<String>, recover: Option<PathBuf>) -> Result<i32> {
    config.validate()?;
    let api_key = config.api_key()?;
    let status = StatusLine::new();

    let store = CheckpointStore::new(&config.output.root);
    let recovered = match recover {
        Some(ref path) => {
            if prompt.is_some() {
                status.warning("Ignoring the prompt argument while recovering");
            }
            let recovered = store
                .load(path)
                .with_context(|| format!("Failed to load recovery file {}", path.display()))?;
            Some(recovered)
        }
        None => None,
    };

    let prompt = match (&recovered, prompt) {
        (Some(_), _) => None,
        (None, Some(p)) if !p.trim().is_empty() => Some(p),
        (None, Some(_)) => bail!("Prompt is empty"),
        (None, None) => match read_prompt()? {
            Some(p) => Some(p),
            None => return Ok(EXIT_SUCCESS),
        },
    };

    let client = ChatClient::new(&config.api.base_url, &api_key, config.request_timeout())?
        .with_retry(config.retry_config());

    status.info(format!("Model: {} at {}", config.api.model, client.base_url()));
    status.info(format!("API key: {}", mask_key(&api_key)));
    status.info(format!("Output: {}", config.output.root.display()));
    info!(model = %config.api.model, base_url = %client.base_url(), "Starting run");

    let interrupt = InterruptFlag::new();
    let listener = interrupt.listen_for_ctrl_c();

    let mut agent = AgentLoop::new(client, AgentConfig::from_config(&config))
        .with_status(status)
        .with_interrupt(interrupt);

    let result = match (recovered, prompt) {
        (Some(recovered), _) => {
            let path = recover.unwrap_or_default();
            status.info(format!("Recovering from {}", path.display()));
            agent
                .run_recovered(recovered, config.agent.cumulative_iterations)
                .await
        }
        (None, Some(prompt)) => agent.run_prompt(&prompt).await,
        (None, None) => bail!("Nothing to run"),
    };
    listener.abort();

    Ok(match result {
        Ok(report) => {
            print_report(&status, &report, &config);
            EXIT_SUCCESS
        }
        Err(e) => exit_code_for(&e),
    })
}

fn exit_code_for(error: &AgentError) -> i32 {
    if let AgentError::Transport { source, .. } = error {
        debug!(error = ?source, "Transport failure detail");
    }
    error.exit_code()
}

/// Interactive prompt; `None` means the user chose to quit
fn read_prompt() -> Result<Option<String>> {
    let mut rl = DefaultEditor::new()?;
    println!("What would you like to write? (quit, exit or q to leave)");

    match rl.readline("> ") {
        Ok(line) => {
            let line = line.trim();
            if matches!(line, "quit" | "exit" | "q") {
                return Ok(None);
            }
            if line.is_empty() {
                bail!("Prompt is empty");
            }
            Ok(Some(line.to_string()))
        }
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn print_report(status: &StatusLine, report: &RunReport, config: &Config) {
    if let Some(ref text) = report.final_response {
        info!(chars = text.chars().count(), "Final response: {}", text);
    }
    status.success(format!(
        "Finished after {} iterations ({} in this run)",
        report.iterations, report.run_iterations
    ));
    status.info(format!("API usage: {}", report.api_usage.summary()));
    if report.compressions > 0 {
        status.info(format!("Context compressed {} times", report.compressions));
    }
    if let Some(ref project) = report.project {
        status.info(format!(
            "Project: {}",
            config.output.root.join(project).display()
        ));
    }
    if let Some(last) = report.checkpoints.last() {
        status.info(format!("Latest checkpoint: {}", last.display()));
    }
}

fn list_checkpoints(config: &Config, project: Option<&str>) -> Result<()> {
    let store = CheckpointStore::new(&config.output.root);
    let entries = store.list(project)?;

    if entries.is_empty() {
        println!("No checkpoints under {}", config.output.root.display());
        return Ok(());
    }

    println!("{:<24} {:<20} PATH", "CREATED", "PROJECT");
    for entry in entries {
        println!(
            "{:<24} {:<20} {}",
            entry.created_label(),
            entry.project.as_deref().unwrap_or("-"),
            entry.path.display()
        );
    }
    Ok(())
}
