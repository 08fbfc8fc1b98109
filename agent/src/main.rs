//! Command-line front end of the task-execution agent.
//!
//! `agent run` plans and executes a goal, printing progress frames to
//! stdout; `agent plan` only prints the parsed plan.

use std::io;
use std::path::{Path, PathBuf};

use agent::cancel::CancelToken;
use agent::core::types::WorkflowState;
use agent::exit_codes;
use agent::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use agent::io::progress::WriterSink;
use agent::logging;
use agent::session::{SessionModels, plan_query, run_query};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Plan and execute a goal with shell, code and browser tools"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Planner model for this invocation (overrides config).
    #[arg(long, global = true)]
    planner_model: Option<String>,
    /// Model used inside the browser tool (overrides config).
    #[arg(long, global = true)]
    browser_model: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the plan for a goal without executing it.
    Plan { query: String },
    /// Plan and execute a goal.
    Run { query: String },
}

fn main() {
    logging::init("warn");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let models = SessionModels {
        planner_model: cli.planner_model,
        browser_model: cli.browser_model,
    };
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Plan { query } => cmd_plan(&cli.config, &models, &query),
        Command::Run { query } => cmd_run(&cli.config, &models, &query),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(path: &Path, models: &SessionModels, query: &str) -> Result<i32> {
    let query = non_empty_query(query)?;
    let config = load_config(path)?;
    let steps = plan_query(&config, models, query)?;
    let rendered = serde_json::to_string_pretty(&steps).context("serialize plan")?;
    println!("{rendered}");
    Ok(exit_codes::OK)
}

fn cmd_run(path: &Path, models: &SessionModels, query: &str) -> Result<i32> {
    let query = non_empty_query(query)?;
    let config = load_config(path)?;
    let sink = WriterSink::new(io::stdout());
    let run = run_query(&config, models, query, &sink, CancelToken::new())?;
    Ok(exit_code_for(run.state))
}

fn non_empty_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        bail!("empty query");
    }
    Ok(query)
}

fn exit_code_for(state: WorkflowState) -> i32 {
    match state {
        WorkflowState::Completed => exit_codes::OK,
        WorkflowState::LimitReached => exit_codes::LIMIT_REACHED,
        WorkflowState::Failed | WorkflowState::Planning | WorkflowState::Executing => {
            exit_codes::FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["agent", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["agent", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "agent",
            "run",
            "list files",
            "--config",
            "custom.toml",
            "--planner-model",
            "qwen3",
        ]);
        assert!(matches!(&cli.command, Command::Run { query } if query == "list files"));
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.planner_model.as_deref(), Some("qwen3"));
    }

    #[test]
    fn exit_codes_follow_terminal_state() {
        assert_eq!(exit_code_for(WorkflowState::Completed), exit_codes::OK);
        assert_eq!(exit_code_for(WorkflowState::Failed), exit_codes::FAILED);
        assert_eq!(
            exit_code_for(WorkflowState::LimitReached),
            exit_codes::LIMIT_REACHED
        );
    }

    #[test]
    fn blank_query_is_rejected() {
        assert!(non_empty_query("   ").is_err());
        assert_eq!(non_empty_query(" ls ").expect("query"), "ls");
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent.toml");
        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        assert!(cmd_init(&path, false).is_err());
        assert_eq!(cmd_init(&path, true).expect("force"), exit_codes::OK);
    }
}
