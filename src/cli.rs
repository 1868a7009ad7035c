use crate::config::types::{SandboxConfig, WORKER_ROLE};
use crate::core::supervisor::Supervisor;
use crate::judge::evaluator::{EvaluatorConfig, SnippetEvaluator};
use crate::judge::extract::extract_snippet;
use crate::judge::sequence::{compare_sequence, parse_expected};
use crate::observability::metrics::get_metrics;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Internal role selector (hidden; used by the supervisor's re-exec path)
    #[arg(long, hide = true)]
    internal_role: Option<String>,
    /// Append audit events as JSON lines to this file
    #[arg(long, global = true, value_name = "PATH")]
    audit_log: Option<PathBuf>,
    /// Write metrics in the Prometheus text format to this file on exit
    #[arg(long, global = true, value_name = "PATH")]
    metrics_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet in an isolated worker
    Exec {
        /// Wall-clock deadline in seconds
        #[arg(long)]
        deadline: Option<f64>,
        /// Read the snippet from a file
        #[arg(long, conflicts_with = "code")]
        file: Option<PathBuf>,
        /// Snippet source (stdin when neither this nor --file is given)
        code: Option<String>,
    },
    /// Locate the fenced code block in free-form text
    Extract {
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        text: Option<String>,
    },
    /// Compare the integers in some output with an expected sequence
    Compare {
        /// Expected integers, e.g. 0,1,1,2
        #[arg(long, allow_hyphen_values = true)]
        expected: String,
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        text: Option<String>,
    },
    /// Extract, execute and score free-form text against an expected sequence
    Evaluate {
        /// Expected integers, e.g. 0,1,1,2
        #[arg(long, allow_hyphen_values = true)]
        expected: String,
        /// Deadline of the first attempt in seconds
        #[arg(long)]
        deadline: Option<f64>,
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        text: Option<String>,
    },
}

/// Inline argument, then file, then stdin.
fn read_input(inline: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = inline {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("failed to read stdin")?;
    Ok(text)
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> i32 {
    if success {
        0
    } else {
        1
    }
}

fn load_config() -> SandboxConfig {
    SandboxConfig::from_env().unwrap_or_else(|e| {
        log::warn!("ignoring sandbox environment: {}", e);
        SandboxConfig::default()
    })
}

/// Parse arguments, run the selected command and return the process exit code.
pub fn run() -> Result<i32> {
    env_logger::init();

    let cli = Cli::parse();
    if let Some(role) = cli.internal_role.as_deref() {
        if role == WORKER_ROLE {
            return crate::core::worker::run_worker().map_err(Into::into);
        }
        return Err(anyhow::anyhow!("unsupported internal role: {}", role));
    }

    if let Some(path) = cli.audit_log.as_deref() {
        crate::observability::audit::init_audit_log(path)?;
    }

    let command = cli.command.ok_or_else(|| anyhow::anyhow!("missing command"))?;
    let code = dispatch(command)?;
    if let Some(path) = cli.metrics_file.as_deref() {
        std::fs::write(path, get_metrics().export_prometheus())
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }
    Ok(code)
}

fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Exec {
            deadline,
            file,
            code,
        } => {
            let snippet = read_input(code, file)?;
            let config = load_config();
            let deadline = deadline.unwrap_or_else(|| config.deadline.as_secs_f64());
            let outcome = Supervisor::new(config).execute(&snippet, deadline);
            emit_json(&outcome)?;
            Ok(exit_code(outcome.succeeded()))
        }
        Commands::Extract { file, text } => {
            let text = read_input(text, file)?;
            emit_json(&extract_snippet(&text))?;
            Ok(0)
        }
        Commands::Compare {
            expected,
            file,
            text,
        } => {
            let expected = parse_expected(&expected).map_err(|e| anyhow::anyhow!(e))?;
            let text = read_input(text, file)?;
            let result = compare_sequence(&text, &expected);
            emit_json(&result)?;
            Ok(exit_code(result.matched))
        }
        Commands::Evaluate {
            expected,
            deadline,
            file,
            text,
        } => {
            let expected = parse_expected(&expected).map_err(|e| anyhow::anyhow!(e))?;
            let text = read_input(text, file)?;
            let config = load_config();
            let evaluator_config = EvaluatorConfig {
                deadline_secs: deadline.unwrap_or_else(|| config.deadline.as_secs_f64()),
                ..EvaluatorConfig::default()
            };
            let evaluator = SnippetEvaluator::new(Supervisor::new(config), evaluator_config);
            let report = evaluator.evaluate(&text, &expected);
            emit_json(&report)?;
            Ok(exit_code(report.ok))
        }
    }
}
