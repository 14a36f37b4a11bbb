//! PipeKit CLI - line-oriented shell over the pipeline engine
//!
//! Usage:
//!   pipekit -c 'echo hello | wc -c'   # Execute a command string
//!   pipekit script.psh                # Execute a script file line by line
//!   pipekit                           # Read commands from stdin

use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use pipekit::{ExecuteResult, Session};

/// PipeKit - POSIX-style pipeline execution engine
#[derive(Parser, Debug)]
#[command(name = "pipekit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Execute the given command string
    #[arg(short = 'c')]
    command: Option<String>,

    /// Script file to execute line by line
    #[arg()]
    script: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    tracing::debug!("Parsed CLI arguments: {:?}", args);

    let mut session = Session::new();

    // Execute command string if provided
    if let Some(command) = args.command.as_deref() {
        let mut override_status = None;
        match session.run_str(command).await {
            Ok(_) => {}
            Err(err) => {
                eprintln!("pipekit: {err}");
                override_status = Some(2);
            }
        }
        std::process::exit(finish(session, override_status).await);
    }

    // Execute script file if provided
    if let Some(script_path) = args.script.as_deref() {
        let script = std::fs::read_to_string(script_path)
            .with_context(|| format!("failed to read script: {}", script_path.display()))?;

        let mut override_status = None;
        for (number, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match session.run_str(line).await {
                Ok(ExecuteResult::Continue(_)) => {}
                Ok(ExecuteResult::Exit(_)) => break,
                Err(err) => {
                    // A bad line invalidates the rest of the script
                    eprintln!("pipekit: line {}: {err}", number + 1);
                    override_status = Some(2);
                    break;
                }
            }
        }
        std::process::exit(finish(session, override_status).await);
    }

    // Line-at-a-time loop over stdin
    let stdin = std::io::stdin();
    let interactive = stdin.is_terminal();
    let mut lines = stdin.lock().lines();
    loop {
        if interactive {
            eprint!("pipekit$ ");
        }
        let Some(line) = lines.next() else { break };
        let line = line.context("failed to read input")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match session.run_str(line).await {
            Ok(ExecuteResult::Continue(_)) => {}
            Ok(ExecuteResult::Exit(_)) => break,
            // Interactive sessions survive bad lines
            Err(err) => eprintln!("pipekit: {err}"),
        }
    }
    std::process::exit(finish(session, None).await);
}

/// Close the session, running any EXIT trap, and pick the process's
/// final status.
async fn finish(session: Session, override_status: Option<i32>) -> i32 {
    let status = session.close().await;
    override_status.unwrap_or(status)
}
