//! omc-team CLI - Main entry point

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// omc-team - run a team of AI coding workers in tmux panes
#[derive(Parser, Debug)]
#[command(name = "omc-team")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Project directory holding `.omc/` (default: current directory)
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a team and supervise it until every task is settled
    Start {
        /// Team name ([A-Za-z0-9_-], up to 50 chars)
        team: String,

        /// Task as "subject" or "subject: description" (repeatable)
        #[arg(short, long = "task")]
        tasks: Vec<String>,

        /// JSON file with an array of {"subject", "description"}
        #[arg(long)]
        tasks_file: Option<PathBuf>,

        /// Agent type per worker slot: claude, codex, gemini or a binary (repeatable)
        #[arg(short, long = "agent", default_value = "claude")]
        agents: Vec<String>,

        /// Maximum number of concurrent workers
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Leave the team running when supervision ends
        #[arg(long)]
        detach: bool,
    },
    /// Print the team status as JSON
    Status {
        team: String,
    },
    /// Assign a task to a running worker
    Assign {
        team: String,
        task_id: String,
        worker: String,
    },
    /// Tear the team down
    Shutdown {
        team: String,

        /// Ack polling budget in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Reason recorded in shutdown.json
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reattach to a team whose supervisor exited and keep supervising it
    Resume {
        team: String,

        /// Leave the team running when supervision ends
        #[arg(long)]
        detach: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cwd = match args.cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match args.command {
        Command::Start {
            team,
            tasks,
            tasks_file,
            agents,
            concurrency,
            detach,
        } => {
            let tasks = commands::collect_tasks(&tasks, tasks_file.as_deref())?;
            let spec = commands::team_spec(team, &agents, tasks, concurrency);
            commands::start(&cwd, spec, detach).await
        }
        Command::Status { team } => commands::status(&cwd, &team),
        Command::Assign {
            team,
            task_id,
            worker,
        } => commands::assign(&cwd, &team, &task_id, &worker).await,
        Command::Shutdown {
            team,
            timeout_ms,
            reason,
        } => commands::shutdown(&cwd, &team, timeout_ms, reason).await,
        Command::Resume { team, detach } => commands::resume(&cwd, &team, detach).await,
    }
}
