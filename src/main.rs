//! Runaway: a daemonless background task supervisor.
//!
//! Every invocation is a short-lived process: it reconstructs the state of
//! the world from the on-disk task registry plus a live process table probe,
//! performs one operation, and exits. No supervising daemon exists.

mod config;
mod error;
mod launch;
mod ops;
mod output;
mod probe;
mod store;
mod task;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::error::Error;
use crate::ops::{Controller, StopOutcome};
use crate::store::Store;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "runaway",
    version,
    about = "Daemonless background task supervisor",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// State directory (default: $RUNAWAY_STATE_DIR or ~/.runaway).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Launch a command as a detached background task.
    Run {
        /// Optional task name (letters and underscore only).
        #[arg(short, long)]
        name: Option<String>,
        /// Run in the foreground without registering a task.
        #[arg(short, long, conflicts_with = "name")]
        attach: bool,
        /// The command to execute.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Relaunch a stopped task with its stored command.
    Start {
        /// Task ID or name.
        reference: String,
    },
    /// List all tasks with their live status.
    Ls,
    /// Stop a running task (graceful, then forced).
    Stop {
        /// Task ID or name.
        reference: String,
    },
    /// Remove a stopped task and its logs.
    Rm {
        /// Task ID or name.
        reference: String,
    },
    /// Print a task's captured stdout and stderr.
    Logs {
        /// Task ID or name.
        reference: String,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            report(&err);
            let code = err
                .downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let state_dir = match cli.state_dir {
        Some(dir) => dir,
        None => config::state_dir()?,
    };
    let settings = config::load_settings(&state_dir)?;
    let store = Store::open(&state_dir)?;
    let controller = Controller::new(store, settings);

    match cli.command {
        Commands::Run {
            name,
            attach,
            command,
        } => {
            if attach {
                let cwd = std::env::current_dir().context("could not read working directory")?;
                let cmdline = shell_words::join(&command);
                return launch::run_attached(&cmdline, &cwd);
            }
            let record = controller.run(name.as_deref(), &command)?;
            println!(
                "started task {} (pid {})",
                record.id,
                record.pid.unwrap_or(0)
            );
        }
        Commands::Start { reference } => {
            let record = controller.start(&reference)?;
            println!(
                "started task {} (pid {})",
                record.id,
                record.pid.unwrap_or(0)
            );
        }
        Commands::Ls => {
            let rows = controller.ls()?;
            let table =
                output::render_table(&rows, output::terminal_width(), output::stdout_is_tty());
            print!("{table}");
        }
        Commands::Stop { reference } => match controller.stop(&reference)? {
            StopOutcome::AlreadyStopped => println!("task {reference} is not running"),
            StopOutcome::Stopped => println!("stopped task {reference}"),
            StopOutcome::ForceStopped => println!("force-killed task {reference}"),
        },
        Commands::Rm { reference } => {
            let record = controller.rm(&reference)?;
            println!("removed task {}", record.id);
        }
        Commands::Logs { reference } => {
            let record = controller.logs(&reference)?;
            print_log(&record.stdout_path, &mut std::io::stdout())?;
            print_log(&record.stderr_path, &mut std::io::stderr())?;
        }
    }
    Ok(0)
}

/// Copies one log file to the given stream. A missing file just means the
/// task never wrote to that stream.
fn print_log(path: &std::path::Path, out: &mut impl Write) -> Result<()> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read log {}", path.display()));
        }
    };
    std::io::copy(&mut file, out)
        .with_context(|| format!("failed to stream log {}", path.display()))?;
    Ok(())
}

fn report(err: &anyhow::Error) {
    if err.downcast_ref::<Error>().is_some() {
        eprintln!("{err}");
    } else {
        eprintln!("error: {err:#}");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RUNAWAY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}
