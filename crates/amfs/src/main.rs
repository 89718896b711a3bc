//! Demo CLI exercising the amfs facade directly, in-process, without any
//! network filesystem framework in front of it (§4.6 "External collaborator
//! stub"). Real deployments wire [`amfs_core::Engine`] behind an actual
//! mount/RPC library instead of this binary.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use amfs_core::config::Config;
use amfs_core::Engine;

/// In-process demo client for an amfs data directory.
#[derive(Parser)]
#[command(name = "amfs", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults applied if absent, §6.5).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensure a folder (and its parents) exist.
    Mkdir {
        path: String,
        #[arg(long, default_value_t = 0o755)]
        mode: u32,
    },
    /// List a folder's entries.
    Ls { path: String },
    /// Print a file's content to stdout.
    Cat { path: String },
    /// Write text to a file, creating it if absent.
    Write { path: String, text: String },
    /// Print stat information for a path.
    Stat { path: String },
    /// Rename (move) a path.
    Mv { old: String, new: String },
    /// Unlink a path from its parent folder.
    Rm { path: String },
    /// Print the opaque, rename-stable handle for a path.
    Handle { path: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading config: {err}");
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .init();

    let engine = match Engine::open(&config) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("error opening engine: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Mkdir { path, mode } => commands::mkdir(&engine, &path, mode),
        Command::Ls { path } => commands::ls(&engine, &path),
        Command::Cat { path } => commands::cat(&engine, &path),
        Command::Write { path, text } => commands::write(&engine, &path, &text),
        Command::Stat { path } => commands::stat(&engine, &path),
        Command::Mv { old, new } => commands::mv(&engine, &old, &new),
        Command::Rm { path } => commands::rm(&engine, &path),
        Command::Handle { path } => commands::handle(&engine, &path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
