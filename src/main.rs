//! Pymakr Sync - mirror a project folder onto a MicroPython board
//!
//! Design goals:
//! - One session per run, always leaving the board in its REPL
//! - Deletes before creates, parents before children
//! - Plain output unless --verbose

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use pymakr_sync::cli::DeviceOpts;
use pymakr_sync::config::Settings;
use pymakr_sync::device::open_device;
use pymakr_sync::fs_enum::enumerate_listing;
use pymakr_sync::logger::{Logger, NoopLogger, TeeLogger, TextLogger};
use pymakr_sync::progress::SyncProgress;
use pymakr_sync::{Monitor, MonitorOptions, Reconciler};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Pymakr Sync - upload a project to a MicroPython/Pycom board over serial or telnet"
)]
struct Args {
    #[command(flatten)]
    device: DeviceOpts,

    /// Show individual file operations as they happen
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append session log lines to file
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror the project folder onto the board
    Sync {
        /// Show what would change without touching the board's files
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Print the manifest stored on the board
    Manifest,
    /// Print the board's hash of the last write to a file
    Hash {
        /// Path on the board
        name: String,
    },
    /// Reboot the board
    Reset,
}

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = Args::parse();
    let settings = Settings::load(&args.device)?;

    // Choose logger once
    let file_logger: Arc<dyn Logger> = if let Some(ref p) = args.log_file {
        match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("cannot open log file {}: {}", p.display(), e);
                Arc::new(NoopLogger)
            }
        }
    } else {
        Arc::new(NoopLogger)
    };

    if args.verbose {
        println!("Pymakr Sync {}", env!("CARGO_PKG_VERSION"));
        println!("Board: {}", settings.address);
        println!("Folder: {}", settings.sync_root.display());
        println!("Agent: {}", settings.agent.display());
    }

    match args.command {
        Command::Sync { dry_run } => run_sync(&settings, file_logger, dry_run, args.verbose),
        Command::Manifest => {
            let entries = with_session(&settings, file_logger, |m| m.read_remote_manifest())?;
            if entries.is_empty() {
                println!("(no manifest on board)");
            }
            for e in entries {
                println!("{} {:>2} {}", e.kind, e.depth, e.path);
            }
            Ok(())
        }
        Command::Hash { name } => {
            let hash = with_session(&settings, file_logger, |m| m.last_file_hash(&name))?;
            println!("{}", hex::encode(hash));
            Ok(())
        }
        Command::Reset => {
            let agent = read_agent(&settings)?;
            let mut device = open_device(&settings.address, &settings.username, &settings.password)
                .with_context(|| format!("Failed to connect to {}", settings.address))?;
            let opts = MonitorOptions {
                logger: file_logger,
                ..Default::default()
            };
            let mut monitor = Monitor::start(device.as_mut(), &agent, &settings.sync_root, opts)?;
            monitor.reset_board();
            println!("Board reset");
            Ok(())
        }
    }
}

fn read_agent(settings: &Settings) -> Result<Vec<u8>> {
    std::fs::read(&settings.agent)
        .with_context(|| format!("Failed to read monitor agent {}", settings.agent.display()))
}

/// Connect, start the monitor, run `f`, and always leave the monitor again
fn with_session<T, F>(settings: &Settings, logger: Arc<dyn Logger>, f: F) -> Result<T>
where
    F: FnOnce(&mut Monitor<'_>) -> Result<T>,
{
    let agent = read_agent(settings)?;
    let mut device = open_device(&settings.address, &settings.username, &settings.password)
        .with_context(|| format!("Failed to connect to {}", settings.address))?;
    logger.start(&settings.address.to_string(), &settings.sync_root);
    let opts = MonitorOptions {
        logger,
        ..Default::default()
    };
    Monitor::session(device.as_mut(), &agent, &settings.sync_root, opts, f)
}

fn run_sync(settings: &Settings, file_logger: Arc<dyn Logger>, dry_run: bool, verbose: bool) -> Result<()> {
    let listing = enumerate_listing(&settings.sync_root, &settings.filter())
        .context("Failed to enumerate project folder")?;
    if verbose {
        println!("Found {} local entries", listing.len());
    }

    if dry_run {
        println!("DRY RUN MODE - No files will be changed on the board");
        let remote = with_session(settings, file_logger, |m| m.read_remote_manifest())?;
        let reconciler = Reconciler::new(listing, remote);
        for path in reconciler.kind_conflicts() {
            println!("  conflict {} (kind changed)", path);
        }
        let plan = reconciler.plan();
        for op in &plan.ops {
            println!("  {}", op);
        }
        println!(
            "Total: {} operations ({} uploads)",
            plan.len(),
            plan.uploads()
        );
        return Ok(());
    }

    let progress = Arc::new(SyncProgress::new(verbose));
    let sinks: Vec<Arc<dyn Logger>> = vec![progress.clone(), file_logger];
    let logger: Arc<dyn Logger> = Arc::new(TeeLogger::new(sinks));
    progress.set_stage("Connecting");

    match with_session(settings, logger, |m| m.sync_pyboard(&listing)) {
        Ok(stats) => {
            progress.finish_success();
            if !stats.conflicts.is_empty() {
                eprintln!(
                    "warning: {} path(s) changed between file and folder: {}",
                    stats.conflicts.len(),
                    stats.conflicts.join(", ")
                );
            }
            Ok(())
        }
        Err(e) => {
            progress.finish_error(&format!("{:#}", e));
            eprintln!("The board may be out of sync with its manifest; run sync again.");
            Err(e)
        }
    }
}
