//! # vdrive CLI
//!
//! Command-line interface for a vdrive: add, read, list and remove files,
//! manage write grants and mount the drive as a filesystem.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, Subcommand};
use vdrive_cas::CasStore;
use vdrive_config::{init_logging, log_cli_debug, log_cli_info, Config, LogLevel};
use vdrive_core::{
    human_size, Context, Drive, File, OpenOptions, LIST_MASK_ALL, WRITE_PERMISSION,
};

mod mount;

/// vdrive - a durable key → file store over content-addressed blobs
#[derive(Parser, Debug)]
#[command(name = "vdrive")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Drive name or full `/vdrive/<hash>/<name>` address
    #[arg(short, long, global = true)]
    drive: Option<String>,

    /// Content store root directory
    #[arg(long = "content-root", global = true)]
    content_root: Option<PathBuf>,

    /// Index directory
    #[arg(long = "index-dir", global = true)]
    index_dir: Option<PathBuf>,

    /// Fail instead of creating a drive that does not exist yet
    #[arg(long = "no-create", global = true)]
    no_create: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Drive(DriveCommand),

    /// Mount the drive as a filesystem
    Mount(mount::MountArgs),

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Commands that run against an open drive.
#[derive(Subcommand, Debug)]
enum DriveCommand {
    /// Add a file under KEY (use `-` to read from stdin)
    Add {
        key: String,
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Write a file's content to stdout
    Cat { key: String },

    /// Show a file's metadata
    Stat { key: String },

    /// List files whose key contains PREFIX
    Ls {
        prefix: Option<String>,

        /// Columns to show: 1 key, 2 cid, 4 size, 8 time, 16 owner
        #[arg(short, long, default_value_t = LIST_MASK_ALL)]
        mask: u32,
    },

    /// Remove a file and release its content
    Rm { key: String },

    /// Grant PERMISSION to IDENTITY
    Grant { identity: String, permission: String },

    /// Revoke PERMISSION from IDENTITY
    Revoke { identity: String, permission: String },

    /// Save a snapshot of the drive's current view
    Snapshot,

    /// Display drive and content store statistics
    Status,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the global config file location
    Path,
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.drive {
            config.drive.name = name.clone();
        }
        if let Some(root) = &self.content_root {
            config.storage.content_root = root.clone();
        }
        if let Some(dir) = &self.index_dir {
            config.storage.index_dir = dir.clone();
        }
        if self.no_create {
            config.drive.create = false;
        }
    }
}

fn main() -> Result<()> {
    #[cfg(unix)]
    // SAFETY: restoring the default SIGPIPE disposition before any threads exist.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let mut config = Config::load().context("Failed to load configuration")?;
    cli.apply(&mut config);
    log_cli_debug!(
        "Configuration loaded",
        drive = config.drive.name.as_str(),
        content_root = tracing::field::display(config.content_root().display()),
        index_dir = tracing::field::display(config.index_dir().display())
    );

    let cx = Context::background();
    match cli.command {
        Commands::Config { command } => cmd_config(&config, command),
        Commands::Mount(args) => mount::run(args, &config),
        Commands::Drive(command) => {
            let drive = open_drive(&config)?;
            let result = run_drive_command(&drive, &cx, &config, command);
            // Close even when the command failed so a snapshot is still written.
            let closed = drive.close(&cx).context("Failed to close drive");
            result.and(closed)
        }
    }
}

/// Open the configured drive over an on-disk content store.
pub(crate) fn open_drive(config: &Config) -> Result<Drive> {
    let content_root = config.content_root();
    let store = CasStore::new(&content_root)
        .with_context(|| format!("Failed to open content store at {}", content_root.display()))?;

    let options = OpenOptions::new()
        .directory(config.index_dir())
        .create(config.drive.create)
        .replay_limit(config.drive.replay_limit);
    let drive = Drive::open(Arc::new(store), &config.drive.name, options)
        .with_context(|| format!("Failed to open drive '{}'", config.drive.name))?;

    log_cli_debug!("Drive opened", address = tracing::field::display(drive.address()));
    Ok(drive)
}

fn run_drive_command(
    drive: &Drive,
    cx: &Context,
    config: &Config,
    command: DriveCommand,
) -> Result<()> {
    match command {
        DriveCommand::Add { key, path } => cmd_add(drive, cx, &key, &path),
        DriveCommand::Cat { key } => cmd_cat(drive, cx, &key),
        DriveCommand::Stat { key } => {
            let file = drive.stat(&key)?;
            print!("{}", describe(&file));
            Ok(())
        }
        DriveCommand::Ls { prefix, mask } => {
            let listing = drive.list(prefix.as_deref().unwrap_or(""))?;
            print!("{}", listing.render(mask));
            Ok(())
        }
        DriveCommand::Rm { key } => {
            drive.remove(cx, &key)?;
            log_cli_info!("Removed", key = key.as_str());
            Ok(())
        }
        DriveCommand::Grant { identity, permission } => {
            drive.grant(&identity, &permission)?;
            println!("Granted {} to {}", permission, identity);
            Ok(())
        }
        DriveCommand::Revoke { identity, permission } => {
            drive.revoke(&identity, &permission)?;
            println!("Revoked {} from {}", permission, identity);
            Ok(())
        }
        DriveCommand::Snapshot => {
            let id = drive.snapshot(cx)?;
            println!("{}", id);
            Ok(())
        }
        DriveCommand::Status => cmd_status(drive, config),
    }
}

fn cmd_add(drive: &Drive, cx: &Context, key: &str, path: &Path) -> Result<()> {
    let file = if path == Path::new("-") {
        drive.add(cx, key, io::stdin().lock())?
    } else {
        drive
            .add_file(cx, key, path)
            .with_context(|| format!("Failed to add {}", path.display()))?
    };
    println!("{}  {}", file.content_id, file.key);
    Ok(())
}

fn cmd_cat(drive: &Drive, cx: &Context, key: &str) -> Result<()> {
    let mut stream = drive.get(cx, key)?;
    let mut stdout = io::stdout().lock();
    io::copy(&mut stream, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_status(drive: &Drive, config: &Config) -> Result<()> {
    let files = drive.list("")?;
    let total: u64 = files.files().iter().map(|f| f.size).sum();
    let writers = drive.granted(WRITE_PERMISSION)?;

    println!("Drive:    {}", drive.name());
    println!("Address:  {}", drive.address());
    println!("Identity: {}", drive.identity());
    println!("Files:    {} ({})", files.len(), human_size(total));
    println!("Writers:  {}", writers.join(", "));

    let content_root = config.content_root();
    if content_root.exists() {
        let stats = CasStore::new(&content_root)?.stats()?;
        println!(
            "Content:  {} blobs, {} ({} pinned)",
            stats.blob_count,
            human_size(stats.total_bytes),
            stats.pinned_count
        );
    }
    Ok(())
}

fn cmd_config(config: &Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommands::Path => match Config::global_config_path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("No home directory; global config unavailable"),
        },
    }
    Ok(())
}

/// Multi-line `stat` output.
fn describe(file: &File) -> String {
    format!(
        "key:   {}\ncid:   {}\nsize:  {} ({})\ntime:  {}\nowner: {}\n",
        file.key,
        file.content_id,
        file.size,
        human_size(file.size),
        file.timestamp,
        file.owner
    )
}

/// Create `dir` if needed.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}
