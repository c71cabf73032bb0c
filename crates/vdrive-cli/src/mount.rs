use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use vdrive_config::path::resolve_against;
use vdrive_config::{log_cli_info, Config};
use vdrive_fuse::ShutdownSignal;

use crate::{ensure_dir, open_drive};

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Mount point directory
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,
}

/// Execute the mount command.
///
/// Blocks until the filesystem is unmounted externally or the process
/// receives SIGINT/SIGTERM, then closes the drive.
pub fn run(args: MountArgs, config: &Config) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let mountpoint = resolve_against(&args.mountpoint, cwd);
    ensure_dir(&mountpoint)?;

    let mut mount_config = config.mount.clone();
    mount_config.allow_other |= args.allow_other;

    let drive = Arc::new(open_drive(config)?);
    log_cli_info!(
        "Mounting drive",
        drive = drive.name(),
        address = tracing::field::display(drive.address()),
        mountpoint = tracing::field::display(mountpoint.display())
    );

    let shutdown = ShutdownSignal::new();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    rt.spawn(trigger_when(wait_for_termination(), shutdown.clone()));

    // Blocks until `shutdown` fires.
    let result = vdrive_fuse::mount(drive, &mountpoint, &mount_config, shutdown);
    rt.shutdown_background();
    result
}

async fn trigger_when(termination: impl Future<Output = ()>, shutdown: ShutdownSignal) {
    termination.await;
    log_cli_info!("Shutdown requested, unmounting");
    shutdown.trigger();
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(component = "CLI", error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_termination_triggers_shutdown() {
        let shutdown = ShutdownSignal::new();
        runtime().block_on(trigger_when(async {}, shutdown.clone()));
        assert!(shutdown.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_no_termination_leaves_mount_running() {
        let shutdown = ShutdownSignal::new();
        let waited = runtime().block_on(async {
            tokio::time::timeout(
                Duration::from_millis(20),
                trigger_when(std::future::pending(), shutdown.clone()),
            )
            .await
        });
        assert!(waited.is_err());
        assert!(!shutdown.is_triggered());
    }
}
