//! Entry point: privilege check, config load, logging setup, thread
//! spawn, and signal-driven shutdown.
//!
//! Grounded on `beam-agent::main.rs`: `#[tokio::main]` async entry
//! that spawns blocking OS threads via `std::thread::Builder` for the
//! actual work and only uses the async runtime to wait on signals.

mod activation;
mod config;
mod devinfo;
mod engine;
mod keys;
mod output;
mod router;
mod supervisor;
mod tick;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use router::Shared;

fn init_logging() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = std::env::var("SMOOTH_SCROLL_LOG_DIR").unwrap_or_else(|_| "/tmp/smooth_scroll".into());
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {log_dir}"))?;
    // Non-rotating, single file: §6 asks for "a persistent log file at
    // a conventional temp path", not a rotation policy.
    let file_appender = tracing_appender::rolling::never(&log_dir, "daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr.and(non_blocking))
        .init();

    Ok(guard)
}

fn check_privileges() -> anyhow::Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        anyhow::bail!(
            "must run as root: grabbing input devices and /dev/uinput requires elevated privileges"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = check_privileges() {
        error!(error = %e, "refusing to start");
        std::process::exit(1);
    }

    let config = match config::load() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    info!(mode = ?config.mode, sensitivity = config.sensitivity, "configuration loaded");

    let running = Arc::new(AtomicBool::new(true));
    let shared = Arc::new(Mutex::new(Shared::new(&config)));

    let supervisor_config = config.clone();
    let supervisor_shared = Arc::clone(&shared);
    let supervisor_running = Arc::clone(&running);
    let supervisor_thread = std::thread::Builder::spawn(move || {
        supervisor::supervise(&supervisor_config, &supervisor_shared, &supervisor_running);
    })
    .context("failed to spawn supervisor thread")?;

    wait_for_shutdown_signal(&running).await;
    info!("shutdown signal received");
    running.store(false, Ordering::SeqCst);

    if supervisor_thread.join().is_err() {
        error!("supervisor thread panicked");
    }

    info!("shut down cleanly");
    Ok(())
}

/// Waits for SIGTERM/Ctrl-C, but also wakes on `running` going false on
/// its own -- the panic-button hotkey (§4.3) flips `running` from the
/// router thread with no OS signal involved, and this task otherwise
/// has no way to notice that and return.
async fn wait_for_shutdown_signal(running: &AtomicBool) {
    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            None
        }
    };

    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }

        let sigterm_recv = async {
            #[cfg(unix)]
            match sigterm.as_mut() {
                Some(s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await
        };

        tokio::select! {
            _ = sigterm_recv => return,
            _ = tokio::signal::ctrl_c() => return,
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
        }
    }
}
