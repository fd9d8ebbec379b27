use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ferry::cli::DaemonOpts;
use ferry::logger::{Logger, NoopLogger, StderrLogger, TextLogger};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let quiet = opts.quiet;
    let config = opts.into_config()?;

    // Validate root directory exists and is a directory
    if !config.root.exists() {
        anyhow::bail!("Error: Root directory does not exist: {}", config.root.display());
    }
    if !config.root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", config.root.display());
    }

    let logger: Arc<dyn Logger> = if quiet {
        Arc::new(NoopLogger)
    } else if let Some(ref p) = config.log_file {
        Arc::new(TextLogger::new(p).with_context(|| format!("open log file {}", p.display()))?)
    } else {
        Arc::new(StderrLogger)
    };

    println!("Starting ferry daemon:");
    println!("  Root: {}", config.root.display());
    println!("  Bind: {}", config.bind);
    println!(
        "  Workers: {}  Transfer slots: {}",
        config.workers, config.max_transfers
    );
    if cfg!(target_os = "linux") {
        println!("  Zero-copy: sendfile(2)");
    } else {
        println!("  Zero-copy: unavailable, zero mode uses buffered copy");
    }

    // Security warning for 0.0.0.0 binding
    if config.bind.starts_with("0.0.0.0") {
        eprintln!("⚠️  WARNING: Binding to 0.0.0.0 exposes every file under the root to all network interfaces");
        eprintln!("   This protocol is UNENCRYPTED and UNAUTHENTICATED");
        eprintln!("");
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n[SERVER] Shutdown signal received");
        signal.cancel();
    })
    .context("Failed to install signal handler")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(ferry::server::serve(&config, logger, shutdown))?;
    println!("[SERVER] Stopped");
    Ok(())
}
