//! kvgated: the kvgate daemon.
//!
//! Starts one worker thread per configured thread, each holding a pool of
//! backend connections, and keeps them connected until interrupted.
//!
//! # Usage
//!
//! ```text
//! kvgated --config /etc/kvgate/kvgate.toml
//! kvgated --config kvgate.toml --check
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kvgate_core::{GatewayConfig, LogLevel, Verbosity};
use kvgate_log::{LogSink, SinkLayer};
use kvgate_pool::{AuthReporter, PoolContext, TcpConnector, Worker, WorkerHandle, WorkerOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "kvgated", about = "kvgate daemon")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    let sink = Arc::new(LogSink::open(&config.log));
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(config.log.verbosity))),
        )
        .with(SinkLayer::new(sink.clone()))
        .init();

    info!(
        host = %config.backend.host,
        port = config.backend.port,
        threads = config.workers.threads,
        pool_size = config.workers.pool_size_per_thread,
        "kvgate daemon starting"
    );

    let ctx = PoolContext {
        config: Arc::new(config.backend.clone()),
        connector: Arc::new(TcpConnector::new()),
        auth: Arc::new(AuthReporter::new(sink.clone())),
        sink: sink.clone(),
    };

    let mut workers = Vec::with_capacity(config.workers.threads);
    for id in 0..config.workers.threads {
        let options = WorkerOptions {
            id,
            capacity: config.workers.pool_size_per_thread,
            host_fsync_timer: id == 0,
        };
        match Worker::spawn(options, ctx.clone()) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                stop_workers(workers);
                return Err(e).context("starting workers");
            }
        }
    }
    info!(workers = workers.len(), "all workers started");

    let waited = wait_for_shutdown();
    stop_workers(workers);
    sink.sync();
    waited
}

/// Block until Ctrl-C on a small runtime of its own.
fn wait_for_shutdown() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    runtime.block_on(async {
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
        info!("shutdown signal received");
        Ok(())
    })
}

fn stop_workers(workers: Vec<WorkerHandle>) {
    for worker in workers {
        let id = worker.id();
        if let Err(e) = worker.shutdown() {
            error!(worker = id, error = %e, "worker did not stop cleanly");
        }
    }
    info!("kvgate daemon stopped");
}

/// `tracing` directive matching the sink's verbosity, so events the sink
/// would drop are not built in the first place.
fn default_directive(verbosity: Verbosity) -> &'static str {
    if verbosity.allows(LogLevel::Trace) {
        "trace"
    } else if verbosity.allows(LogLevel::Debug) {
        "debug"
    } else if verbosity.allows(LogLevel::Info) {
        "info"
    } else if verbosity.allows(LogLevel::Warning) {
        "warn"
    } else {
        "error"
    }
}
