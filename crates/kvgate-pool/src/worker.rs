//! Worker threads: one OS thread, one current-thread runtime, one pool.
//!
//! Everything the pool does happens on the worker's own loop. Other threads
//! reach it through a [`WorkerHandle`], which forwards commands over a
//! channel and waits for the loop to answer.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use kvgate_log::spawn_fsync_timer;
use tokio::sync::{mpsc, oneshot, watch};

use crate::backend::Link;
use crate::error::{WorkerError, WorkerResult};
use crate::handle::PoolId;
use crate::pool::{Pool, PoolContext, PoolStats};

/// How long teardown waits for pooled links to report their disconnects.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

enum WorkerCommand {
    Acquire(oneshot::Sender<Option<Arc<dyn Link>>>),
    Stats(oneshot::Sender<PoolStats>),
    Shutdown,
}

/// Startup parameters for one worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub id: usize,
    pub capacity: usize,
    /// Run the periodic log fsync timer on this worker's loop.
    pub host_fsync_timer: bool,
}

pub struct Worker;

impl Worker {
    /// Build the worker's runtime, start its thread and issue the initial
    /// connects. Runtime and thread creation failures are returned to the
    /// caller.
    pub fn spawn(options: WorkerOptions, ctx: PoolContext) -> WorkerResult<WorkerHandle> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(WorkerError::Runtime)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let id = options.id;
        let thread = std::thread::Builder::new()
            .name(format!("kvgate-worker-{id}"))
            .spawn(move || runtime.block_on(run(options, ctx, commands_rx)))
            .map_err(WorkerError::Thread)?;

        Ok(WorkerHandle {
            id,
            commands: commands_tx,
            thread: Some(thread),
        })
    }
}

/// Cross-thread handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkerCommand::Acquire(_) => "Acquire",
            WorkerCommand::Stats(_) => "Stats",
            WorkerCommand::Shutdown => "Shutdown",
        })
    }
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// A connected link from the worker's pool, if any slot has one.
    pub async fn acquire(&self) -> WorkerResult<Option<Arc<dyn Link>>> {
        let (tx, rx) = oneshot::channel();
        self.send(WorkerCommand::Acquire(tx))?;
        rx.await.map_err(|_| WorkerError::Stopped(self.id))
    }

    pub async fn stats(&self) -> WorkerResult<PoolStats> {
        let (tx, rx) = oneshot::channel();
        self.send(WorkerCommand::Stats(tx))?;
        rx.await.map_err(|_| WorkerError::Stopped(self.id))
    }

    /// Stop the worker and wait for its thread. Blocks the calling thread.
    pub fn shutdown(mut self) -> WorkerResult<()> {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| WorkerError::Panicked(self.id)),
            None => Ok(()),
        }
    }

    fn send(&self, command: WorkerCommand) -> WorkerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| WorkerError::Stopped(self.id))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.commands.send(WorkerCommand::Shutdown);
        }
    }
}

async fn run(
    options: WorkerOptions,
    ctx: PoolContext,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
) {
    let WorkerOptions {
        id,
        capacity,
        host_fsync_timer,
    } = options;

    let (fsync_stop, fsync_rx) = watch::channel(false);
    let fsync_timer = if host_fsync_timer {
        spawn_fsync_timer(ctx.sink.clone(), fsync_rx)
    } else {
        None
    };

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut pool = Pool::new(PoolId(id), capacity, ctx, events_tx);
    tracing::info!(worker = id, capacity, "worker started");
    pool.connect_all();

    loop {
        tokio::select! {
            Some(event) = events.recv() => pool.handle_event(event),
            command = commands.recv() => match command {
                Some(WorkerCommand::Acquire(reply)) => {
                    let link = pool.acquire().and_then(|h| h.link().cloned());
                    let _ = reply.send(link);
                }
                Some(WorkerCommand::Stats(reply)) => {
                    let _ = reply.send(pool.stats());
                }
                Some(WorkerCommand::Shutdown) | None => break,
            },
        }
    }

    pool.shutdown();
    let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    while !pool.is_drained() {
        tokio::select! {
            Some(event) = events.recv() => pool.handle_event(event),
            _ = &mut deadline => {
                tracing::warn!(
                    worker = id,
                    remaining = pool.occupied(),
                    "drain timeout expired, dropping remaining connections"
                );
                break;
            }
        }
    }
    let dropped = pool.abort();
    if dropped > 0 {
        tracing::debug!(worker = id, dropped, "released handles during teardown");
    }

    let _ = fsync_stop.send(true);
    if let Some(timer) = fsync_timer {
        let _ = timer.await;
    }
    tracing::info!(worker = id, "worker stopped");
}
