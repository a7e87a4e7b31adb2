//! Periodic fsync for [`kvgate_core::FsyncPolicy::PeriodicMillis`].
//!
//! The sink is process-wide but the timer has to live on some event loop;
//! the daemon puts it on the first worker's runtime.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::LogSink;

/// Spawn the recurring sync task on the current runtime.
///
/// Returns `None` unless the sink is configured with a periodic policy. The
/// task stops when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_fsync_timer(
    sink: Arc<LogSink>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let period = sink.fsync_policy().period()?;

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(period_ms = period.as_millis() as u64, "log fsync timer armed");

        loop {
            tokio::select! {
                _ = ticker.tick() => sink.sync(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
    Some(handle)
}
