//! One-shot reconnect timers bound to the owning worker's event loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::pool::PoolEvent;

/// Default delay between a lost connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Arms timers that post [`PoolEvent::ReconnectDue`] back to the pool after a
/// fixed delay.
///
/// Timers live in a `JoinSet` on the current runtime: [`cancel_all`] (or
/// dropping the scheduler) aborts whatever is still pending.
///
/// [`cancel_all`]: ReconnectScheduler::cancel_all
#[derive(Debug)]
pub struct ReconnectScheduler {
    delay: Duration,
    events: mpsc::UnboundedSender<PoolEvent>,
    timers: JoinSet<()>,
    cancelled: bool,
}

impl ReconnectScheduler {
    pub fn new(delay: Duration, events: mpsc::UnboundedSender<PoolEvent>) -> Self {
        Self {
            delay,
            events,
            timers: JoinSet::new(),
            cancelled: false,
        }
    }

    /// Arm one timer. Returns `false` once the scheduler has been cancelled.
    pub fn schedule(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.reap();

        let events = self.events.clone();
        let delay = self.delay;
        self.timers.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(PoolEvent::ReconnectDue);
        });
        tracing::debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        true
    }

    /// Timers that have not fired yet.
    pub fn pending(&mut self) -> usize {
        self.reap();
        self.timers.len()
    }

    /// Abort every pending timer and refuse new ones.
    pub fn cancel_all(&mut self) {
        self.cancelled = true;
        let pending = self.pending();
        // Dropping the set aborts every timer; aborted tasks would otherwise
        // count as pending until the runtime reaps them.
        drop(std::mem::take(&mut self.timers));
        if pending > 0 {
            tracing::debug!(pending, "pending reconnects cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn reap(&mut self) {
        while self.timers.try_join_next().is_some() {}
    }
}
