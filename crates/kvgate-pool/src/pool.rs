//! Per-worker pool of backend connection slots.
//!
//! # Architecture
//!
//! ```text
//! request_connect ──▶ Connector::connect (task) ──▶ PoolEvent::Connected
//!                                                       │
//!        ┌──────────────── fail / link error ◀──────────┤
//!        ▼                                              ▼ ok
//!  ReconnectScheduler ──delay──▶ PoolEvent::ReconnectDue   watch Link::closed
//!        ▲                                              │  AUTH, SELECT
//!        │                                              │  first empty slot
//!        └──────────── PoolEvent::Disconnected ◀────────┘
//! ```
//!
//! Every mutation happens in [`Pool::handle_event`] on the owning worker's
//! loop, so the pool itself needs no locking. Background tasks only ever talk
//! back to it through the event channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kvgate_core::{BackendAuth, BackendConfig, LogLevel};
use kvgate_log::LogSink;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::auth::AuthReporter;
use crate::backend::{ConnectTarget, Connector, DisconnectStatus, Link, Reply, auth_command, select_command};
use crate::error::LinkResult;
use crate::handle::{ConnectionHandle, HandleId, HandleState, PoolId};
use crate::reconnect::ReconnectScheduler;

/// Outcomes delivered back to the pool on its own loop.
#[derive(Debug)]
pub enum PoolEvent {
    /// A connect request finished.
    Connected {
        handle: HandleId,
        result: LinkResult<Arc<dyn Link>>,
    },
    /// A pooled link went away.
    Disconnected {
        handle: HandleId,
        status: DisconnectStatus,
    },
    /// A reconnect timer fired.
    ReconnectDue,
}

/// Everything a pool shares with the rest of the process.
#[derive(Clone)]
pub struct PoolContext {
    pub config: Arc<BackendConfig>,
    pub connector: Arc<dyn Connector>,
    pub auth: Arc<AuthReporter>,
    pub sink: Arc<LogSink>,
}

impl fmt::Debug for PoolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolContext")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

/// Slot occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub connected: usize,
    pub disconnecting: usize,
    pub empty: usize,
    /// Connect requests still waiting for an outcome.
    pub connecting: usize,
    pub pending_reconnects: usize,
}

struct PendingConnect {
    handle: ConnectionHandle,
    database: u32,
}

pub struct Pool {
    id: PoolId,
    ctx: PoolContext,
    target: ConnectTarget,
    slots: Vec<Option<ConnectionHandle>>,
    connecting: HashMap<HandleId, PendingConnect>,
    next_handle: u64,
    events: mpsc::UnboundedSender<PoolEvent>,
    reconnect: ReconnectScheduler,
    tasks: JoinSet<()>,
    shutting_down: bool,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("capacity", &self.slots.len())
            .field("occupied", &self.occupied())
            .field("connecting", &self.connecting.len())
            .field("shutting_down", &self.shutting_down)
            .finish()
    }
}

impl Pool {
    /// A pool with `capacity` empty slots. Events for it must be fed back
    /// through [`Pool::handle_event`] by whoever owns `events`' receiver.
    pub fn new(
        id: PoolId,
        capacity: usize,
        ctx: PoolContext,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> Self {
        let reconnect = ReconnectScheduler::new(ctx.config.reconnect_delay(), events.clone());
        let target = ConnectTarget::from_config(&ctx.config);
        Self {
            id,
            target,
            slots: (0..capacity).map(|_| None).collect(),
            connecting: HashMap::new(),
            next_handle: 0,
            events,
            reconnect,
            tasks: JoinSet::new(),
            shutting_down: false,
            ctx,
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently holding a handle.
    pub fn occupied(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Issue one connect request per slot.
    pub fn connect_all(&mut self) {
        let database = self.ctx.config.database;
        for _ in 0..self.capacity() {
            self.request_connect(database, false);
        }
    }

    /// Start an asynchronous connect. The outcome arrives later as
    /// [`PoolEvent::Connected`]. Returns `None` once shutdown has begun.
    pub fn request_connect(&mut self, database: u32, is_reconnect: bool) -> Option<HandleId> {
        if self.shutting_down {
            return None;
        }
        let id = HandleId(self.next_handle);
        self.next_handle += 1;
        self.connecting.insert(
            id,
            PendingConnect {
                handle: ConnectionHandle::connecting(id, self.id),
                database,
            },
        );

        tracing::debug!(
            pool = %self.id,
            handle = %id,
            database,
            is_reconnect,
            "connecting to backend"
        );
        let connect = self.ctx.connector.connect(&self.target);
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let result = connect.await;
            let _ = events.send(PoolEvent::Connected { handle: id, result });
        });
        Some(id)
    }

    pub fn handle_event(&mut self, event: PoolEvent) {
        self.reap_tasks();
        match event {
            PoolEvent::Connected { handle, result } => self.on_connect(handle, result),
            PoolEvent::Disconnected { handle, status } => self.on_disconnect(handle, status),
            PoolEvent::ReconnectDue => {
                let database = self.ctx.config.database;
                self.request_connect(database, true);
            }
        }
    }

    fn on_connect(&mut self, id: HandleId, result: LinkResult<Arc<dyn Link>>) {
        let Some(PendingConnect { mut handle, database }) = self.connecting.remove(&id) else {
            tracing::debug!(pool = %self.id, handle = %id, "connect outcome for unknown handle");
            if let Ok(link) = result {
                link.close();
            }
            return;
        };

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                tracing::debug!(pool = %self.id, handle = %id, error = %e, "backend connect failed");
                self.retire(handle);
                self.schedule_reconnect();
                return;
            }
        };
        if let Some(err) = link.error() {
            tracing::debug!(pool = %self.id, handle = %id, error = %err, "backend link reported an error");
            link.close();
            self.retire(handle);
            self.schedule_reconnect();
            return;
        }

        if self.shutting_down {
            link.close();
            self.retire(handle);
            return;
        }

        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            self.ctx.sink.write(
                LogLevel::Error,
                &format!(
                    "No free slot in {} for connection {id}, closing it",
                    self.id
                ),
            );
            link.close();
            self.retire(handle);
            return;
        };

        if let Err(e) = handle.mark_connected(link.clone()) {
            tracing::warn!(pool = %self.id, handle = %id, error = %e, "cannot mark handle connected");
            link.close();
            return;
        }
        self.watch_disconnect(id, &link);

        let config = self.ctx.config.clone();
        if let Some(auth) = &config.auth {
            self.send_auth(&link, auth);
        }
        if database != 0 {
            self.send_select(&link, database);
        }

        self.slots[slot] = Some(handle);
        tracing::debug!(pool = %self.id, handle = %id, slot, "backend connection added to pool");
    }

    fn on_disconnect(&mut self, id: HandleId, status: DisconnectStatus) {
        let Some(slot) = self.slot_of(id) else {
            tracing::debug!(pool = %self.id, handle = %id, "disconnect for untracked handle ignored");
            return;
        };

        if !status.is_clean() {
            let reason = status.error().unwrap_or("(null)");
            self.ctx
                .sink
                .write(LogLevel::Error, &format!("Error disconnecting: {reason}"));
        }
        if let Some(handle) = self.slots[slot].take() {
            self.retire(handle);
        }
        tracing::debug!(
            pool = %self.id,
            handle = %id,
            slot,
            clean = status.is_clean(),
            "backend connection removed from pool"
        );
        self.schedule_reconnect();
    }

    fn watch_disconnect(&mut self, id: HandleId, link: &Arc<dyn Link>) {
        let closed = link.closed();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let status = closed.await;
            let _ = events.send(PoolEvent::Disconnected { handle: id, status });
        });
    }

    fn send_auth(&mut self, link: &Arc<dyn Link>, auth: &BackendAuth) {
        let reply = link.command(auth_command(auth));
        let reporter = self.ctx.auth.clone();
        self.tasks.spawn(async move {
            let reply = reply.await.ok();
            reporter.report(reply.as_ref());
        });
    }

    fn send_select(&mut self, link: &Arc<dyn Link>, database: u32) {
        let reply = link.command(select_command(database));
        let pool = self.id;
        self.tasks.spawn(async move {
            match reply.await {
                Ok(Reply::Error(message)) => {
                    tracing::warn!(pool = %pool, database, error = %message, "SELECT rejected by backend");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(pool = %pool, database, error = %e, "SELECT not completed"),
            }
        });
    }

    fn schedule_reconnect(&mut self) {
        if self.shutting_down {
            return;
        }
        self.reconnect.schedule();
    }

    fn slot_of(&self, id: HandleId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|h| h.id() == id))
    }

    fn retire(&self, mut handle: ConnectionHandle) {
        if let Err(e) = handle.mark_gone() {
            tracing::warn!(pool = %self.id, handle = %handle.id(), error = %e, "cannot retire handle");
        }
    }

    fn reap_tasks(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(pool = %self.id, error = %e, "pool task panicked");
                }
            }
        }
    }

    /// Gracefully close one pooled handle. The disconnect event that follows
    /// clears the slot.
    pub fn request_disconnect(&mut self, id: HandleId) -> bool {
        let Some(slot) = self.slot_of(id) else {
            return false;
        };
        let Some(handle) = self.slots[slot].as_mut() else {
            return false;
        };
        match handle.request_disconnect() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(pool = %self.id, handle = %id, error = %e, "disconnect not requested");
                false
            }
        }
    }

    /// First slot holding a connected handle.
    pub fn acquire(&self) -> Option<&ConnectionHandle> {
        self.slots.iter().flatten().find(|h| h.is_connected())
    }

    pub fn slot(&self, index: usize) -> Option<&ConnectionHandle> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn stats(&mut self) -> PoolStats {
        let mut stats = PoolStats {
            capacity: self.slots.len(),
            connecting: self.connecting.len(),
            pending_reconnects: self.reconnect.pending(),
            ..PoolStats::default()
        };
        for slot in &self.slots {
            match slot.as_ref().map(ConnectionHandle::state) {
                None => stats.empty += 1,
                Some(HandleState::Connected) => stats.connected += 1,
                Some(HandleState::Disconnecting) => stats.disconnecting += 1,
                Some(_) => {}
            }
        }
        stats
    }

    /// Stop reconnecting and ask every connected handle to close. Disconnect
    /// events still need to be fed in to empty the slots.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        self.reconnect.cancel_all();

        let ids: Vec<HandleId> = self
            .slots
            .iter()
            .flatten()
            .filter(|h| h.is_connected())
            .map(ConnectionHandle::id)
            .collect();
        for id in &ids {
            self.request_disconnect(*id);
        }
        tracing::info!(
            pool = %self.id,
            disconnecting = ids.len(),
            connecting = self.connecting.len(),
            "pool shutting down"
        );
    }

    /// No slot is occupied and no connect is outstanding.
    pub fn is_drained(&self) -> bool {
        self.occupied() == 0 && self.connecting.is_empty()
    }

    /// Abort background tasks and release whatever is left. Returns how many
    /// handles were still held.
    pub fn abort(&mut self) -> usize {
        self.tasks.abort_all();
        self.reconnect.cancel_all();

        let mut remaining = 0;
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.take() {
                if let Some(link) = handle.link() {
                    link.close();
                }
                remaining += 1;
            }
        }
        remaining += self.connecting.len();
        self.connecting.clear();
        remaining
    }
}
