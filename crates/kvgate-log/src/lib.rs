//! kvgate-log: the process-wide log sink.
//!
//! A level-gated, append-only writer shared by every worker. Each line is
//! prefixed with the process id, a local timestamp and a one-letter level tag,
//! and is bounded in length regardless of the message size.
//!
//! # Durability
//!
//! ```text
//! FsyncPolicy::Never             → OS buffering only
//! FsyncPolicy::EveryWrite        → sync before write() returns
//! FsyncPolicy::PeriodicMillis(n) → spawn_fsync_timer() syncs every n ms
//! ```
//!
//! [`SinkLayer`] plugs the sink into `tracing_subscriber` so structured
//! `tracing` events from the rest of the process land in the same place.

pub mod fsync;
pub mod layer;
pub mod line;
pub mod sink;
pub mod target;

pub use fsync::spawn_fsync_timer;
pub use layer::SinkLayer;
pub use line::{LINE_CAPACITY, MAX_MESSAGE_LEN};
pub use sink::LogSink;
pub use target::{FileTarget, LogTarget, MemoryTarget, StderrTarget};
