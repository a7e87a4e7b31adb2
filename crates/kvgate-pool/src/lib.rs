//! Backend connectivity runtime for kvgate.
//!
//! Each worker thread owns a [`Pool`] of fixed-size connection slots to the
//! key-value backend. Connects happen asynchronously; lost or failed links
//! are retried after a fixed delay; the first authentication outcome across
//! the whole process is logged once through the [`AuthReporter`].
//!
//! The backend library sits behind the [`Connector`]/[`Link`] traits.
//! [`TcpConnector`] is the production implementation.

pub mod auth;
pub mod backend;
pub mod error;
pub mod handle;
pub mod pool;
pub mod reconnect;
pub mod resp;
pub mod tcp;
pub mod worker;

#[cfg(test)]
mod testing;

pub use auth::AuthReporter;
pub use backend::{BoxFuture, ConnectTarget, Connector, DisconnectStatus, Link, Reply};
pub use error::{LinkError, LinkResult, TransitionError, WorkerError, WorkerResult};
pub use handle::{ConnectionHandle, HandleId, HandleState, PoolId};
pub use pool::{Pool, PoolContext, PoolEvent, PoolStats};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectScheduler};
pub use tcp::{TcpConnector, TcpLink};
pub use worker::{DRAIN_TIMEOUT, Worker, WorkerHandle, WorkerOptions};
