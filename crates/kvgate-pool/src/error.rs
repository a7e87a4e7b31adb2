//! Error types for the connectivity runtime.

use std::time::Duration;

use thiserror::Error;

use crate::handle::HandleState;

/// Failures on a single backend link.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("connection refused or unreachable: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Server closed the connection")]
    ServerClosed,

    #[error("link closed")]
    Closed,
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Io(e.to_string())
    }
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Rejected handle state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid handle transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: HandleState,
    pub to: HandleState,
}

/// Failures starting or talking to a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to spawn worker thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("worker {0} has stopped")]
    Stopped(usize),

    #[error("worker {0} panicked")]
    Panicked(usize),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
