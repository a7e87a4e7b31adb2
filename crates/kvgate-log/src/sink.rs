//! The process-wide log sink.

use std::path::Path;
use std::sync::Mutex;

use kvgate_core::{FsyncPolicy, LogConfig, LogLevel, Verbosity};

use crate::line::{format_line, local_timestamp};
use crate::target::{FileTarget, LogTarget, StderrTarget};

/// Level-gated, append-only writer shared by every worker thread.
///
/// Writes are serialized through an internal mutex so each line lands as one
/// unit. Write and sync errors are swallowed: logging never takes the process
/// down.
#[derive(Debug)]
pub struct LogSink {
    pid: u32,
    verbosity: Verbosity,
    fsync: FsyncPolicy,
    target: Mutex<Box<dyn LogTarget>>,
}

impl LogSink {
    /// Open the sink described by `config`, falling back to stderr if the
    /// configured file cannot be opened.
    pub fn open(config: &LogConfig) -> Self {
        let target = open_target(config.file.as_deref());
        Self::with_target(target, config.verbosity, config.fsync)
    }

    pub fn with_target(target: Box<dyn LogTarget>, verbosity: Verbosity, fsync: FsyncPolicy) -> Self {
        Self {
            pid: std::process::id(),
            verbosity,
            fsync,
            target: Mutex::new(target),
        }
    }

    /// Swap the destination, e.g. after log rotation. The previous target is
    /// dropped (and closed) once the new one is in place.
    pub fn reopen(&self, path: Option<&Path>) {
        let target = open_target(path);
        let _previous = std::mem::replace(&mut *self.lock(), target);
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.verbosity.allows(level)
    }

    pub fn fsync_policy(&self) -> FsyncPolicy {
        self.fsync
    }

    /// Write one message if `level` passes the verbosity threshold.
    pub fn write(&self, level: LogLevel, message: &str) {
        if !self.is_enabled(level) {
            return;
        }
        let line = format_line(self.pid, &local_timestamp(), level, message);

        let mut target = self.lock();
        let _ = target.write_line(&line);
        if self.fsync == FsyncPolicy::EveryWrite {
            let _ = target.sync();
        }
    }

    /// Force buffered data to stable storage.
    pub fn sync(&self) {
        let _ = self.lock().sync();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn LogTarget>> {
        self.target.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_target(path: Option<&Path>) -> Box<dyn LogTarget> {
    if let Some(path) = path {
        match FileTarget::open(path) {
            Ok(file) => return Box::new(file),
            Err(e) => eprintln!("Could not open {}: {e}", path.display()),
        }
    }
    Box::new(StderrTarget)
}
