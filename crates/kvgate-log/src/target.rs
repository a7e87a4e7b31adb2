//! Destinations a [`LogSink`](crate::LogSink) writes into.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// An append-only destination for formatted log lines.
pub trait LogTarget: Send + std::fmt::Debug {
    /// Write one complete line in a single call.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()>;
    /// Force written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

/// A log file opened in append mode.
#[derive(Debug)]
pub struct FileTarget {
    file: File,
}

impl FileTarget {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        Ok(Self {
            file: options.open(path)?,
        })
    }
}

impl LogTarget for FileTarget {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// The process's standard error stream.
#[derive(Debug, Default)]
pub struct StderrTarget;

impl LogTarget for StderrTarget {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        io::stderr().lock().write_all(line)
    }

    fn sync(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// In-memory target that records lines and counts syncs.
///
/// Clones share the same storage, so a test can keep one clone and hand the
/// other to a sink.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    bytes: Vec<u8>,
    writes: usize,
    syncs: usize,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.state().bytes).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    pub fn byte_len(&self) -> usize {
        self.state().bytes.len()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    pub fn sync_count(&self) -> usize {
        self.state().syncs
    }
}

impl LogTarget for MemoryTarget {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        state.bytes.extend_from_slice(line);
        state.writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.state().syncs += 1;
        Ok(())
    }
}
