//! Fixed-capacity log line formatting.
//!
//! Every line has the shape
//!
//! ```text
//! [<pid>] <dd Mon HH:MM:SS> <letter> <message>\n
//! ```
//!
//! The message is cut to [`MAX_MESSAGE_LEN`] bytes and the whole line never
//! exceeds [`LINE_CAPACITY`] bytes, whatever the input length.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Local};
use kvgate_core::LogLevel;

/// Longest message body kept, in bytes.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Upper bound on a formatted line, newline included.
pub const LINE_CAPACITY: usize = 2 * MAX_MESSAGE_LEN;

/// Written in place of the timestamp when local time is unavailable.
pub const NO_TIME: &str = "(NO TIME AVAILABLE)";

const TIME_FORMAT: &str = "%d %b %H:%M:%S";

/// A byte buffer that refuses to grow past its capacity.
///
/// Writes beyond the capacity are silently cut at the last UTF-8 boundary
/// that fits; one byte is always held back for the trailing newline.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl LineBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Room left for content, excluding the reserved newline byte.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(1).saturating_sub(self.buf.len())
    }

    /// Appends as much of `s` as fits. Returns the number of bytes kept.
    pub fn push_str(&mut self, s: &str) -> usize {
        let kept = truncate_utf8(s, self.remaining());
        self.buf.extend_from_slice(kept.as_bytes());
        kept.len()
    }

    /// Terminates the line and hands back the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        if self.buf.len() < self.capacity {
            self.buf.push(b'\n');
        }
        self.buf
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Formats the current local time, or [`NO_TIME`] if it cannot be determined.
pub fn local_timestamp() -> String {
    match now_local() {
        Some(now) => now.format(TIME_FORMAT).to_string(),
        None => NO_TIME.to_string(),
    }
}

fn now_local() -> Option<DateTime<Local>> {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?;
    let secs = i64::try_from(since_epoch.as_secs()).ok()?;
    DateTime::from_timestamp(secs, 0).map(|utc| utc.with_timezone(&Local))
}

/// Builds one complete log line.
pub fn format_line(pid: u32, timestamp: &str, level: LogLevel, message: &str) -> Vec<u8> {
    let mut line = LineBuffer::with_capacity(LINE_CAPACITY);
    let _ = write!(line, "[{pid}] {timestamp} {} ", level.letter());
    line.push_str(truncate_utf8(message, MAX_MESSAGE_LEN));
    line.finish()
}
