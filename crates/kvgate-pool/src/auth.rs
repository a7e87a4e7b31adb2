//! Process-wide, write-once record of the backend authentication outcome.
//!
//! Every worker authenticates its own connections, but credentials are the
//! same everywhere, so only the first completed reply is worth logging.

use std::sync::{Arc, Mutex};

use kvgate_core::LogLevel;
use kvgate_log::LogSink;

use crate::backend::Reply;

/// Shared by reference with every worker at startup.
#[derive(Debug)]
pub struct AuthReporter {
    logged: Mutex<bool>,
    sink: Arc<LogSink>,
}

impl AuthReporter {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self {
            logged: Mutex::new(false),
            sink,
        }
    }

    /// Record one completed authentication.
    ///
    /// `None` (the link dropped before a reply arrived) is ignored and does
    /// not use up the one report. Returns `true` if this call was the one
    /// that recorded the outcome.
    pub fn report(&self, reply: Option<&Reply>) -> bool {
        let Some(reply) = reply else {
            return false;
        };

        let mut logged = self.logged.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *logged {
            return false;
        }
        match reply {
            Reply::Error(message) => self
                .sink
                .write(LogLevel::Error, &format!("Authentication failed: {message}")),
            Reply::Status(message) => self
                .sink
                .write(LogLevel::Info, &format!("Authentication succeeded: {message}")),
            _ => {}
        }
        *logged = true;
        true
    }

    pub fn already_logged(&self) -> bool {
        *self.logged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvgate_core::FsyncPolicy;
    use kvgate_log::MemoryTarget;

    fn reporter(verbosity: LogLevel) -> (Arc<AuthReporter>, MemoryTarget) {
        let target = MemoryTarget::new();
        let sink = LogSink::with_target(Box::new(target.clone()), verbosity.into(), FsyncPolicy::Never);
        (Arc::new(AuthReporter::new(Arc::new(sink))), target)
    }

    #[test]
    fn first_error_is_logged() {
        let (reporter, target) = reporter(LogLevel::Info);
        assert!(reporter.report(Some(&Reply::Error("WRONGPASS".into()))));
        let lines = target.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" E Authentication failed: WRONGPASS"));
        assert!(reporter.already_logged());
    }

    #[test]
    fn first_status_is_logged_at_info() {
        let (reporter, target) = reporter(LogLevel::Info);
        reporter.report(Some(&Reply::Status("OK".into())));
        assert!(target.lines()[0].ends_with(" I Authentication succeeded: OK"));
    }

    #[test]
    fn later_reports_are_ignored() {
        let (reporter, target) = reporter(LogLevel::Info);
        reporter.report(Some(&Reply::Status("OK".into())));
        assert!(!reporter.report(Some(&Reply::Error("WRONGPASS".into()))));
        assert!(!reporter.report(Some(&Reply::Status("OK".into()))));
        assert_eq!(target.lines().len(), 1);
    }

    #[test]
    fn missing_reply_does_not_consume_flag() {
        let (reporter, target) = reporter(LogLevel::Info);
        assert!(!reporter.report(None));
        assert!(!reporter.already_logged());
        assert!(target.lines().is_empty());

        assert!(reporter.report(Some(&Reply::Error("NOAUTH".into()))));
        assert_eq!(target.lines().len(), 1);
    }

    #[test]
    fn other_reply_types_consume_flag_silently() {
        let (reporter, target) = reporter(LogLevel::Trace);
        assert!(reporter.report(Some(&Reply::Integer(1))));
        assert!(reporter.already_logged());
        assert!(target.lines().is_empty());
        reporter.report(Some(&Reply::Error("late".into())));
        assert!(target.lines().is_empty());
    }

    #[test]
    fn success_below_threshold_still_sets_flag() {
        let (reporter, target) = reporter(LogLevel::Warning);
        reporter.report(Some(&Reply::Status("OK".into())));
        assert!(reporter.already_logged());
        assert!(target.lines().is_empty());
    }

    #[test]
    fn concurrent_workers_log_once() {
        for round in 0..20 {
            let (reporter, target) = reporter(LogLevel::Info);
            let threads: Vec<_> = (0..8)
                .map(|t| {
                    let reporter = reporter.clone();
                    std::thread::spawn(move || {
                        let reply = match (t + round) % 3 {
                            0 => None,
                            1 => Some(Reply::Error("WRONGPASS".into())),
                            _ => Some(Reply::Status("OK".into())),
                        };
                        reporter.report(reply.as_ref())
                    })
                })
                .collect();
            let winners = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
            assert_eq!(target.lines().len(), 1);
        }
    }

    #[test]
    fn all_empty_replies_log_nothing() {
        let (reporter, target) = reporter(LogLevel::Trace);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let reporter = reporter.clone();
                std::thread::spawn(move || reporter.report(None))
            })
            .collect();
        for t in threads {
            assert!(!t.join().unwrap());
        }
        assert!(target.lines().is_empty());
        assert!(!reporter.already_logged());
    }

    #[test]
    fn two_workers_wrongpass_single_line() {
        let (reporter, target) = reporter(LogLevel::Info);
        let a = {
            let reporter = reporter.clone();
            std::thread::spawn(move || reporter.report(Some(&Reply::Error("WRONGPASS".into()))))
        };
        let b = {
            let reporter = reporter.clone();
            std::thread::spawn(move || reporter.report(Some(&Reply::Error("WRONGPASS".into()))))
        };
        a.join().unwrap();
        b.join().unwrap();
        let lines = target.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("Authentication failed: WRONGPASS"));
    }
}
