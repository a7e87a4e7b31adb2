//! The seam to the backend-connection library.
//!
//! A [`Connector`] opens links asynchronously; a [`Link`] dispatches commands,
//! can be asked to close, and reports when it goes away. Pools only ever talk
//! to these traits, so tests drive them with scripted implementations and the
//! daemon uses [`TcpConnector`](crate::tcp::TcpConnector).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use kvgate_core::{BackendAuth, BackendConfig};

use crate::error::LinkResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A decoded backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    Nil,
}

/// How a link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectStatus {
    /// Closed on request.
    Clean,
    /// Dropped by an error, with the library's error text if it had one.
    Error(Option<String>),
}

impl DisconnectStatus {
    pub fn is_clean(&self) -> bool {
        matches!(self, DisconnectStatus::Clean)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DisconnectStatus::Clean => None,
            DisconnectStatus::Error(msg) => msg.as_deref(),
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub keep_alive: Option<Duration>,
    pub connect_timeout: Duration,
}

impl ConnectTarget {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            keep_alive: config.keep_alive(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// One established link to the backend.
pub trait Link: Send + Sync + fmt::Debug {
    /// Queue a command. Commands on one link complete in submission order;
    /// the command is queued when this is called, not when the future is
    /// first polled.
    fn command(&self, args: Vec<Vec<u8>>) -> BoxFuture<'static, LinkResult<Reply>>;

    /// Ask the link to close; the future from [`Link::closed`] then resolves
    /// with [`DisconnectStatus::Clean`].
    fn close(&self);

    /// Resolves once the link has gone away.
    fn closed(&self) -> BoxFuture<'static, DisconnectStatus>;

    /// Error recorded on the link, if any.
    fn error(&self) -> Option<String>;
}

/// Opens links to the backend.
pub trait Connector: Send + Sync {
    fn connect(&self, target: &ConnectTarget) -> BoxFuture<'static, LinkResult<Arc<dyn Link>>>;
}

/// `AUTH` arguments for the configured credentials.
pub fn auth_command(auth: &BackendAuth) -> Vec<Vec<u8>> {
    match auth {
        BackendAuth::Legacy { password } => vec![b"AUTH".to_vec(), password.as_bytes().to_vec()],
        BackendAuth::User { username, password } => vec![
            b"AUTH".to_vec(),
            username.as_bytes().to_vec(),
            password.as_bytes().to_vec(),
        ],
    }
}

pub fn select_command(database: u32) -> Vec<Vec<u8>> {
    vec![b"SELECT".to_vec(), database.to_string().into_bytes()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_auth_sends_single_secret() {
        let cmd = auth_command(&BackendAuth::Legacy {
            password: "pw".to_string(),
        });
        assert_eq!(cmd, vec![b"AUTH".to_vec(), b"pw".to_vec()]);
    }

    #[test]
    fn user_auth_sends_pair() {
        let cmd = auth_command(&BackendAuth::User {
            username: "app".to_string(),
            password: "pw".to_string(),
        });
        assert_eq!(cmd.len(), 3);
        assert_eq!(cmd[1], b"app");
    }

    #[test]
    fn select_formats_index() {
        assert_eq!(select_command(12)[1], b"12");
    }

    #[test]
    fn disconnect_status_error_text() {
        assert!(DisconnectStatus::Clean.is_clean());
        assert_eq!(DisconnectStatus::Clean.error(), None);
        assert_eq!(DisconnectStatus::Error(None).error(), None);
        assert_eq!(
            DisconnectStatus::Error(Some("reset".into())).error(),
            Some("reset")
        );
    }

    #[test]
    fn target_from_config() {
        let config = BackendConfig {
            keep_alive_sec: 0,
            ..BackendConfig::default()
        };
        let target = ConnectTarget::from_config(&config);
        assert_eq!(target.port, 6379);
        assert!(target.keep_alive.is_none());
    }
}
