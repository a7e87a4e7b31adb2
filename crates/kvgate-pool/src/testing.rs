//! Scripted connector and link used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::time::Instant;

use crate::backend::{BoxFuture, ConnectTarget, Connector, DisconnectStatus, Link, Reply};
use crate::error::{LinkError, LinkResult};

/// What the next `connect` call does.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Fail,
    Succeed,
    /// Connects, but the link already carries an error.
    SucceedWithError(String),
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    attempts: Mutex<Vec<Instant>>,
    links: Mutex<Vec<Arc<MockLink>>>,
    auth_reply: Mutex<Option<Reply>>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes; once the script runs out every attempt succeeds.
    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub(crate) fn set_auth_reply(&self, reply: Reply) {
        *self.auth_reply.lock().unwrap() = Some(reply);
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn links(&self) -> Vec<Arc<MockLink>> {
        self.links.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _target: &ConnectTarget) -> BoxFuture<'static, LinkResult<Arc<dyn Link>>> {
        self.attempts.lock().unwrap().push(Instant::now());
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Succeed);

        let result = match outcome {
            Outcome::Fail => Err(LinkError::Connect("scripted failure".to_string())),
            Outcome::Succeed | Outcome::SucceedWithError(_) => {
                let link = Arc::new(MockLink::new(self.auth_reply.lock().unwrap().clone()));
                if let Outcome::SucceedWithError(message) = outcome {
                    *link.error.lock().unwrap() = Some(message);
                }
                self.links.lock().unwrap().push(link.clone());
                Ok(link as Arc<dyn Link>)
            }
        };
        Box::pin(async move { result })
    }
}

#[derive(Debug)]
pub(crate) struct MockLink {
    commands: Mutex<Vec<Vec<Vec<u8>>>>,
    status: watch::Sender<Option<DisconnectStatus>>,
    close_requested: AtomicBool,
    error: Mutex<Option<String>>,
    auth_reply: Option<Reply>,
}

impl MockLink {
    fn new(auth_reply: Option<Reply>) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            commands: Mutex::new(Vec::new()),
            status,
            close_requested: AtomicBool::new(false),
            error: Mutex::new(None),
            auth_reply,
        }
    }

    /// Simulate the backend dropping the link.
    pub(crate) fn drop_with(&self, status: DisconnectStatus) {
        self.status.send_replace(Some(status));
    }

    /// Command names in submission order.
    pub(crate) fn command_names(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|args| String::from_utf8_lossy(&args[0]).into_owned())
            .collect()
    }

    pub(crate) fn commands(&self) -> Vec<Vec<Vec<u8>>> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }
}

impl Link for MockLink {
    fn command(&self, args: Vec<Vec<u8>>) -> BoxFuture<'static, LinkResult<Reply>> {
        let reply = if args.first().map(Vec::as_slice) == Some(b"AUTH") {
            self.auth_reply.clone().ok_or(LinkError::Closed)
        } else {
            Ok(Reply::Status("OK".to_string()))
        };
        self.commands.lock().unwrap().push(args);
        Box::pin(async move { reply })
    }

    fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.status.send_if_modified(|status| {
            if status.is_some() {
                return false;
            }
            *status = Some(DisconnectStatus::Clean);
            true
        });
    }

    fn closed(&self) -> BoxFuture<'static, DisconnectStatus> {
        let mut status = self.status.subscribe();
        Box::pin(async move {
            match status.wait_for(Option::is_some).await {
                Ok(done) => (*done).clone().unwrap_or(DisconnectStatus::Clean),
                Err(_) => DisconnectStatus::Error(None),
            }
        })
    }

    fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }
}
