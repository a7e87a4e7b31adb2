//! TCP implementation of the backend seam.
//!
//! Each [`TcpLink`] owns a driver task that serializes request/reply pairs
//! over the socket and publishes the disconnect status when the socket goes
//! away.
//!
//! # Architecture
//!
//! ```text
//! Link::command(args)
//!   → encode RESP frame → request queue
//!     → driver: write frame → read one reply → complete the command
//!
//! driver exits on close() (also while a reply is pending), write/read
//! error, or server EOF
//!   → status watch = Clean | Error(text)
//!     → Link::closed() resolves
//! ```

use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};

use crate::backend::{BoxFuture, ConnectTarget, Connector, DisconnectStatus, Link, Reply};
use crate::error::{LinkError, LinkResult};
use crate::resp;

// ── TcpConnector ─────────────────────────────────────────────────────

/// Opens plain TCP links.
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TcpConnector {
    fn connect(&self, target: &ConnectTarget) -> BoxFuture<'static, LinkResult<Arc<dyn Link>>> {
        let target = target.clone();
        Box::pin(async move {
            let addr = (target.host.as_str(), target.port);
            let stream = match tokio::time::timeout(target.connect_timeout, TcpStream::connect(addr))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(LinkError::Connect(format!(
                        "{}:{}: {e}",
                        target.host, target.port
                    )));
                }
                Err(_) => return Err(LinkError::Timeout(target.connect_timeout)),
            };
            configure_socket(&stream, target.keep_alive);

            tracing::debug!(host = %target.host, port = target.port, "tcp link established");
            Ok(Arc::new(TcpLink::start(stream)) as Arc<dyn Link>)
        })
    }
}

/// Set TCP_NODELAY and, when configured, keep-alive probing.
fn configure_socket(stream: &TcpStream, keep_alive: Option<Duration>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }
    if let Some(interval) = keep_alive {
        let keepalive = TcpKeepalive::new().with_time(interval);
        #[cfg(target_os = "linux")]
        let keepalive = keepalive.with_interval(interval);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            tracing::debug!(error = %e, "failed to set TCP keepalive");
        }
    }
}

// ── TcpLink ──────────────────────────────────────────────────────────

struct Request {
    frame: Vec<u8>,
    reply: oneshot::Sender<LinkResult<Reply>>,
}

/// A live TCP link to the backend.
pub struct TcpLink {
    requests: mpsc::UnboundedSender<Request>,
    close: watch::Sender<bool>,
    status: watch::Receiver<Option<DisconnectStatus>>,
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLink")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl TcpLink {
    /// Wrap a connected stream and spawn its driver on the current runtime.
    pub fn start(stream: TcpStream) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(None);

        tokio::spawn(drive(stream, requests_rx, close_rx, status_tx));

        Self {
            requests: requests_tx,
            close: close_tx,
            status: status_rx,
        }
    }
}

impl Link for TcpLink {
    fn command(&self, args: Vec<Vec<u8>>) -> BoxFuture<'static, LinkResult<Reply>> {
        let (tx, rx) = oneshot::channel();
        let request = Request {
            frame: resp::encode_command(&args),
            reply: tx,
        };
        let queued = self.requests.send(request).is_ok();
        Box::pin(async move {
            if !queued {
                return Err(LinkError::Closed);
            }
            rx.await.unwrap_or(Err(LinkError::Closed))
        })
    }

    fn close(&self) {
        let _ = self.close.send(true);
    }

    fn closed(&self) -> BoxFuture<'static, DisconnectStatus> {
        let mut status = self.status.clone();
        Box::pin(async move {
            match status.wait_for(Option::is_some).await {
                Ok(done) => (*done).clone().unwrap_or(DisconnectStatus::Clean),
                Err(_) => DisconnectStatus::Error(Some("link driver exited".to_string())),
            }
        })
    }

    fn error(&self) -> Option<String> {
        let status = self.status.borrow();
        match &*status {
            Some(status) => status.error().map(str::to_string),
            None => None,
        }
    }
}

async fn drive(
    stream: TcpStream,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut close: watch::Receiver<bool>,
    status: watch::Sender<Option<DisconnectStatus>>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let outcome = loop {
        tokio::select! {
            biased;

            _ = close_requested(&mut close) => break DisconnectStatus::Clean,
            request = requests.recv() => {
                let Some(Request { frame, reply }) = request else {
                    break DisconnectStatus::Clean;
                };
                let exchange = async {
                    if let Err(e) = write_half.write_all(&frame).await {
                        return Err(LinkError::from(e));
                    }
                    resp::read_reply(&mut reader).await
                };
                tokio::select! {
                    biased;

                    _ = close_requested(&mut close) => {
                        let _ = reply.send(Err(LinkError::Closed));
                        break DisconnectStatus::Clean;
                    }
                    result = exchange => match result {
                        Ok(answer) => {
                            let _ = reply.send(Ok(answer));
                        }
                        Err(err) => {
                            let _ = reply.send(Err(err.clone()));
                            break DisconnectStatus::Error(Some(err.to_string()));
                        }
                    },
                }
            }
            // Nothing is outstanding here, so any readable data is either
            // EOF or an unsolicited frame.
            readable = async { reader.fill_buf().await.map(|buf| buf.is_empty()) } => {
                let err = match readable {
                    Ok(true) => LinkError::ServerClosed,
                    Ok(false) => LinkError::Protocol("unsolicited data from server".to_string()),
                    Err(e) => LinkError::from(e),
                };
                break DisconnectStatus::Error(Some(err.to_string()));
            }
        }
    };

    let _ = write_half.shutdown().await;
    tracing::debug!(status = ?outcome, "tcp link driver finished");
    let _ = status.send(Some(outcome));
}

/// Resolves once `close()` has been called or the link itself is gone.
async fn close_requested(close: &mut watch::Receiver<bool>) {
    loop {
        if *close.borrow_and_update() {
            return;
        }
        if close.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn target(port: u16) -> ConnectTarget {
        ConnectTarget {
            host: "127.0.0.1".to_string(),
            port,
            keep_alive: Some(Duration::from_secs(15)),
            connect_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn connect_refused_is_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnector::new().connect(&target(port)).await;
        assert!(matches!(result, Err(LinkError::Connect(_))));
    }

    #[tokio::test]
    async fn command_round_trip_and_clean_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*1\r\n$4\r\nPING\r\n");
            socket.write_all(b"+PONG\r\n").await.unwrap();
            // Wait for the client to hang up.
            let _ = socket.read(&mut buf).await;
        });

        let link = TcpConnector::new().connect(&target(port)).await.unwrap();
        let reply = link.command(vec![b"PING".to_vec()]).await.unwrap();
        assert_eq!(reply, Reply::Status("PONG".into()));
        assert!(link.error().is_none());

        link.close();
        assert_eq!(link.closed().await, DisconnectStatus::Clean);
        assert!(matches!(
            link.command(vec![b"PING".to_vec()]).await,
            Err(LinkError::Closed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_hangup_reports_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let link = TcpConnector::new().connect(&target(port)).await.unwrap();
        let status = link.closed().await;
        assert_eq!(
            status,
            DisconnectStatus::Error(Some("Server closed the connection".to_string()))
        );
        assert_eq!(link.error().as_deref(), Some("Server closed the connection"));
    }

    #[tokio::test]
    async fn close_while_awaiting_reply_is_clean() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            // Read the request, never answer, and wait for the hangup.
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        let link = TcpConnector::new().connect(&target(port)).await.unwrap();
        let pending = link.command(vec![b"AUTH".to_vec(), b"secret".to_vec()]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        link.close();
        let status = tokio::time::timeout(Duration::from_secs(1), link.closed())
            .await
            .expect("closed() resolves after close()");
        assert_eq!(status, DisconnectStatus::Clean);
        assert!(matches!(pending.await, Err(LinkError::Closed)));
        assert!(link.error().is_none());
    }
}
