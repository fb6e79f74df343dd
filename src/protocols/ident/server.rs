//! Single-shot ident listener.

use super::reply::{format_reply, line_end};
use crate::protocols::irc::framer::MAX_LINE_LENGTH;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info};

/// Well-known ident port.
pub const IDENT_PORT: u16 = 113;

/// Ident responder settings.
#[derive(Debug, Clone)]
pub struct IdentConfig {
    /// Address to listen on.
    pub listen: SocketAddr,
    /// Overall lifetime, measured from bind.
    pub timeout: Duration,
}

impl Default for IdentConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, IDENT_PORT)),
            timeout: Duration::from_secs(60),
        }
    }
}

/// How a responder ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentOutcome {
    /// One query was answered.
    Replied,
    /// No query arrived in time.
    TimedOut,
    /// The listening socket could not be created.
    BindFailed,
    /// The one connection failed or closed before sending a query.
    Failed,
}

/// A running (or never started) ident responder.
pub struct IdentServer {
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<IdentOutcome>>,
}

impl IdentServer {
    /// Bind and start answering for `identity`.
    ///
    /// Never fails: a bind error is logged and the returned server finishes
    /// immediately with [`IdentOutcome::BindFailed`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(identity: impl Into<String>, config: &IdentConfig) -> Self {
        let listener = match bind(config.listen) {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %config.listen, error = %e, "Could not start the ident server");
                return Self {
                    local_addr: None,
                    task: None,
                };
            }
        };

        let local_addr = listener.local_addr().ok();
        info!(
            addr = %config.listen,
            timeout_secs = config.timeout.as_secs(),
            "Ident server running"
        );

        let deadline = Instant::now() + config.timeout;
        let task = tokio::spawn(serve_once(
            listener,
            identity.into(),
            deadline,
            config.timeout,
        ));

        Self {
            local_addr,
            task: Some(task),
        }
    }

    /// Address the responder is listening on, if the bind succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Wait for the responder to finish.
    pub async fn join(self) -> IdentOutcome {
        match self.task {
            None => IdentOutcome::BindFailed,
            Some(task) => task.await.unwrap_or(IdentOutcome::Failed),
        }
    }
}

/// Create the listening socket. Backlog of one: only one query is served.
fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;

    TcpListener::from_std(socket.into())
}

async fn serve_once(
    listener: TcpListener,
    identity: String,
    deadline: Instant,
    session_timeout: Duration,
) -> IdentOutcome {
    let outcome = match timeout_at(deadline, listener.accept()).await {
        Err(_) => {
            debug!("No ident request before timeout");
            IdentOutcome::TimedOut
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Ident accept failed");
            IdentOutcome::Failed
        }
        Ok(Ok((stream, peer))) => {
            debug!(peer = %peer, "Ident connection");
            match timeout(session_timeout, respond(stream, &identity)).await {
                Ok(Ok(true)) => IdentOutcome::Replied,
                Ok(Ok(false)) => IdentOutcome::Failed,
                Ok(Err(e)) => {
                    debug!(error = %e, "Ident session failed");
                    IdentOutcome::Failed
                }
                Err(_) => IdentOutcome::TimedOut,
            }
        }
    };

    drop(listener);
    info!(outcome = ?outcome, "The ident server has been shut down");
    outcome
}

/// Answer one query. Returns `false` if the peer closed without sending one.
async fn respond(stream: TcpStream, identity: &str) -> io::Result<bool> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_LINE_LENGTH as u64));

    let query = match read_query(&mut reader).await? {
        Some(query) => query,
        None => return Ok(false),
    };
    info!(query = %String::from_utf8_lossy(&query), "Ident request received");

    let reply = format_reply(&query, identity);
    writer.write_all(&reply).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    info!(
        reply = %String::from_utf8_lossy(&reply).trim_end(),
        "Ident reply sent"
    );

    Ok(true)
}

/// Read raw query bytes up to the first CR or LF, or to end of stream.
///
/// Returns `None` if the stream ended before any byte arrived.
async fn read_query<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut query = Vec::with_capacity(64);
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((!query.is_empty()).then_some(query));
        }

        match line_end(available) {
            Some(end) => {
                query.extend_from_slice(&available[..end]);
                reader.consume(end + 1);
                return Ok(Some(query));
            }
            None => {
                let n = available.len();
                query.extend_from_slice(available);
                reader.consume(n);
            }
        }
    }
}
