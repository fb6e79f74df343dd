//! Connection reader: the inbound read loop for one session.
//!
//! Reads fixed-size chunks, decodes them, frames lines and hands each line to
//! the application. An idle read triggers a keepalive `PING`. End of stream,
//! a read error or `dispose()` ends the loop; teardown then runs exactly once.

use super::encoding::{ChunkDecoder, EncodingDetector, Utf8Detector};
use super::framer::{LineBuffer, MAX_LINE_LENGTH};
use super::writer::RawLineWriter;
use crate::connection::{ReaderState, SessionControl};
use bytes::BytesMut;
use encoding_rs::{Encoding, UTF_8};
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Error type returned by line handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Application side of a connection.
pub trait LineHandler: Send + 'static {
    /// Called once per complete, non-blank line, in stream order.
    ///
    /// Errors and panics are logged and the reader keeps going.
    fn handle_line(&mut self, line: &str) -> Result<(), HandlerError>;

    /// Called at most once, when the connection ends without `dispose()`.
    fn on_disconnect(&mut self) {}
}

/// Read loop settings.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Silence after which a keepalive `PING` is sent. `None` or zero
    /// disables keepalives.
    pub idle_timeout: Option<Duration>,
    /// Encoding used when detection has no answer.
    pub encoding: &'static Encoding,
    /// Bytes requested per read.
    pub buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(60)),
            encoding: UTF_8,
            buffer_size: MAX_LINE_LENGTH * 2,
        }
    }
}

/// Inbound half of one connection session, not yet started.
pub struct ConnectionReader<R, W, H> {
    reader: R,
    writer: RawLineWriter<W>,
    handler: H,
    detector: Box<dyn EncodingDetector>,
    decoder: ChunkDecoder,
    lines: LineBuffer,
    config: ReaderConfig,
    control: Arc<SessionControl>,
}

impl<H: LineHandler> ConnectionReader<OwnedReadHalf, OwnedWriteHalf, H> {
    /// Split a connected socket into a reader and its raw writer.
    pub fn from_stream(stream: TcpStream, handler: H, config: ReaderConfig) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, RawLineWriter::new(writer), handler, config)
    }
}

impl<R, W, H> ConnectionReader<R, W, H>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    H: LineHandler,
{
    pub fn new(reader: R, writer: RawLineWriter<W>, handler: H, config: ReaderConfig) -> Self {
        Self {
            reader,
            writer,
            handler,
            detector: Box::new(Utf8Detector),
            decoder: ChunkDecoder::new(config.encoding),
            lines: LineBuffer::new(),
            config,
            control: Arc::new(SessionControl::new()),
        }
    }

    /// Replace the encoding detector.
    pub fn with_detector(mut self, detector: impl EncodingDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    /// Shared lifecycle state for this session.
    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    /// Best-effort liveness snapshot.
    pub fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    /// Send a raw line, bypassing anything queued by the application.
    pub async fn send_raw_line(&self, line: &str) -> io::Result<()> {
        self.writer.send_raw_line(line).await
    }

    /// Spawn the read loop. Consumes the reader, so it runs at most once.
    pub fn start(self) -> ReaderHandle<W> {
        let control = Arc::clone(&self.control);
        let writer = self.writer.clone();
        let task = tokio::spawn(self.run());
        ReaderHandle {
            control,
            writer,
            task,
        }
    }

    /// Run the read loop on the current task until the session ends.
    pub async fn run(mut self) -> ReaderState {
        let mut buf = BytesMut::with_capacity(self.config.buffer_size.max(1));
        let idle = self.config.idle_timeout.filter(|limit| !limit.is_zero());

        loop {
            buf.clear();

            let read = tokio::select! {
                biased;
                _ = self.control.closed() => {
                    debug!("Reader observed socket close");
                    break;
                }
                read = within_idle(idle, self.reader.read_buf(&mut buf)) => read,
            };

            match read {
                None => {
                    // The peer may not be reading; dispose must still win
                    tokio::select! {
                        biased;
                        _ = self.control.closed() => {
                            debug!("Reader observed socket close during keepalive");
                            break;
                        }
                        _ = send_keepalive(&self.writer) => {}
                    }
                }
                Some(Ok(0)) => {
                    debug!("End of stream");
                    break;
                }
                Some(Ok(n)) => self.process_chunk(&buf[..n]),
                Some(Err(e)) => {
                    debug!(error = %e, "Read failed");
                    break;
                }
            }
        }

        self.teardown().await
    }

    fn process_chunk(&mut self, raw: &[u8]) {
        let detected = self.detector.detect(raw);
        let encoding = self.decoder.select(detected.as_deref());
        debug!(
            detected = detected.as_deref().unwrap_or(""),
            chosen = encoding.name(),
            bytes = raw.len(),
            "Decoding chunk"
        );

        let text = self.decoder.decode(encoding, raw);
        for line in self.lines.push(&text) {
            self.deliver(&line);
        }
    }

    fn deliver(&mut self, line: &str) {
        trace!(line, "Dispatching line");
        let handler = &mut self.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle_line(line))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, line, "Line handler failed, reader continues");
            }
            Err(_) => {
                error!(line, "Line handler panicked, reader continues");
            }
        }
    }

    async fn teardown(self) -> ReaderState {
        let Self {
            reader,
            writer,
            mut handler,
            control,
            lines,
            ..
        } = self;

        if control.close() {
            debug!("Reader closed the socket");
        }
        drop(reader);
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Socket already closed");
        }

        if !lines.is_empty() {
            debug!(remainder = lines.remainder(), "Discarding unterminated line");
        }

        if !control.finish() {
            debug!("Reader disposed");
            return ReaderState::Disposed;
        }

        info!("Disconnected");
        if panic::catch_unwind(AssertUnwindSafe(|| handler.on_disconnect())).is_err() {
            error!("Disconnect handler panicked");
        }
        ReaderState::Disconnected
    }
}

/// Await `fut`, giving up with `None` after `idle` of silence.
async fn within_idle<F: Future>(idle: Option<Duration>, fut: F) -> Option<F::Output> {
    match idle {
        Some(limit) => timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Nudge an idle connection with `PING <unix-seconds>`.
async fn send_keepalive<W>(writer: &RawLineWriter<W>)
where
    W: AsyncWrite + Unpin + Send,
{
    let ping = format!("PING {}", chrono::Utc::now().timestamp());
    debug!(line = %ping, "Idle read, sending keepalive");
    if let Err(e) = writer.send_raw_line(&ping).await {
        warn!(error = %e, "Keepalive send failed");
    }
}

/// Handle to a running reader.
pub struct ReaderHandle<W> {
    control: Arc<SessionControl>,
    writer: RawLineWriter<W>,
    task: JoinHandle<ReaderState>,
}

impl<W> ReaderHandle<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Best-effort liveness snapshot.
    pub fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    /// Close the socket without a disconnect notification.
    ///
    /// The outbound half is closed right away, so senders blocked on a peer
    /// that stopped reading are released too.
    pub fn dispose(&self) {
        if self.control.dispose() {
            debug!("Connection disposed");
        }
        self.writer.close();
    }

    /// Send a raw line, bypassing anything queued by the application.
    pub async fn send_raw_line(&self, line: &str) -> io::Result<()> {
        self.writer.send_raw_line(line).await
    }

    /// Shared lifecycle state for this session.
    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    /// Wait for the read loop to finish.
    pub async fn join(self) -> ReaderState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Reader task failed");
                self.control.dispose();
                self.control.state()
            }
        }
    }
}
