//! Raw line output.

use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

/// Cloneable handle to the outbound half of a connection.
///
/// Each line is written with a trailing CRLF and flushed immediately.
/// Concurrent senders are serialized; there is no queue in between.
pub struct RawLineWriter<W> {
    inner: Arc<Mutex<Option<W>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl<W> Clone for RawLineWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            closed: Arc::clone(&self.closed),
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

impl<W> RawLineWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Some(writer))),
            closed: Arc::new(closed),
        }
    }

    /// Send one raw protocol line.
    ///
    /// Fails with `NotConnected` once the writer is closed, including for a
    /// send that is blocked mid-write when the close happens.
    pub async fn send_raw_line(&self, line: &str) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        if self.is_closed() {
            guard.take();
            return Err(not_connected());
        }
        let writer = guard.as_mut().ok_or_else(not_connected)?;

        let mut out = BytesMut::with_capacity(line.len() + 2);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");

        trace!(line, "Sending raw line");
        let mut closed_rx = self.closed.subscribe();
        let written = tokio::select! {
            biased;
            _ = closed_rx.wait_for(|closed| *closed) => Err(not_connected()),
            written = write_flushed(writer, &out) => written,
        };

        // Closed while we held the half: nobody else can drop it
        if self.is_closed() && guard.take().is_some() {
            debug!("Dropped outbound half after close");
        }
        written
    }

    /// Close without waiting. Later sends fail with `NotConnected`.
    ///
    /// If a sender is mid-write it abandons the write and drops the half
    /// itself; otherwise the half is dropped here.
    pub fn close(&self) {
        self.closed.send_replace(true);
        if let Ok(mut guard) = self.inner.try_lock() {
            guard.take();
        }
    }

    /// Close and shut down the outbound half gracefully when it is free.
    ///
    /// Idempotent and never waits on a sender stuck mid-write.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.closed.send_replace(true);
        let taken = match self.inner.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                debug!("Writer busy at shutdown, sender will drop the half");
                None
            }
        };

        match taken {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    /// Check if the writer was closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

async fn write_flushed<W>(writer: &mut W, out: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(out).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_appends_crlf() {
        let mock = tokio_test::io::Builder::new()
            .write(b"NICK bob\r\n")
            .write(b"USER bob 8 * :Bob\r\n")
            .build();
        let writer = RawLineWriter::new(mock);

        writer.send_raw_line("NICK bob").await.unwrap();
        writer.clone().send_raw_line("USER bob 8 * :Bob").await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (client, mut server) = tokio::io::duplex(256);
        let writer = RawLineWriter::new(client);

        writer.send_raw_line("QUIT").await.unwrap();
        writer.shutdown().await.unwrap();
        writer.shutdown().await.unwrap();
        assert!(writer.is_closed());

        let err = writer.send_raw_line("PING 1").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "QUIT\r\n");
    }

    #[tokio::test]
    async fn test_shutdown_releases_stuck_sender() {
        // Peer never reads, so the send blocks after four bytes
        let (client, mut server) = tokio::io::duplex(4);
        let writer = RawLineWriter::new(client);

        let stuck = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.send_raw_line("PRIVMSG #x :long line").await })
        };
        tokio::task::yield_now().await;
        assert!(!stuck.is_finished());

        tokio::time::timeout(Duration::from_secs(1), writer.shutdown())
            .await
            .expect("shutdown waited on the sender")
            .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), stuck)
            .await
            .expect("sender still blocked")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let err = writer.send_raw_line("PING 1").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        // The half was dropped: peer sees the partial write, then EOF
        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"PRIV");
    }

    #[tokio::test]
    async fn test_close_without_runtime_wait() {
        let (client, mut server) = tokio::io::duplex(64);
        let writer = RawLineWriter::new(client);

        writer.close();
        writer.close();
        assert!(writer.is_closed());
        assert!(writer.send_raw_line("JOIN #x").await.is_err());

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }
}
