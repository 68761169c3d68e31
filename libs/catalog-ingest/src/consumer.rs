use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use catalog_api::BoxFuture;

use crate::error::IngestError;
use crate::event::InboundMessage;

// ═══════════════════════════════════════════════════════════════
//  EventConsumer
// ═══════════════════════════════════════════════════════════════

/// Pull side of an event stream.
pub trait EventConsumer: Send {
    /// Next message, or `None` when nothing arrived within `timeout`.
    /// `Err(IngestError::Closed)` once the stream has ended for good.
    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, Result<Option<InboundMessage>, IngestError>>;

    /// Mark a message as handled.
    fn ack(&mut self, message: &InboundMessage) -> BoxFuture<'_, Result<(), IngestError>>;

    /// Release the underlying connection.
    fn close(&mut self) -> BoxFuture<'_, Result<(), IngestError>>;
}

// ═══════════════════════════════════════════════════════════════
//  ChannelConsumer
// ═══════════════════════════════════════════════════════════════

/// Consumer fed through a tokio mpsc channel.
pub struct ChannelConsumer {
    rx: mpsc::Receiver<InboundMessage>,
    acked: Arc<AtomicU64>,
    /// Messages still buffered when the consumer was closed.
    dropped: u64,
}

/// A bounded channel and the consumer reading from it.
pub fn channel_consumer(capacity: usize) -> (mpsc::Sender<InboundMessage>, ChannelConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelConsumer { rx, acked: Arc::new(AtomicU64::new(0)), dropped: 0 })
}

impl ChannelConsumer {
    /// Shared count of acknowledged messages.
    pub fn ack_counter(&self) -> Arc<AtomicU64> {
        self.acked.clone()
    }

    /// Buffered messages discarded by `close`. Nothing acknowledges them to
    /// the sender.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventConsumer for ChannelConsumer {
    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, Result<Option<InboundMessage>, IngestError>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Err(_elapsed) => Ok(None),
                Ok(Some(message)) => Ok(Some(message)),
                Ok(None) => Err(IngestError::Closed),
            }
        })
    }

    fn ack(&mut self, _message: &InboundMessage) -> BoxFuture<'_, Result<(), IngestError>> {
        self.acked.fetch_add(1, Ordering::Relaxed);
        Box::pin(async { Ok(()) })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), IngestError>> {
        self.rx.close();
        while self.rx.try_recv().is_ok() {
            self.dropped += 1;
        }
        if self.dropped > 0 {
            tracing::warn!(dropped = self.dropped, "consumer closed with undelivered messages");
        }
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  TcpLineConsumer
// ═══════════════════════════════════════════════════════════════

/// One line of the TCP feed.
#[derive(Deserialize)]
struct WireMessage {
    topic: String,
    #[serde(default)]
    key: Option<String>,
    value: Value,
}

/// Listens on a TCP address. Each feeder sends newline-delimited JSON
/// `{"topic", "key"?, "value"}`; `value` is the event envelope, inline or
/// as a string. Lines longer than `max_line_length` bytes are dropped.
pub struct TcpLineConsumer {
    local_addr: SocketAddr,
    inner: ChannelConsumer,
    token: CancellationToken,
}

impl TcpLineConsumer {
    pub async fn bind(addr: &str, max_line_length: usize, buffer: usize) -> Result<Self, IngestError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "ingest listener started");

        let (tx, inner) = channel_consumer(buffer);
        let token = CancellationToken::new();
        tokio::spawn(accept_loop(listener, tx, max_line_length, token.clone()));

        Ok(Self { local_addr, inner, token })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl EventConsumer for TcpLineConsumer {
    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, Result<Option<InboundMessage>, IngestError>> {
        self.inner.poll(timeout)
    }

    fn ack(&mut self, message: &InboundMessage) -> BoxFuture<'_, Result<(), IngestError>> {
        self.inner.ack(message)
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), IngestError>> {
        self.token.cancel();
        Box::pin(async move {
            self.inner.close().await?;
            tracing::info!(addr = %self.local_addr, dropped = self.inner.dropped(), "ingest listener stopped");
            Ok(())
        })
    }
}

impl Drop for TcpLineConsumer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<InboundMessage>,
    max_line_length: usize,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "feeder connected");
                    let tx = tx.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = read_feed(stream, &tx, max_line_length) => {}
                            _ = token.cancelled() => {}
                        }
                        tracing::info!(%peer, "feeder disconnected");
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            _ = token.cancelled() => break,
        }
    }
}

async fn read_feed(stream: TcpStream, tx: &mpsc::Sender<InboundMessage>, max_line_length: usize) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(4096);
    loop {
        line.clear();
        match read_line_limited(&mut reader, &mut line, max_line_length).await {
            Ok(LineRead::Eof) => return,
            Ok(LineRead::TooLong(len)) => {
                tracing::warn!(len, max = max_line_length, "line too long, dropped");
            }
            Ok(LineRead::Line) => {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match parse_wire(&line) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed feed line, skipping"),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "read error");
                return;
            }
        }
    }
}

fn parse_wire(line: &[u8]) -> Result<InboundMessage, serde_json::Error> {
    let wire: WireMessage = serde_json::from_slice(line)?;
    let value = match wire.value {
        Value::String(s) => s.into_bytes(),
        other => serde_json::to_vec(&other)?,
    };
    Ok(InboundMessage { topic: wire.topic, key: wire.key, value })
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    /// Line exceeded the limit and was discarded; carries its length.
    TooLong(usize),
    Eof,
}

/// Read one `\n`-terminated line into `buf` without `\n` / `\r\n`,
/// buffering at most `max` bytes. `max == 0` disables the limit.
async fn read_line_limited<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut discarded = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if discarded > 0 {
                return Ok(LineRead::TooLong(discarded));
            }
            return Ok(if buf.is_empty() { LineRead::Eof } else { LineRead::Line });
        }

        let (chunk, consumed, done) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (&available[..pos], pos + 1, true),
            None => (available, available.len(), false),
        };

        if discarded > 0 || (max > 0 && buf.len() + chunk.len() > max) {
            discarded += buf.len() + chunk.len();
            buf.clear();
        } else {
            buf.extend_from_slice(chunk);
        }
        reader.consume(consumed);

        if done {
            if discarded > 0 {
                return Ok(LineRead::TooLong(discarded));
            }
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            return Ok(LineRead::Line);
        }
    }
}
