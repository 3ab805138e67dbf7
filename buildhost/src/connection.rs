//! Multiplexed JSON-RPC connection over a pair of byte streams.
//!
//! One writer task owns the outgoing stream and one reader task owns the
//! incoming stream. Requests from any number of callers are matched to their
//! responses by id, so callers never serialize against each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::RpcError;
use crate::protocol::{self, IncomingFrame, LogParams, RemoteError, Request};

const WRITER_CHANNEL_CAPACITY: usize = 64;

type Responder = oneshot::Sender<Result<Value, RemoteError>>;

enum WriterCommand {
    Send(Value),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Responder>>,
    /// Set by the reader task before it drops every pending responder.
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Responder>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Removes its pending entry when the request completes, times out, or the
/// caller's future is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    fn insert(shared: &'a Shared, id: u64, responder: Responder) -> Self {
        shared.pending().insert(id, responder);
        Self { shared, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

pub struct RpcConnection {
    label: String,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    request_timeout: Duration,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl RpcConnection {
    /// Attach to `reader`/`writer`. `label` tags every log line for this peer.
    pub fn start<R, W>(
        label: impl Into<String>,
        reader: R,
        writer: W,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let shared = Arc::new(Shared::default());

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_label = label.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(host = %writer_label, "build host write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let reader_writer_tx = writer_tx.clone();
        let reader_label = label.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(&frame, &reader_shared, &reader_writer_tx, &reader_label)
                            .await;
                    }
                    Ok(None) => {
                        tracing::debug!(host = %reader_label, "build host closed its output stream");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(host = %reader_label, "build host reader error: {e}");
                        break;
                    }
                }
            }
            reader_shared.close();
        });

        Self {
            label,
            writer_tx,
            next_id: AtomicU64::new(1),
            shared,
            request_timeout,
            reader_handle,
            writer_handle,
        }
    }

    async fn dispatch_frame(
        frame: &Value,
        shared: &Shared,
        writer_tx: &mpsc::Sender<WriterCommand>,
        label: &str,
    ) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!(host = %label, "ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, outcome } => {
                let responder = shared.pending().remove(&id);
                match responder {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => tracing::trace!(host = %label, id, "response for abandoned request"),
                }
            }
            IncomingFrame::HostRequest { id, method } => {
                tracing::debug!(host = %label, %method, "build host sent a request; replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method, params } => {
                Self::handle_notification(label, &method, params);
            }
        }
    }

    fn handle_notification(label: &str, method: &str, params: Option<Value>) {
        if method != protocol::LOG_NOTIFICATION {
            tracing::trace!(host = %label, %method, "ignoring notification");
            return;
        }
        let Some(params) = params.and_then(|p| serde_json::from_value::<LogParams>(p).ok()) else {
            return;
        };
        match params.level.as_deref() {
            Some("error") => tracing::error!(host = %label, "{}", params.message),
            Some("warning" | "warn") => tracing::warn!(host = %label, "{}", params.message),
            Some("info" | "information") => tracing::info!(host = %label, "{}", params.message),
            _ => tracing::debug!(host = %label, "{}", params.message),
        }
    }

    /// Send `method` and wait for its result.
    ///
    /// Dropping the returned future abandons the wait without disturbing the
    /// peer; a late response is discarded.
    pub async fn request<P, T>(&self, method: &str, params: Option<P>) -> Result<T, RpcError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard::insert(&self.shared, id, tx);
        if self.shared.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }

        let frame =
            serde_json::to_value(Request::new(id, method, params)).map_err(RpcError::Serialization)?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| RpcError::ConnectionClosed)?;

        let outcome = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(RpcError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(host = %self.label, %method, id, "request timed out");
                return Err(RpcError::Timeout {
                    method: method.to_string(),
                    after: self.request_timeout,
                });
            }
        };

        let value = outcome.map_err(RpcError::Remote)?;
        serde_json::from_value(value).map_err(|source| RpcError::InvalidResponse {
            method: method.to_string(),
            source,
        })
    }

    /// Whether the peer's output stream has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stop writing. Pending requests fail once the peer closes its side.
    pub async fn close(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
