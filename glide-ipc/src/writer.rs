//! Buffered writer with a try-acquire flush right.
//!
//! Any number of tasks append envelopes to a shared queue. Whoever manages to
//! take the flush right without waiting spawns a drain task, which writes the
//! queue out in batches and re-checks for entries appended meanwhile before
//! letting go. Submitters never wait on the stream, so dropping a caller's
//! future cannot cut a frame in half or strand entries queued behind it.
//!
//! A failed write stops the writer; [`BufferedWriter::failure`] reports it.
//! [`BufferedWriter::shutdown`] interrupts a flush blocked on a peer that
//! stopped reading, then closes the write half.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;
use glide_ipc_core::frame::encode_delimited;
use glide_ipc_core::proto::{CommandRequest, ConnectionRequest};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Write half of the core stream.
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// One envelope waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Handshake envelope.
    Connection(ConnectionRequest),
    /// Any correlated request.
    Command(CommandRequest),
}

impl Outbound {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Outbound::Connection(request) => encode_delimited(request, buf),
            Outbound::Command(request) => encode_delimited(request, buf),
        }
    }
}

impl From<CommandRequest> for Outbound {
    fn from(request: CommandRequest) -> Self {
        Outbound::Command(request)
    }
}

impl From<ConnectionRequest> for Outbound {
    fn from(request: ConnectionRequest) -> Self {
        Outbound::Connection(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriterStatus {
    Open,
    Closed,
    Failed(String),
}

impl WriterStatus {
    fn is_stopped(&self) -> bool {
        !matches!(self, WriterStatus::Open)
    }
}

/// Exclusive right to write to the stream, obtained without waiting.
pub struct FlushPermit {
    sink: OwnedMutexGuard<BoxedWrite>,
}

struct Shared {
    queue: Mutex<Vec<Outbound>>,
    sink: Arc<tokio::sync::Mutex<BoxedWrite>>,
    status: watch::Sender<WriterStatus>,
    sink_closed: AtomicBool,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Vec<Outbound>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_acquire(&self) -> Option<FlushPermit> {
        self.sink
            .clone()
            .try_lock_owned()
            .ok()
            .map(|sink| FlushPermit { sink })
    }

    /// Move from `Open` to `next`. Returns `false` if already stopped.
    fn stop(&self, next: WriterStatus) -> bool {
        self.status.send_if_modified(|status| {
            if status.is_stopped() {
                return false;
            }
            *status = next;
            true
        })
    }

    async fn write_batches(&self, mut permit: FlushPermit) -> io::Result<()> {
        let mut buf = BytesMut::new();
        loop {
            let batch = std::mem::take(&mut *self.queue());
            if !batch.is_empty() {
                buf.clear();
                for envelope in &batch {
                    envelope.encode(&mut buf);
                }
                tracing::trace!(envelopes = batch.len(), bytes = buf.len(), "flushing batch");
                permit.sink.write_all(&buf).await?;
                permit.sink.flush().await?;
            }

            drop(permit);
            if self.queue().is_empty() {
                return Ok(());
            }
            match self.try_acquire() {
                Some(next) => permit = next,
                // Whoever holds it now sees our leftovers.
                None => return Ok(()),
            }
        }
    }

    async fn drain(self: Arc<Self>, permit: FlushPermit) {
        let mut status = self.status.subscribe();
        let result = tokio::select! {
            biased;

            _ = stopped(&mut status) => return,
            result = self.write_batches(permit) => result,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "flush to the core failed");
            self.stop(WriterStatus::Failed(e.to_string()));
            self.queue().clear();
        }
    }
}

async fn stopped(status: &mut watch::Receiver<WriterStatus>) {
    let _ = status.wait_for(WriterStatus::is_stopped).await;
}

/// Serializes concurrent submissions into ordered batched writes.
pub struct BufferedWriter {
    shared: Arc<Shared>,
}

impl BufferedWriter {
    /// Wrap the write half of the stream.
    pub fn new(sink: BoxedWrite) -> Self {
        let (status, _) = watch::channel(WriterStatus::Open);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Vec::new()),
                sink: Arc::new(tokio::sync::Mutex::new(sink)),
                status,
                sink_closed: AtomicBool::new(false),
            }),
        }
    }

    /// Append an envelope and try to take the flush right.
    ///
    /// Returns the permit if this caller must drain; `None` if another task
    /// holds the right (and will write this entry) or the writer is stopped.
    pub fn enqueue(&self, envelope: impl Into<Outbound>) -> Option<FlushPermit> {
        if self.shared.status.borrow().is_stopped() {
            return None;
        }
        self.shared.queue().push(envelope.into());
        self.shared.try_acquire()
    }

    /// Drain the queue on a task of its own.
    pub fn spawn_drain(&self, permit: FlushPermit) -> JoinHandle<()> {
        tokio::spawn(self.shared.clone().drain(permit))
    }

    /// Enqueue and, if this caller won the flush right, start a drain.
    ///
    /// Never waits on the stream. Write errors surface through
    /// [`failure`](Self::failure).
    pub fn submit(&self, envelope: impl Into<Outbound>) {
        if let Some(permit) = self.enqueue(envelope) {
            self.spawn_drain(permit);
        }
    }

    /// Resolves with the error message once a flush fails, or with `None`
    /// once the writer is shut down.
    pub fn failure(&self) -> impl Future<Output = Option<String>> + Send + 'static {
        let mut status = self.shared.status.subscribe();
        async move {
            let status = status
                .wait_for(WriterStatus::is_stopped)
                .await
                .map(|status| (*status).clone());
            match status {
                Ok(WriterStatus::Failed(message)) => Some(message),
                _ => None,
            }
        }
    }

    /// Stop accepting envelopes, interrupt any flush in progress and close
    /// the write half.
    pub async fn shutdown(&self) {
        self.shared.stop(WriterStatus::Closed);
        self.shared.queue().clear();
        if self.shared.sink_closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Drain tasks see the status change and release the sink.
        let mut sink = self.shared.sink.lock().await;
        if let Err(e) = sink.shutdown().await {
            tracing::debug!(error = %e, "error closing stream write half");
        }
    }

    /// Number of envelopes queued and not yet written.
    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        self.shared.stop(WriterStatus::Closed);
    }
}
