//! Stream demultiplexer: the single reader of the core stream.
//!
//! Reads chunks, decodes every complete frame, and routes it:
//! - push frames go to the [`PushDispatcher`]
//! - everything else resolves the pending call named by `callback_idx`
//!
//! Bytes of a frame that is not complete yet stay in the decoder until the
//! next read. The loop ends cleanly once the connection is closing, and with
//! a [`ClientError::Closing`] on EOF or on any protocol violation.

use std::sync::Arc;

use glide_ipc_core::frame::FrameDecoder;
use glide_ipc_core::proto::{response, Response};
use glide_ipc_core::{HandleStore, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::client::ConnectionState;
use crate::error::{ClientError, ClientResult, RequestErrorKind, UNEXPECTED_EOF_MESSAGE};
use crate::pending::PendingCalls;
use crate::pubsub::PushDispatcher;

/// Routes decoded frames to pending calls and the push dispatcher.
pub struct Demultiplexer {
    pending: Arc<PendingCalls>,
    dispatcher: Arc<PushDispatcher>,
    handles: Arc<dyn HandleStore>,
    decoder: FrameDecoder,
    read_buffer_size: usize,
}

impl Demultiplexer {
    /// Create a demultiplexer feeding the given table and dispatcher.
    pub fn new(
        pending: Arc<PendingCalls>,
        dispatcher: Arc<PushDispatcher>,
        handles: Arc<dyn HandleStore>,
        read_buffer_size: usize,
        max_frame_size: usize,
    ) -> Self {
        Self {
            pending,
            dispatcher,
            handles,
            decoder: FrameDecoder::new(max_frame_size),
            // A zero-sized read would look like EOF.
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    /// Read and route frames until the connection closes.
    ///
    /// Returns `Ok(())` when shutdown was requested through `state`, and the
    /// fatal cause otherwise.
    pub async fn run<R>(
        mut self,
        mut reader: R,
        mut state: watch::Receiver<ConnectionState>,
    ) -> ClientResult<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let read = tokio::select! {
                biased;

                changed = state.changed() => {
                    let closing = changed.is_err() || state.borrow().is_closing();
                    if closing {
                        return Ok(());
                    }
                    continue;
                }
                read = reader.read_buf(self.decoder.buffer_mut(self.read_buffer_size)) => read,
            };

            let closing = state.borrow().is_closing();
            match read {
                Ok(0) if closing => return Ok(()),
                Ok(0) => return Err(ClientError::Closing(UNEXPECTED_EOF_MESSAGE.to_string())),
                Ok(n) => tracing::trace!(bytes = n, buffered = self.decoder.remaining(), "read from core"),
                Err(_) if closing => return Ok(()),
                Err(e) => {
                    return Err(ClientError::Closing(format!(
                        "failed to read from the communication layer: {e}"
                    )))
                }
            }

            while let Some(frame) = self
                .decoder
                .next_frame::<Response>()
                .map_err(|e| ClientError::Closing(format!("malformed frame from core: {e}")))?
            {
                self.route(frame)?;
            }
        }
    }

    /// Route one decoded frame.
    pub fn route(&self, frame: Response) -> ClientResult<()> {
        if frame.is_push {
            return self.dispatcher.deliver(&frame);
        }
        self.resolve(frame)
    }

    fn resolve(&self, frame: Response) -> ClientResult<()> {
        let callback_idx = frame.callback_idx;
        let Some(sender) = self.pending.take(callback_idx) else {
            let message = match frame.closing_error() {
                Some(message) => message.to_string(),
                None => format!(
                    "Client Error - closing due to unknown error. callback index:  {callback_idx}"
                ),
            };
            return Err(ClientError::Closing(message));
        };

        let result = match frame.payload {
            Some(response::Payload::ClosingError(message)) => Err(ClientError::Closing(message)),
            Some(response::Payload::RequestError(error)) => {
                Err(ClientError::request(error.r#type, error.message))
            }
            Some(response::Payload::RespPointer(handle)) => self
                .handles
                .value_from_handle(handle)
                .map_err(|e| ClientError::Request {
                    kind: RequestErrorKind::Unspecified,
                    message: format!("failed to resolve reply value: {e}"),
                }),
            Some(response::Payload::ConstantResponse(_)) => Ok(Value::Okay),
            Some(response::Payload::InlineValue(bytes)) => Ok(Value::from(bytes)),
            None => Ok(Value::Nil),
        };

        tracing::debug!(callback_idx, ok = result.is_ok(), "reply received");
        // The caller may have stopped waiting; that is not a protocol error.
        let _ = sender.send(result);
        Ok(())
    }
}
