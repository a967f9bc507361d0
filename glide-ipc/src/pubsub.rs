//! Push dispatcher: delivery of pub/sub notifications.
//!
//! Push frames never correlate with a request. Each one is decoded into a
//! [`PushMessage`] and either handed to the configured callback or queued
//! for the pull accessors ([`PushDispatcher::try_next`], [`PushDispatcher::next`]).
//! Queued messages and suspended pull waiters are matched FIFO under one lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use glide_ipc_core::proto::{response, Response};
use glide_ipc_core::{HandleStore, PushKind, Value};
use tokio::sync::oneshot;

use crate::config::{PubSubContext, PubSubSubscriptions, PushCallback};
use crate::error::{ClientError, ClientResult, MALFORMED_PUSH_MESSAGE};

const NO_SUBSCRIPTIONS_MESSAGE: &str = "The operation will never complete since there was no pubsub subscriptions applied to the client.";
const CALLBACK_CONFIGURED_MESSAGE: &str = "The operation will never complete since messages will be passed to the configured callback.";

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    /// Which subscription kind produced the message.
    pub kind: PushKind,
    /// Message payload.
    pub message: Bytes,
    /// Channel the message was published to.
    pub channel: Bytes,
    /// Matching pattern, for pattern subscriptions.
    pub pattern: Option<Bytes>,
}

impl PushMessage {
    /// Decode a push value into a deliverable message.
    ///
    /// Returns `None` for notifications that carry nothing for the
    /// application: subscription confirmations, disconnects and unknown kinds.
    pub fn from_value(value: Value) -> Option<Self> {
        let (kind, data) = match value {
            Value::Push { kind, data } => (kind, data),
            other => {
                tracing::warn!(value = ?other, "push payload is not a push notification");
                return None;
            }
        };

        let field = |index: usize| data.get(index).and_then(Value::as_bytes);
        match kind {
            PushKind::Message | PushKind::ShardMessage => match (field(0), field(1)) {
                (Some(channel), Some(message)) => Some(PushMessage {
                    kind,
                    message,
                    channel,
                    pattern: None,
                }),
                _ => {
                    tracing::warn!(?kind, fields = data.len(), "push message missing fields");
                    None
                }
            },
            PushKind::PatternMessage => match (field(0), field(1), field(2)) {
                (Some(pattern), Some(channel), Some(message)) => Some(PushMessage {
                    kind,
                    message,
                    channel,
                    pattern: Some(pattern),
                }),
                _ => {
                    tracing::warn!(?kind, fields = data.len(), "push message missing fields");
                    None
                }
            },
            PushKind::Disconnection => {
                tracing::warn!("Transport disconnected, messages might be lost");
                None
            }
            PushKind::Unknown(name) => {
                tracing::warn!(kind = %name, "unknown notification message");
                None
            }
            _ => None,
        }
    }
}

type PullWaiter = oneshot::Sender<ClientResult<PushMessage>>;

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<PushMessage>,
    waiters: VecDeque<PullWaiter>,
}

impl DispatchState {
    /// Hand queued messages to waiters, oldest first on both sides.
    fn match_waiters(&mut self) {
        while !self.queue.is_empty() {
            let Some(waiter) = self.waiters.pop_front() else {
                return;
            };
            if waiter.is_closed() {
                continue;
            }
            let Some(message) = self.queue.pop_front() else {
                return;
            };
            if let Err(Ok(message)) = waiter.send(Ok(message)) {
                self.queue.push_front(message);
            }
        }
    }
}

/// Routes push frames to the callback or to pull consumers.
pub struct PushDispatcher {
    state: Mutex<DispatchState>,
    callback: Option<(PushCallback, PubSubContext)>,
    configured: bool,
    closed: AtomicBool,
    handles: Arc<dyn HandleStore>,
}

impl PushDispatcher {
    /// Create a dispatcher for the given subscription setup.
    pub fn new(pubsub: Option<&PubSubSubscriptions>, handles: Arc<dyn HandleStore>) -> Self {
        let callback = pubsub.and_then(|subs| {
            subs.callback.clone().map(|callback| {
                let context = subs
                    .context
                    .clone()
                    .unwrap_or_else(|| Arc::new(()) as PubSubContext);
                (callback, context)
            })
        });
        Self {
            state: Mutex::new(DispatchState::default()),
            callback,
            configured: pubsub.is_some(),
            closed: AtomicBool::new(false),
            handles,
        }
    }

    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept one push frame from the demultiplexer.
    ///
    /// A frame without a value handle is a protocol violation; the returned
    /// error is meant to close the connection.
    pub fn deliver(&self, frame: &Response) -> ClientResult<()> {
        let handle = match frame.payload {
            Some(response::Payload::RespPointer(handle)) => handle,
            _ => return Err(ClientError::Closing(MALFORMED_PUSH_MESSAGE.to_string())),
        };

        let message = match self.handles.value_from_handle(handle) {
            Ok(value) => PushMessage::from_value(value),
            Err(e) => {
                tracing::warn!(handle, error = %e, "failed to resolve push value");
                None
            }
        };
        let Some(message) = message else {
            return Ok(());
        };

        let mut state = self.state();
        match &self.callback {
            Some((callback, context)) => callback(message, context),
            None => {
                state.queue.push_back(message);
                state.match_waiters();
            }
        }
        Ok(())
    }

    fn check_pull_allowed(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::closed());
        }
        if !self.configured {
            return Err(ClientError::Configuration(
                NO_SUBSCRIPTIONS_MESSAGE.to_string(),
            ));
        }
        if self.callback.is_some() {
            return Err(ClientError::Configuration(
                CALLBACK_CONFIGURED_MESSAGE.to_string(),
            ));
        }
        Ok(())
    }

    /// Pop the oldest queued message without waiting.
    pub fn try_next(&self) -> ClientResult<Option<PushMessage>> {
        self.check_pull_allowed()?;
        let mut state = self.state();
        state.match_waiters();
        Ok(state.queue.pop_front())
    }

    /// Wait for the next message.
    ///
    /// Waiters are served in call order. Fails with a closing error if the
    /// connection closes first.
    pub async fn next(&self) -> ClientResult<PushMessage> {
        self.check_pull_allowed()?;
        let rx = {
            let mut state = self.state();
            // Registered under the lock so a concurrent close cannot miss us.
            if self.closed.load(Ordering::Acquire) {
                return Err(ClientError::closed());
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            state.match_waiters();
            rx
        };
        rx.await.unwrap_or_else(|_| Err(ClientError::closed()))
    }

    /// Fail every suspended waiter with `error` and refuse further pulls.
    pub fn fail_waiters(&self, error: &ClientError) -> usize {
        let waiters: Vec<PullWaiter> = {
            let mut state = self.state();
            self.closed.store(true, Ordering::Release);
            state.queue.clear();
            state.waiters.drain(..).collect()
        };
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        count
    }

    /// Number of queued messages not yet pulled.
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }
}
