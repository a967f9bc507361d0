//! Connection manager and the public client API.
//!
//! Lifecycle: [`ConnectionState::Connecting`] → [`ConnectionState::Ready`] →
//! [`ConnectionState::Closing`] → [`ConnectionState::Closed`]. Transitions
//! only move forward. A client becomes observable only once the handshake
//! succeeded, and every call made after closing starts fails immediately
//! without touching the stream.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use glide_ipc_core::proto::{command_request, CommandRequest, RequestType};
use glide_ipc_core::{CoreConnector, HandleStore, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, ServerCredentials};
use crate::demux::Demultiplexer;
use crate::error::{ClientError, ClientResult, CLOSED_CLIENT_MESSAGE};
use crate::pending::PendingCalls;
use crate::pubsub::{PushDispatcher, PushMessage};
use crate::request::{self, ClusterScanCursor, RequestEncoder, Route, ScanOptions};
use crate::writer::BufferedWriter;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Stream not open yet, or handshake in progress.
    Connecting,
    /// Handshake done; requests are accepted.
    Ready,
    /// Shutdown started; new requests are rejected.
    Closing,
    /// Terminal. Every pending call has been failed.
    Closed,
}

impl ConnectionState {
    /// Whether shutdown has started.
    pub fn is_closing(&self) -> bool {
        *self >= ConnectionState::Closing
    }
}

struct ClientInner {
    pending: Arc<PendingCalls>,
    dispatcher: Arc<PushDispatcher>,
    writer: BufferedWriter,
    encoder: RequestEncoder,
    handles: Arc<dyn HandleStore>,
    state: watch::Sender<ConnectionState>,
    credentials: Mutex<Option<ServerCredentials>>,
    demux_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn credentials(&self) -> MutexGuard<'_, Option<ServerCredentials>> {
        self.credentials.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `Closing`, fail all outstanding work with `cause`, close the
    /// write half, then move to `Closed`.
    ///
    /// Returns `false` if shutdown had already started.
    async fn teardown(&self, cause: &ClientError) -> bool {
        let started = self.state.send_if_modified(|state| {
            if state.is_closing() {
                return false;
            }
            *state = ConnectionState::Closing;
            true
        });
        if !started {
            return false;
        }

        let calls = self.pending.fail_all(cause);
        let waiters = self.dispatcher.fail_waiters(cause);
        tracing::debug!(calls, waiters, error = %cause, "failed outstanding requests");

        self.writer.shutdown().await;
        self.state.send_replace(ConnectionState::Closed);
        true
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let task = self
            .demux_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Client multiplexing requests over one connection to the core.
///
/// Cheap to clone; all clones share the connection.
#[derive(Clone)]
pub struct GlideClient {
    inner: Arc<ClientInner>,
}

impl GlideClient {
    /// Start the core listener, connect to it and run the handshake.
    ///
    /// Reaching the socket is bounded by [`ClientConfig::connect_timeout`].
    /// Every setup failure is reported as [`ClientError::Closing`].
    pub async fn connect<C: CoreConnector>(
        config: ClientConfig,
        connector: &C,
        handles: Arc<dyn HandleStore>,
    ) -> ClientResult<Self> {
        let address = start_listener(connector).await?;
        tracing::debug!(%address, "core listener ready");

        let stream = match tokio::time::timeout(config.connect_timeout, connector.connect(&address))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::Closing(format!(
                    "failed to connect to {address}: {e}"
                )))
            }
            Err(_) => {
                return Err(ClientError::Closing(format!(
                    "timed out after {:?} connecting to {address}",
                    config.connect_timeout
                )))
            }
        };

        Self::from_stream(config, stream, handles).await
    }

    /// Run the handshake over an already open stream.
    pub async fn from_stream<S>(
        config: ClientConfig,
        stream: S,
        handles: Arc<dyn HandleStore>,
    ) -> ClientResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending = Arc::new(PendingCalls::new());
        let dispatcher = Arc::new(PushDispatcher::new(config.pubsub.as_ref(), handles.clone()));
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);

        let demux = Demultiplexer::new(
            pending.clone(),
            dispatcher.clone(),
            handles.clone(),
            config.read_buffer_size,
            config.max_frame_size,
        );

        let writer = BufferedWriter::new(Box::new(write_half));
        let write_failure = writer.failure();

        let inner = Arc::new(ClientInner {
            pending,
            dispatcher,
            writer,
            encoder: RequestEncoder::new(handles.clone(), config.max_inline_args_len),
            handles,
            state,
            credentials: Mutex::new(config.credentials.clone()),
            demux_task: Mutex::new(None),
        });

        let task = tokio::spawn(supervise(
            Arc::downgrade(&inner),
            demux.run(read_half, state_rx),
            write_failure,
        ));
        *inner.demux_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        let client = Self { inner };
        if let Err(cause) = client.handshake(&config).await {
            client.shutdown(&cause).await;
            return Err(cause);
        }

        client.inner.state.send_if_modified(|state| {
            if *state != ConnectionState::Connecting {
                return false;
            }
            *state = ConnectionState::Ready;
            true
        });
        if client.state() != ConnectionState::Ready {
            return Err(ClientError::closed());
        }

        tracing::info!(
            cluster_mode = config.cluster_mode,
            "new connection established"
        );
        Ok(client)
    }

    async fn handshake(&self, config: &ClientConfig) -> ClientResult<()> {
        // First registration on a fresh table: the core answers on id 0.
        let (callback_idx, reply) = self.inner.pending.register()?;
        tracing::debug!(callback_idx, "sending connection request");
        self.inner.writer.submit(config.to_connection_request());

        match reply.await {
            Ok(value) if value.is_okay() => Ok(()),
            Ok(other) => Err(ClientError::Closing(format!(
                "connection setup failed: unexpected reply {other:?}"
            ))),
            Err(e) => Err(ClientError::Closing(format!("connection setup failed: {e}"))),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Number of requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Credentials currently held for this connection.
    pub fn credentials(&self) -> Option<ServerCredentials> {
        self.inner.credentials().clone()
    }

    /// Counters reported by the core.
    pub fn get_statistics(&self) -> BTreeMap<String, u64> {
        self.inner.handles.statistics()
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.state().is_closing() {
            return Err(ClientError::closed());
        }
        Ok(())
    }

    /// Submit one correlated request and wait for its reply.
    pub async fn send(
        &self,
        command: command_request::Command,
        route: Option<&Route>,
    ) -> ClientResult<Value> {
        self.ensure_open()?;
        let (callback_idx, reply) = self.inner.pending.register()?;
        let request = CommandRequest {
            callback_idx,
            command: Some(command),
            route: route.map(Route::to_proto),
        };
        self.inner.writer.submit(request);
        reply.await
    }

    /// Run a command identified by its request type.
    pub async fn execute_command(
        &self,
        request_type: RequestType,
        args: Vec<Vec<u8>>,
        route: Option<&Route>,
    ) -> ClientResult<Value> {
        self.ensure_open()?;
        let command = self.inner.encoder.single(request_type, args);
        self.send(command, route).await
    }

    /// Run an arbitrary command given as its full argument list (`["GET", "k"]`).
    pub async fn custom_command<I, A>(&self, args: I) -> ClientResult<Value>
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        let args = args.into_iter().map(Into::into).collect();
        self.execute_command(RequestType::CustomCommand, args, None)
            .await
    }

    /// Run commands atomically. The reply is an array with one entry per command.
    pub async fn execute_transaction(
        &self,
        commands: Vec<(RequestType, Vec<Vec<u8>>)>,
        route: Option<&Route>,
    ) -> ClientResult<Value> {
        self.ensure_open()?;
        let command = self.inner.encoder.transaction(commands);
        self.send(command, route).await
    }

    /// Invoke a loaded script by hash.
    pub async fn invoke_script(
        &self,
        hash: &str,
        keys: Vec<Vec<u8>>,
        args: Vec<Vec<u8>>,
        route: Option<&Route>,
    ) -> ClientResult<Value> {
        self.ensure_open()?;
        let command = self.inner.encoder.script(hash, keys, args);
        self.send(command, route).await
    }

    /// Replace the password the core uses when (re)connecting.
    ///
    /// With `immediate_auth` the core also re-authenticates existing
    /// connections. On an `OK` reply the locally held credentials follow.
    pub async fn update_connection_password(
        &self,
        password: Option<String>,
        immediate_auth: bool,
    ) -> ClientResult<Value> {
        let reply = self
            .send(
                request::update_password(password.clone(), immediate_auth),
                None,
            )
            .await?;

        if reply.is_okay() {
            let password = password.unwrap_or_default();
            let mut credentials = self.inner.credentials();
            match credentials.as_mut() {
                Some(credentials) => credentials.password = password,
                None => *credentials = Some(ServerCredentials::new(password, None)),
            }
        }
        Ok(reply)
    }

    /// Remove the password the core uses when reconnecting.
    pub async fn reset_connection_password(&self) -> ClientResult<Value> {
        self.update_connection_password(None, false).await
    }

    /// Run one step of a cluster-wide scan.
    ///
    /// Pass the returned cursor to the next call until
    /// [`ClusterScanCursor::is_finished`].
    pub async fn cluster_scan(
        &self,
        cursor: &ClusterScanCursor,
        options: &ScanOptions,
    ) -> ClientResult<(ClusterScanCursor, Vec<Value>)> {
        let reply = self
            .send(request::cluster_scan(cursor, options), None)
            .await?;
        request::parse_scan_reply(reply)
    }

    /// Pop the next queued pub/sub message without waiting.
    pub fn try_get_pubsub_message(&self) -> ClientResult<Option<PushMessage>> {
        self.ensure_open()?;
        self.inner.dispatcher.try_next()
    }

    /// Wait for the next pub/sub message.
    pub async fn get_pubsub_message(&self) -> ClientResult<PushMessage> {
        self.ensure_open()?;
        self.inner.dispatcher.next().await
    }

    /// Close the connection, failing every pending call with `reason`.
    ///
    /// Idempotent. Must not be called from a pub/sub callback.
    pub async fn close(&self, reason: Option<String>) {
        let cause =
            ClientError::Closing(reason.unwrap_or_else(|| CLOSED_CLIENT_MESSAGE.to_string()));
        self.shutdown(&cause).await;
    }

    async fn shutdown(&self, cause: &ClientError) {
        if self.inner.teardown(cause).await {
            tracing::info!(reason = %cause, "client closed");
        }

        let task = self
            .inner
            .demux_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::warn!(error = %e, "demultiplexer task panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for GlideClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlideClient")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

async fn start_listener<C: CoreConnector>(connector: &C) -> ClientResult<String> {
    let (tx, rx) = oneshot::channel();
    connector.start_listener(Box::new(move |result| {
        let _ = tx.send(result);
    }));

    match rx.await {
        Ok(Ok(address)) => Ok(address),
        Ok(Err(message)) => Err(ClientError::Closing(format!(
            "failed to start the core listener: {message}"
        ))),
        Err(_) => Err(ClientError::Closing(
            "core listener never reported an address".to_string(),
        )),
    }
}

/// Drive the demultiplexer and close the connection if it or the writer fails.
async fn supervise<D, W>(inner: Weak<ClientInner>, demux: D, write_failure: W)
where
    D: Future<Output = ClientResult<()>>,
    W: Future<Output = Option<String>>,
{
    let cause = tokio::select! {
        result = demux => match result {
            Ok(()) => {
                tracing::debug!("demultiplexer stopped");
                return;
            }
            Err(cause) => cause,
        },
        Some(message) = write_failure => ClientError::Closing(format!(
            "failed to write to the communication layer: {message}"
        )),
    };
    tracing::warn!(error = %cause, "closing connection");
    if let Some(inner) = inner.upgrade() {
        inner.teardown(&cause).await;
    }
}
