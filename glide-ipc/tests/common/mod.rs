//! In-memory stand-in for the core used by the integration tests.
//!
//! The client side gets one end of a `tokio::io::duplex` pipe through
//! [`FakeConnector`]; the test drives the other end through [`CoreSide`],
//! reading request envelopes and writing responses frame by frame.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use glide_ipc::{ClientConfig, GlideClient};
use glide_ipc_core::frame::{encode_delimited, FrameDecoder};
use glide_ipc_core::{proto, CoreConnector, HandleRegistry, ListenerCallback, PushKind, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

/// Address reported by the fake listener.
pub const FAKE_ADDRESS: &str = "fake-core";

/// How the fake connector behaves.
#[derive(Debug, Clone, Default)]
pub enum ConnectBehavior {
    /// Hand out a working pipe.
    #[default]
    Accept,
    /// Report this error from the listener callback.
    ListenerError(String),
    /// Never complete the connect call.
    Hang,
}

/// Connector handing the client one end of an in-memory pipe.
pub struct FakeConnector {
    behavior: ConnectBehavior,
    server_end: Mutex<Option<oneshot::Sender<DuplexStream>>>,
}

impl FakeConnector {
    /// Create a connector and the receiver for the core end of the pipe.
    pub fn new(behavior: ConnectBehavior) -> (Self, oneshot::Receiver<DuplexStream>) {
        let (tx, rx) = oneshot::channel();
        let connector = Self {
            behavior,
            server_end: Mutex::new(Some(tx)),
        };
        (connector, rx)
    }
}

#[async_trait]
impl CoreConnector for FakeConnector {
    type Stream = DuplexStream;

    fn start_listener(&self, on_ready: ListenerCallback) {
        match &self.behavior {
            ConnectBehavior::ListenerError(message) => on_ready(Err(message.clone())),
            _ => on_ready(Ok(FAKE_ADDRESS.to_string())),
        }
    }

    async fn connect(&self, address: &str) -> io::Result<DuplexStream> {
        assert_eq!(address, FAKE_ADDRESS);
        if matches!(self.behavior, ConnectBehavior::Hang) {
            std::future::pending::<()>().await;
        }

        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let sender = self.server_end.lock().expect("lock").take();
        match sender {
            Some(sender) => {
                let _ = sender.send(server_end);
                Ok(client_end)
            }
            None => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "fake core accepts one connection",
            )),
        }
    }
}

/// The core's end of the pipe.
pub struct CoreSide {
    stream: DuplexStream,
    decoder: FrameDecoder,
    /// Handle registry shared with the client.
    pub registry: Arc<HandleRegistry>,
}

impl CoreSide {
    /// Wrap the core end of a pipe.
    pub fn new(stream: DuplexStream, registry: Arc<HandleRegistry>) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::default(),
            registry,
        }
    }

    async fn read_frame<M: prost::Message + Default>(&mut self) -> Option<M> {
        loop {
            if let Some(frame) = self.decoder.next_frame::<M>().expect("decode") {
                return Some(frame);
            }
            let n = self
                .stream
                .read_buf(self.decoder.buffer_mut(4096))
                .await
                .expect("read");
            if n == 0 {
                return None;
            }
        }
    }

    /// Read the handshake envelope.
    pub async fn read_connection_request(&mut self) -> proto::ConnectionRequest {
        self.read_frame().await.expect("connection request")
    }

    /// Read the next request envelope.
    pub async fn read_command(&mut self) -> proto::CommandRequest {
        self.read_frame().await.expect("command request")
    }

    /// Read `n` request envelopes.
    pub async fn read_commands(&mut self, n: usize) -> Vec<proto::CommandRequest> {
        let mut requests = Vec::with_capacity(n);
        for _ in 0..n {
            requests.push(self.read_command().await);
        }
        requests
    }

    /// Wait until the client closes its write half.
    pub async fn expect_eof(&mut self) {
        let frame: Option<proto::CommandRequest> = self.read_frame().await;
        assert!(frame.is_none(), "unexpected request {frame:?}");
    }

    fn encode(responses: &[proto::Response]) -> BytesMut {
        let mut buf = BytesMut::new();
        for response in responses {
            encode_delimited(response, &mut buf);
        }
        buf
    }

    /// Write responses in one chunk.
    pub async fn send(&mut self, responses: &[proto::Response]) {
        let buf = Self::encode(responses);
        self.stream.write_all(&buf).await.expect("write");
    }

    /// Write responses one byte at a time.
    pub async fn send_bytewise(&mut self, responses: &[proto::Response]) {
        let buf = Self::encode(responses);
        for byte in buf.iter() {
            self.stream
                .write_all(std::slice::from_ref(byte))
                .await
                .expect("write");
            tokio::task::yield_now().await;
        }
    }

    /// Response carrying `value` by handle.
    pub fn value_reply(&self, callback_idx: u32, value: Value) -> proto::Response {
        reply(
            callback_idx,
            proto::response::Payload::RespPointer(self.registry.store_value(value)),
        )
    }

    /// Push frame carrying `value` by handle.
    pub fn push_frame(&self, value: Value) -> proto::Response {
        proto::Response {
            callback_idx: 0,
            payload: Some(proto::response::Payload::RespPointer(
                self.registry.store_value(value),
            )),
            is_push: true,
        }
    }

    /// Write the `OK` constant for `callback_idx`.
    pub async fn reply_ok(&mut self, callback_idx: u32) {
        self.send(&[ok(callback_idx)]).await;
    }

    /// Drop the pipe, as a crashing core would.
    pub fn hang_up(self) {}
}

/// Response with the given payload.
pub fn reply(callback_idx: u32, payload: proto::response::Payload) -> proto::Response {
    proto::Response {
        callback_idx,
        payload: Some(payload),
        is_push: false,
    }
}

/// `OK` constant response.
pub fn ok(callback_idx: u32) -> proto::Response {
    reply(
        callback_idx,
        proto::response::Payload::ConstantResponse(proto::ConstantResponse::Ok as i32),
    )
}

/// Request-level error response.
pub fn request_error(
    callback_idx: u32,
    kind: proto::RequestErrorType,
    message: &str,
) -> proto::Response {
    reply(
        callback_idx,
        proto::response::Payload::RequestError(proto::RequestError {
            r#type: kind as i32,
            message: message.to_string(),
        }),
    )
}

/// Push value for a message on `channel`.
pub fn channel_message(channel: &str, message: &str) -> Value {
    Value::Push {
        kind: PushKind::Message,
        data: vec![Value::from(channel), Value::from(message)],
    }
}

/// Install a test subscriber once; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start connecting, play the core's side of the handshake, and return both ends.
pub async fn connect_pair(config: ClientConfig) -> (GlideClient, CoreSide) {
    init_tracing();
    let registry = Arc::new(HandleRegistry::new());
    let (connector, server_end) = FakeConnector::new(ConnectBehavior::Accept);

    let connecting = tokio::spawn({
        let registry = registry.clone();
        async move { GlideClient::connect(config, &connector, registry).await }
    });

    let mut core = CoreSide::new(server_end.await.expect("server end"), registry);
    let _ = core.read_connection_request().await;
    core.reply_ok(0).await;

    let client = connecting.await.expect("connect task").expect("connect");
    (client, core)
}
