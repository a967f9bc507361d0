//! Narrow interfaces to the command engine ("core") the client talks to.
//!
//! The client never links against the core directly. It needs exactly four
//! things from it, split over two traits:
//!
//! - [`CoreConnector`]: start the core's socket listener and connect to it.
//! - [`HandleStore`]: resolve reply handles into [`Value`]s, hand large
//!   argument lists over out of band and report core counters.

use std::collections::BTreeMap;
use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::value::Value;

/// Callback invoked exactly once with the listener address or a failure message.
pub type ListenerCallback = Box<dyn FnOnce(Result<String, String>) + Send + 'static>;

/// Errors resolving or storing handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// No entry exists for this handle (never issued, or already consumed).
    #[error("unknown handle: {0}")]
    Unknown(u64),

    /// The handle exists but refers to another kind of entry.
    #[error("handle {handle} does not refer to {expected}")]
    WrongKind {
        /// The handle that was looked up.
        handle: u64,
        /// What the caller expected to find.
        expected: &'static str,
    },
}

/// Provider trait for reaching the core's socket.
#[async_trait]
pub trait CoreConnector: Send + Sync + 'static {
    /// The duplex byte stream type for this connector.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Start (or locate) the core's listener.
    ///
    /// `on_ready` must be called exactly once, with the address to connect
    /// to or a description of why the listener could not be started.
    fn start_listener(&self, on_ready: ListenerCallback);

    /// Connect to an address previously reported by [`start_listener`](Self::start_listener).
    async fn connect(&self, address: &str) -> io::Result<Self::Stream>;
}

/// Out-of-band value exchange with the core.
pub trait HandleStore: Send + Sync + 'static {
    /// Materialize the value behind a reply handle.
    ///
    /// Handles are single use: resolving one consumes it.
    fn value_from_handle(&self, handle: u64) -> Result<Value, HandleError>;

    /// Hand an argument list to the core and return a handle for it.
    fn store_args(&self, args: Vec<Vec<u8>>) -> u64;

    /// Named counters the core keeps about itself.
    fn statistics(&self) -> BTreeMap<String, u64> {
        BTreeMap::new()
    }
}

/// Connector for a core already listening on a Unix domain socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixSocketConnector {
    socket_path: PathBuf,
}

#[cfg(unix)]
impl UnixSocketConnector {
    /// Create a connector for the socket at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl CoreConnector for UnixSocketConnector {
    type Stream = tokio::net::UnixStream;

    fn start_listener(&self, on_ready: ListenerCallback) {
        match self.socket_path.to_str() {
            Some(path) => on_ready(Ok(path.to_string())),
            None => on_ready(Err(format!(
                "socket path is not valid UTF-8: {}",
                self.socket_path.display()
            ))),
        }
    }

    async fn connect(&self, address: &str) -> io::Result<Self::Stream> {
        tokio::net::UnixStream::connect(address).await
    }
}
