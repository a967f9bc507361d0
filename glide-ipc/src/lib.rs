//! # glide-ipc
//!
//! Client engine multiplexing many concurrent requests over one stream to
//! the glide core.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► GlideClient ──► PendingCalls (id + reply slot)
//!                 │
//!                 ▼
//!           BufferedWriter ──► [varint len][CommandRequest] ──► core
//!                                                                │
//! caller ◄── ReplyFuture ◄── Demultiplexer ◄── [varint len][Response]
//!                                 │
//!                                 └──► PushDispatcher (pub/sub)
//! ```
//!
//! - [`PendingCalls`]: correlation ids and single-assignment reply slots
//! - [`BufferedWriter`]: try-acquire flush right, batched ordered writes
//! - [`Demultiplexer`]: the single stream reader, routes every frame
//! - [`PushDispatcher`]: callback or pull delivery of push messages
//! - [`GlideClient`]: lifecycle, handshake, and the request API
//!
//! Replies may arrive in any order; the correlation id is the only link
//! between a request and its reply.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Connection manager and public API.
pub mod client;

/// Client configuration.
pub mod config;

/// Stream demultiplexer.
pub mod demux;

/// Client error types.
pub mod error;

/// Pending-call table.
pub mod pending;

/// Push dispatcher.
pub mod pubsub;

/// Request envelope builders.
pub mod request;

/// Buffered writer.
pub mod writer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{ConnectionState, GlideClient};
pub use config::{
    BackoffStrategy, ClientConfig, NodeAddress, ProtocolVersion, PubSubChannelModes,
    PubSubContext, PubSubSubscriptions, PushCallback, ReadFrom, ServerCredentials,
};
pub use demux::Demultiplexer;
pub use error::{ClientError, ClientResult, RequestErrorKind};
pub use pending::{PendingCalls, ReplyFuture};
pub use pubsub::{PushDispatcher, PushMessage};
pub use request::{ClusterScanCursor, RequestEncoder, Route, ScanOptions, SlotType};
pub use writer::{BufferedWriter, Outbound};

pub use glide_ipc_core::{proto::RequestType, CoreConnector, HandleRegistry, HandleStore, Value};
