//! # glide-ipc-core
//!
//! Wire-level building blocks for talking to the glide core over a socket.
//!
//! This crate provides:
//!
//! - **Envelopes**: the request/response union exchanged with the core ([`proto`])
//! - **Framing**: `[varint length][envelope]` with partial-read tolerance ([`frame`])
//! - **Values**: the reply model returned by the core ([`Value`], [`PushKind`])
//! - **Bridge traits**: how the client reaches the core and exchanges
//!   out-of-band data with it ([`CoreConnector`], [`HandleStore`])
//!
//! It holds no client state; request correlation and dispatch live in the
//! `glide-ipc` crate.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Engine bridge traits.
pub mod bridge;

/// Length-delimited frame codec.
pub mod frame;

/// In-process handle registry.
pub mod handles;

/// Envelope message types.
pub mod proto;

/// Reply values.
pub mod value;

// =============================================================================
// Public API Re-exports
// =============================================================================

#[cfg(unix)]
pub use bridge::UnixSocketConnector;
pub use bridge::{CoreConnector, HandleError, HandleStore, ListenerCallback};
pub use frame::{
    decode_delimited, encode_delimited, FrameDecoder, FrameError, DEFAULT_MAX_FRAME_SIZE,
};
pub use handles::HandleRegistry;
pub use value::{PushKind, Value};
