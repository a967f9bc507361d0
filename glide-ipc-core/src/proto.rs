//! Envelope types exchanged with the core over the socket.
//!
//! Three top-level messages travel on the stream:
//!
//! - [`ConnectionRequest`]: sent once, right after connecting, to configure
//!   the core-side connection.
//! - [`CommandRequest`]: every other request. Carries the correlation id
//!   (`callback_idx`) and one of the request shapes in
//!   [`command_request::Command`].
//! - [`Response`]: everything the core sends back, both correlated replies
//!   and unsolicited push notifications (`is_push`).
//!
//! The types are hand-written `prost` messages so no build step is needed.
//! Tags are part of the wire contract and must not be renumbered.

// Derived accessors for enumeration fields are generated without docs.
#![allow(missing_docs)]

use std::collections::HashMap;

// =============================================================================
// Command requests
// =============================================================================

/// Routing hint for requests that do not target a single slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SimpleRoutes {
    AllNodes = 0,
    AllPrimaries = 1,
    Random = 2,
}

/// Which copy of a slot a routed request should reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SlotTypes {
    Primary = 0,
    Replica = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SlotIdRoute {
    #[prost(enumeration = "SlotTypes", tag = "1")]
    pub slot_type: i32,
    #[prost(int32, tag = "2")]
    pub slot_id: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SlotKeyRoute {
    #[prost(enumeration = "SlotTypes", tag = "1")]
    pub slot_type: i32,
    #[prost(string, tag = "2")]
    pub slot_key: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ByAddressRoute {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Routes {
    #[prost(oneof = "routes::Value", tags = "1, 2, 3, 4")]
    pub value: Option<routes::Value>,
}

pub mod routes {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        #[prost(enumeration = "super::SimpleRoutes", tag = "1")]
        SimpleRoutes(i32),
        #[prost(message, tag = "2")]
        SlotKeyRoute(super::SlotKeyRoute),
        #[prost(message, tag = "3")]
        SlotIdRoute(super::SlotIdRoute),
        #[prost(message, tag = "4")]
        ByAddressRoute(super::ByAddressRoute),
    }
}

/// Command identifiers understood by the core.
///
/// Only the identifiers the client itself needs are listed; everything else
/// goes through [`RequestType::CustomCommand`] with the command name as the
/// first argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestType {
    InvalidRequest = 0,
    CustomCommand = 1,
    Ping = 2,
    Get = 3,
    Set = 4,
    Publish = 5,
    SPublish = 6,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ArgsArray {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub args: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Command {
    #[prost(enumeration = "RequestType", tag = "1")]
    pub request_type: i32,
    #[prost(oneof = "command::Args", tags = "2, 3")]
    pub args: Option<command::Args>,
}

pub mod command {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Args {
        /// Arguments sent inline.
        #[prost(message, tag = "2")]
        ArgsArray(super::ArgsArray),
        /// Handle to an argument list handed to the core out of band.
        #[prost(uint64, tag = "3")]
        ArgsVecPointer(u64),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Transaction {
    #[prost(message, repeated, tag = "1")]
    pub commands: Vec<Command>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ScriptInvocation {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub keys: Vec<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub args: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ScriptInvocationPointers {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(uint64, optional, tag = "2")]
    pub keys_pointer: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub args_pointer: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClusterScan {
    #[prost(string, tag = "1")]
    pub cursor: String,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub match_pattern: Option<Vec<u8>>,
    #[prost(int64, optional, tag = "3")]
    pub count: Option<i64>,
    #[prost(string, optional, tag = "4")]
    pub object_type: Option<String>,
    #[prost(bool, tag = "5")]
    pub allow_non_covered_slots: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateConnectionPassword {
    #[prost(string, optional, tag = "1")]
    pub password: Option<String>,
    #[prost(bool, tag = "2")]
    pub immediate_auth: bool,
}

/// A correlated request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommandRequest {
    #[prost(uint32, tag = "1")]
    pub callback_idx: u32,
    #[prost(oneof = "command_request::Command", tags = "2, 3, 4, 5, 6, 7")]
    pub command: Option<command_request::Command>,
    #[prost(message, optional, tag = "8")]
    pub route: Option<Routes>,
}

pub mod command_request {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Command {
        #[prost(message, tag = "2")]
        SingleCommand(super::Command),
        #[prost(message, tag = "3")]
        Transaction(super::Transaction),
        #[prost(message, tag = "4")]
        ScriptInvocation(super::ScriptInvocation),
        #[prost(message, tag = "5")]
        ScriptInvocationPointers(super::ScriptInvocationPointers),
        #[prost(message, tag = "6")]
        ClusterScan(super::ClusterScan),
        #[prost(message, tag = "7")]
        UpdateConnectionPassword(super::UpdateConnectionPassword),
    }
}

// =============================================================================
// Connection request
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ReadFrom {
    Primary = 0,
    PreferReplica = 1,
    AzAffinity = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TlsMode {
    NoTls = 0,
    SecureTls = 1,
    InsecureTls = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Resp3 = 0,
    Resp2 = 1,
}

/// Keys of [`PubSubSubscriptions::channels_or_patterns_by_type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PubSubChannelType {
    Exact = 0,
    Pattern = 1,
    Sharded = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeAddress {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AuthenticationInfo {
    #[prost(string, tag = "1")]
    pub password: String,
    #[prost(string, tag = "2")]
    pub username: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionRetryStrategy {
    #[prost(uint32, tag = "1")]
    pub number_of_retries: u32,
    #[prost(uint32, tag = "2")]
    pub factor: u32,
    #[prost(uint32, tag = "3")]
    pub exponent_base: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PubSubChannelsOrPatterns {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub channels_or_patterns: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PubSubSubscriptions {
    #[prost(map = "uint32, message", tag = "1")]
    pub channels_or_patterns_by_type: HashMap<u32, PubSubChannelsOrPatterns>,
}

/// Handshake payload. Answered with the `OK` constant on success.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionRequest {
    #[prost(message, repeated, tag = "1")]
    pub addresses: Vec<NodeAddress>,
    #[prost(enumeration = "TlsMode", tag = "2")]
    pub tls_mode: i32,
    #[prost(bool, tag = "3")]
    pub cluster_mode_enabled: bool,
    #[prost(uint32, tag = "4")]
    pub request_timeout: u32,
    #[prost(enumeration = "ReadFrom", tag = "5")]
    pub read_from: i32,
    #[prost(message, optional, tag = "6")]
    pub connection_retry_strategy: Option<ConnectionRetryStrategy>,
    #[prost(message, optional, tag = "7")]
    pub authentication_info: Option<AuthenticationInfo>,
    #[prost(uint32, tag = "8")]
    pub database_id: u32,
    #[prost(enumeration = "ProtocolVersion", tag = "9")]
    pub protocol: i32,
    #[prost(string, tag = "10")]
    pub client_name: String,
    #[prost(message, optional, tag = "11")]
    pub pubsub_subscriptions: Option<PubSubSubscriptions>,
    #[prost(uint32, tag = "12")]
    pub inflight_requests_limit: u32,
    #[prost(string, tag = "13")]
    pub client_az: String,
}

// =============================================================================
// Responses
// =============================================================================

/// Classification of a per-request failure reported by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestErrorType {
    Unspecified = 0,
    ExecAbort = 1,
    Timeout = 2,
    Disconnect = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConstantResponse {
    Ok = 0,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RequestError {
    #[prost(enumeration = "RequestErrorType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Reply to a [`CommandRequest`] or [`ConnectionRequest`], or a push
/// notification when `is_push` is set.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(uint32, tag = "1")]
    pub callback_idx: u32,
    #[prost(oneof = "response::Payload", tags = "2, 3, 4, 5, 6")]
    pub payload: Option<response::Payload>,
    #[prost(bool, tag = "7")]
    pub is_push: bool,
}

pub mod response {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        RequestError(super::RequestError),
        /// The core is tearing the connection down.
        #[prost(string, tag = "3")]
        ClosingError(String),
        /// Handle to a value materialized by the core.
        #[prost(uint64, tag = "4")]
        RespPointer(u64),
        #[prost(enumeration = "super::ConstantResponse", tag = "5")]
        ConstantResponse(i32),
        /// Bulk string value carried inline.
        #[prost(bytes = "vec", tag = "6")]
        InlineValue(Vec<u8>),
    }
}

impl Response {
    /// Closing error carried by this frame, if any.
    pub fn closing_error(&self) -> Option<&str> {
        match &self.payload {
            Some(response::Payload::ClosingError(message)) => Some(message),
            _ => None,
        }
    }
}
