//! Client configuration.
//!
//! [`ClientConfig`] carries two things: the settings the core needs to open
//! its server connection (sent once in the handshake), and the tunables of
//! the engine itself (connect timeout, read chunk size, inline-argument
//! threshold, frame size cap).

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use glide_ipc_core::frame::DEFAULT_MAX_FRAME_SIZE;
use glide_ipc_core::proto;
use serde::{Deserialize, Serialize};

use crate::pubsub::PushMessage;

/// Opaque value handed back to the pub/sub callback on every invocation.
pub type PubSubContext = Arc<dyn Any + Send + Sync>;

/// Callback receiving push messages when callback delivery is configured.
///
/// Runs on the demultiplexer task while the dispatcher lock is held; it must
/// not block or call back into the pub/sub accessors.
pub type PushCallback = Arc<dyn Fn(PushMessage, &PubSubContext) + Send + Sync>;

/// Address of one server node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NodeAddress {
    /// Create an address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for NodeAddress {
    fn default() -> Self {
        Self::new("localhost", 6379)
    }
}

/// Credentials used to authenticate with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCredentials {
    /// User name; `None` authenticates the default user.
    pub username: Option<String>,
    /// Password.
    pub password: String,
}

impl ServerCredentials {
    /// Create credentials.
    pub fn new(password: impl Into<String>, username: Option<String>) -> Self {
        Self {
            username,
            password: password.into(),
        }
    }
}

/// Reconnect backoff handed to the core.
///
/// Delay for attempt `n` is `factor * exponent_base^n`, capped by the core
/// after `num_of_retries` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffStrategy {
    /// Number of growing-delay retries before the delay stays constant.
    pub num_of_retries: u32,
    /// Multiplier applied to every delay.
    pub factor: u32,
    /// Exponent base.
    pub exponent_base: u32,
}

/// Which nodes serve read commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadFrom {
    /// Always read from the primary.
    #[default]
    Primary,
    /// Round robin over replicas, falling back to the primary.
    PreferReplica,
    /// Prefer replicas in the client's availability zone.
    AzAffinity,
}

impl ReadFrom {
    fn to_proto(self) -> proto::ReadFrom {
        match self {
            ReadFrom::Primary => proto::ReadFrom::Primary,
            ReadFrom::PreferReplica => proto::ReadFrom::PreferReplica,
            ReadFrom::AzAffinity => proto::ReadFrom::AzAffinity,
        }
    }
}

/// Server protocol the core should negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// RESP3, required for push notifications.
    #[default]
    Resp3,
    /// RESP2.
    Resp2,
}

/// Kind of pub/sub subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PubSubChannelModes {
    /// Exact channel name.
    Exact,
    /// Glob-style channel pattern.
    Pattern,
    /// Sharded channel (cluster mode only).
    Sharded,
}

impl PubSubChannelModes {
    fn to_proto(self) -> proto::PubSubChannelType {
        match self {
            PubSubChannelModes::Exact => proto::PubSubChannelType::Exact,
            PubSubChannelModes::Pattern => proto::PubSubChannelType::Pattern,
            PubSubChannelModes::Sharded => proto::PubSubChannelType::Sharded,
        }
    }
}

/// Subscriptions established at connect time, plus the delivery mode.
///
/// Without a callback, messages are queued and read with
/// [`GlideClient::get_pubsub_message`](crate::GlideClient::get_pubsub_message)
/// or [`GlideClient::try_get_pubsub_message`](crate::GlideClient::try_get_pubsub_message).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct PubSubSubscriptions {
    /// Channels or patterns per subscription kind.
    pub channels_and_patterns: HashMap<PubSubChannelModes, BTreeSet<Vec<u8>>>,

    /// Callback delivery; mutually exclusive with the pull accessors.
    #[serde(skip)]
    pub callback: Option<PushCallback>,

    /// Context passed to `callback`.
    #[serde(skip)]
    pub context: Option<PubSubContext>,
}

impl PubSubSubscriptions {
    /// Add a channel or pattern of the given kind.
    pub fn with_channel(mut self, mode: PubSubChannelModes, channel: impl Into<Vec<u8>>) -> Self {
        self.channels_and_patterns
            .entry(mode)
            .or_default()
            .insert(channel.into());
        self
    }

    /// Deliver messages to `callback` instead of queueing them.
    pub fn with_callback(mut self, callback: PushCallback, context: Option<PubSubContext>) -> Self {
        self.callback = Some(callback);
        self.context = context;
        self
    }

    fn to_proto(&self) -> proto::PubSubSubscriptions {
        let channels_or_patterns_by_type = self
            .channels_and_patterns
            .iter()
            .map(|(mode, channels)| {
                (
                    mode.to_proto() as u32,
                    proto::PubSubChannelsOrPatterns {
                        channels_or_patterns: channels.iter().cloned().collect(),
                    },
                )
            })
            .collect();
        proto::PubSubSubscriptions {
            channels_or_patterns_by_type,
        }
    }
}

impl fmt::Debug for PubSubSubscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubSubscriptions")
            .field("channels_and_patterns", &self.channels_and_patterns)
            .field("callback", &self.callback.is_some())
            .field("context", &self.context.is_some())
            .finish()
    }
}

/// Configuration for a client connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server nodes to connect to.
    pub addresses: Vec<NodeAddress>,

    /// Whether the core connects with TLS.
    pub use_tls: bool,

    /// Whether the server is a cluster.
    pub cluster_mode: bool,

    /// Per-request timeout enforced by the core; `None` keeps the core default.
    pub request_timeout: Option<Duration>,

    /// Read routing strategy.
    pub read_from: ReadFrom,

    /// Reconnect backoff; `None` keeps the core default.
    pub reconnect_strategy: Option<BackoffStrategy>,

    /// Authentication credentials.
    pub credentials: Option<ServerCredentials>,

    /// Logical database index (standalone only).
    pub database_id: u32,

    /// Server protocol.
    pub protocol: ProtocolVersion,

    /// Name reported to the server with CLIENT SETNAME.
    pub client_name: Option<String>,

    /// Maximum number of requests the core runs concurrently; 0 keeps the core default.
    pub inflight_requests_limit: u32,

    /// Availability zone of the client, used by [`ReadFrom::AzAffinity`].
    pub client_az: Option<String>,

    /// Subscriptions and delivery mode; `None` disables pub/sub.
    pub pubsub: Option<PubSubSubscriptions>,

    /// Bound on reaching the core's socket.
    pub connect_timeout: Duration,

    /// Bytes requested per stream read.
    pub read_buffer_size: usize,

    /// Argument lists at least this large are handed over by handle.
    pub max_inline_args_len: usize,

    /// Frames declaring a larger envelope are treated as malformed.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addresses: vec![NodeAddress::default()],
            use_tls: false,
            cluster_mode: false,
            request_timeout: None,
            read_from: ReadFrom::Primary,
            reconnect_strategy: None,
            credentials: None,
            database_id: 0,
            protocol: ProtocolVersion::Resp3,
            client_name: None,
            inflight_requests_limit: 0,
            client_az: None,
            pubsub: None,
            connect_timeout: Duration::from_millis(250),
            read_buffer_size: 64 * 1024,
            max_inline_args_len: 4 * 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Configuration for a standalone server at the given addresses.
    pub fn standalone(addresses: Vec<NodeAddress>) -> Self {
        Self {
            addresses,
            ..Self::default()
        }
    }

    /// Configuration for a cluster reachable through the given seed addresses.
    pub fn cluster(addresses: Vec<NodeAddress>) -> Self {
        Self {
            addresses,
            cluster_mode: true,
            ..Self::default()
        }
    }

    /// Enable TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Set the per-request timeout enforced by the core.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the read routing strategy.
    pub fn with_read_from(mut self, read_from: ReadFrom) -> Self {
        self.read_from = read_from;
        self
    }

    /// Set the reconnect backoff.
    pub fn with_reconnect_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, credentials: ServerCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Select a logical database.
    pub fn with_database_id(mut self, database_id: u32) -> Self {
        self.database_id = database_id;
        self
    }

    /// Select the server protocol.
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the client name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Limit concurrently running requests in the core.
    pub fn with_inflight_requests_limit(mut self, limit: u32) -> Self {
        self.inflight_requests_limit = limit;
        self
    }

    /// Set the client availability zone.
    pub fn with_client_az(mut self, az: impl Into<String>) -> Self {
        self.client_az = Some(az.into());
        self
    }

    /// Configure pub/sub subscriptions.
    pub fn with_pubsub(mut self, pubsub: PubSubSubscriptions) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Set the bound on reaching the core's socket.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the bytes requested per stream read.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the inline-argument threshold.
    pub fn with_max_inline_args_len(mut self, len: usize) -> Self {
        self.max_inline_args_len = len;
        self
    }

    /// Set the frame size cap.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Whether any subscription was configured.
    pub fn is_pubsub_configured(&self) -> bool {
        self.pubsub.is_some()
    }

    /// Build the handshake envelope sent right after connecting.
    pub fn to_connection_request(&self) -> proto::ConnectionRequest {
        proto::ConnectionRequest {
            addresses: self
                .addresses
                .iter()
                .map(|address| proto::NodeAddress {
                    host: address.host.clone(),
                    port: u32::from(address.port),
                })
                .collect(),
            tls_mode: if self.use_tls {
                proto::TlsMode::SecureTls as i32
            } else {
                proto::TlsMode::NoTls as i32
            },
            cluster_mode_enabled: self.cluster_mode,
            request_timeout: self
                .request_timeout
                .map(|timeout| u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX))
                .unwrap_or(0),
            read_from: self.read_from.to_proto() as i32,
            connection_retry_strategy: self.reconnect_strategy.map(|strategy| {
                proto::ConnectionRetryStrategy {
                    number_of_retries: strategy.num_of_retries,
                    factor: strategy.factor,
                    exponent_base: strategy.exponent_base,
                }
            }),
            authentication_info: self.credentials.as_ref().map(|credentials| {
                proto::AuthenticationInfo {
                    password: credentials.password.clone(),
                    username: credentials.username.clone().unwrap_or_default(),
                }
            }),
            database_id: self.database_id,
            protocol: match self.protocol {
                ProtocolVersion::Resp3 => proto::ProtocolVersion::Resp3 as i32,
                ProtocolVersion::Resp2 => proto::ProtocolVersion::Resp2 as i32,
            },
            client_name: self.client_name.clone().unwrap_or_default(),
            pubsub_subscriptions: self.pubsub.as_ref().map(PubSubSubscriptions::to_proto),
            inflight_requests_limit: self.inflight_requests_limit,
            client_az: self.client_az.clone().unwrap_or_default(),
        }
    }
}
