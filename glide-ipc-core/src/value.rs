//! Concrete reply values produced by the core.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Kind tag of a push notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PushKind {
    /// Connection to the server dropped; messages might be lost.
    Disconnection,
    /// Message published to a subscribed channel.
    Message,
    /// Message matched by a subscribed pattern.
    PatternMessage,
    /// Message published to a subscribed shard channel.
    ShardMessage,
    /// Subscription confirmation.
    Subscribe,
    /// Pattern subscription confirmation.
    PatternSubscribe,
    /// Shard subscription confirmation.
    ShardSubscribe,
    /// Unsubscription confirmation.
    Unsubscribe,
    /// Pattern unsubscription confirmation.
    PatternUnsubscribe,
    /// Shard unsubscription confirmation.
    ShardUnsubscribe,
    /// Any other kind, with the name the server used.
    Unknown(String),
}

impl PushKind {
    /// Whether notifications of this kind carry a message for the application.
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            PushKind::Message | PushKind::PatternMessage | PushKind::ShardMessage
        )
    }

    /// Whether this kind is a (un)subscription confirmation.
    pub fn is_subscription_change(&self) -> bool {
        matches!(
            self,
            PushKind::Subscribe
                | PushKind::PatternSubscribe
                | PushKind::ShardSubscribe
                | PushKind::Unsubscribe
                | PushKind::PatternUnsubscribe
                | PushKind::ShardUnsubscribe
        )
    }
}

/// A value returned by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value.
    Nil,
    /// The `OK` status constant.
    Okay,
    /// Integer reply.
    Int(i64),
    /// Floating point reply.
    Double(f64),
    /// Boolean reply.
    Boolean(bool),
    /// Binary-safe string.
    BulkString(Bytes),
    /// Status string.
    SimpleString(String),
    /// Ordered collection.
    Array(Vec<Value>),
    /// Unordered collection.
    Set(Vec<Value>),
    /// Key/value pairs in server order.
    Map(Vec<(Value, Value)>),
    /// Out-of-band notification.
    Push {
        /// Notification kind.
        kind: PushKind,
        /// Notification fields, in server order.
        data: Vec<Value>,
    },
}

impl Value {
    /// Returns the value as raw bytes when it is a string.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            Value::BulkString(bytes) => Some(bytes.clone()),
            Value::SimpleString(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            _ => None,
        }
    }

    /// Whether this is the `OK` constant.
    pub fn is_okay(&self) -> bool {
        matches!(self, Value::Okay)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::BulkString(Bytes::from(v))
    }
}
