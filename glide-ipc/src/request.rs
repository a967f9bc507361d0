//! Envelope builders for every request shape the client sends.
//!
//! Argument lists whose total size reaches the inline threshold are handed to
//! the core through the [`HandleStore`] and referenced by handle; smaller ones
//! travel inline in the envelope.

use std::sync::Arc;

use glide_ipc_core::proto::{self, command, command_request, routes};
use glide_ipc_core::{HandleStore, Value};

use crate::error::{ClientError, ClientResult, RequestErrorKind};

/// Cursor value the core returns once a cluster scan has covered every slot.
pub const FINISHED_SCAN_CURSOR: &str = "finished";

/// Slot role targeted by slot-based routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    /// The slot's primary.
    Primary,
    /// One of the slot's replicas.
    Replica,
}

impl SlotType {
    fn to_proto(self) -> i32 {
        match self {
            SlotType::Primary => proto::SlotTypes::Primary as i32,
            SlotType::Replica => proto::SlotTypes::Replica as i32,
        }
    }
}

/// Where a request should run. Carried to the core as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Every node.
    AllNodes,
    /// Every primary.
    AllPrimaries,
    /// Any single node.
    Random,
    /// The node owning the slot of `key`.
    SlotKey {
        /// Key whose slot selects the node.
        key: String,
        /// Primary or replica.
        slot_type: SlotType,
    },
    /// The node owning slot `slot_id`.
    SlotId {
        /// Slot number.
        slot_id: i32,
        /// Primary or replica.
        slot_type: SlotType,
    },
    /// A specific node.
    ByAddress {
        /// Host name or IP.
        host: String,
        /// Port.
        port: i32,
    },
}

impl Route {
    /// Envelope form of this route.
    pub fn to_proto(&self) -> proto::Routes {
        let value = match self {
            Route::AllNodes => routes::Value::SimpleRoutes(proto::SimpleRoutes::AllNodes as i32),
            Route::AllPrimaries => {
                routes::Value::SimpleRoutes(proto::SimpleRoutes::AllPrimaries as i32)
            }
            Route::Random => routes::Value::SimpleRoutes(proto::SimpleRoutes::Random as i32),
            Route::SlotKey { key, slot_type } => routes::Value::SlotKeyRoute(proto::SlotKeyRoute {
                slot_type: slot_type.to_proto(),
                slot_key: key.clone(),
            }),
            Route::SlotId { slot_id, slot_type } => {
                routes::Value::SlotIdRoute(proto::SlotIdRoute {
                    slot_type: slot_type.to_proto(),
                    slot_id: *slot_id,
                })
            }
            Route::ByAddress { host, port } => routes::Value::ByAddressRoute(proto::ByAddressRoute {
                host: host.clone(),
                port: *port,
            }),
        };
        proto::Routes { value: Some(value) }
    }
}

/// Opaque position of a cluster-wide scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterScanCursor(String);

impl ClusterScanCursor {
    /// Cursor that starts a new scan.
    pub fn initial() -> Self {
        Self("0".to_string())
    }

    /// Wrap a cursor id returned by the core.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Cursor id as sent to the core.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the scan has covered every slot.
    pub fn is_finished(&self) -> bool {
        self.0 == FINISHED_SCAN_CURSOR
    }
}

impl Default for ClusterScanCursor {
    fn default() -> Self {
        Self::initial()
    }
}

/// Filters for a cluster scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Glob-style key pattern.
    pub match_pattern: Option<Vec<u8>>,
    /// Hint for keys returned per node call.
    pub count: Option<i64>,
    /// Only return keys of this type (`string`, `list`, `hash`...).
    pub object_type: Option<String>,
    /// Keep scanning when some slots have no owner.
    pub allow_non_covered_slots: bool,
}

/// Total byte size of an argument list.
pub fn args_size(args: &[Vec<u8>]) -> usize {
    args.iter().map(Vec::len).sum()
}

/// Builds request payloads, routing large argument lists by handle.
#[derive(Clone)]
pub struct RequestEncoder {
    handles: Arc<dyn HandleStore>,
    max_inline_args_len: usize,
}

impl RequestEncoder {
    /// Create an encoder with the given inline threshold.
    pub fn new(handles: Arc<dyn HandleStore>, max_inline_args_len: usize) -> Self {
        Self {
            handles,
            max_inline_args_len,
        }
    }

    fn is_inline(&self, size: usize) -> bool {
        size < self.max_inline_args_len
    }

    /// One command, with its arguments inline or by handle.
    pub fn command(&self, request_type: proto::RequestType, args: Vec<Vec<u8>>) -> proto::Command {
        let size = args_size(&args);
        let args = if self.is_inline(size) {
            command::Args::ArgsArray(proto::ArgsArray { args })
        } else {
            let handle = self.handles.store_args(args);
            tracing::debug!(size, handle, "argument list passed by handle");
            command::Args::ArgsVecPointer(handle)
        };
        proto::Command {
            request_type: request_type as i32,
            args: Some(args),
        }
    }

    /// Payload for a single command.
    pub fn single(
        &self,
        request_type: proto::RequestType,
        args: Vec<Vec<u8>>,
    ) -> command_request::Command {
        command_request::Command::SingleCommand(self.command(request_type, args))
    }

    /// Payload for an ordered batch of commands run atomically.
    pub fn transaction(
        &self,
        commands: Vec<(proto::RequestType, Vec<Vec<u8>>)>,
    ) -> command_request::Command {
        let commands = commands
            .into_iter()
            .map(|(request_type, args)| self.command(request_type, args))
            .collect();
        command_request::Command::Transaction(proto::Transaction { commands })
    }

    /// Payload for a script invocation by SHA1 hash.
    pub fn script(
        &self,
        hash: impl Into<String>,
        keys: Vec<Vec<u8>>,
        args: Vec<Vec<u8>>,
    ) -> command_request::Command {
        let hash = hash.into();
        if self.is_inline(args_size(&keys) + args_size(&args)) {
            return command_request::Command::ScriptInvocation(proto::ScriptInvocation {
                hash,
                keys,
                args,
            });
        }
        command_request::Command::ScriptInvocationPointers(proto::ScriptInvocationPointers {
            hash,
            keys_pointer: Some(self.handles.store_args(keys)),
            args_pointer: Some(self.handles.store_args(args)),
        })
    }
}

/// Payload for one step of a cluster-wide scan.
pub fn cluster_scan(cursor: &ClusterScanCursor, options: &ScanOptions) -> command_request::Command {
    command_request::Command::ClusterScan(proto::ClusterScan {
        cursor: cursor.as_str().to_string(),
        match_pattern: options.match_pattern.clone(),
        count: options.count,
        object_type: options.object_type.clone(),
        allow_non_covered_slots: options.allow_non_covered_slots,
    })
}

/// Payload replacing (or, with `None`, removing) the connection password.
pub fn update_password(password: Option<String>, immediate_auth: bool) -> command_request::Command {
    command_request::Command::UpdateConnectionPassword(proto::UpdateConnectionPassword {
        password,
        immediate_auth,
    })
}

/// Split a cluster scan reply into the next cursor and the keys found.
pub fn parse_scan_reply(reply: Value) -> ClientResult<(ClusterScanCursor, Vec<Value>)> {
    let unexpected = |detail: &str| ClientError::Request {
        kind: RequestErrorKind::Unspecified,
        message: format!("unexpected cluster scan reply: {detail}"),
    };

    let Value::Array(mut parts) = reply else {
        return Err(unexpected("not an array"));
    };
    if parts.len() != 2 {
        return Err(unexpected("expected two elements"));
    }
    let keys = match parts.pop() {
        Some(Value::Array(keys)) => keys,
        _ => return Err(unexpected("keys are not an array")),
    };
    let cursor = parts
        .pop()
        .and_then(|cursor| cursor.as_bytes())
        .ok_or_else(|| unexpected("cursor is not a string"))?;
    let cursor = String::from_utf8(cursor.to_vec())
        .map_err(|_| unexpected("cursor is not valid UTF-8"))?;
    Ok((ClusterScanCursor::new(cursor), keys))
}
