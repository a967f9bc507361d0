//! In-process [`HandleStore`] implementation.
//!
//! Used when the core runs inside the same process (embedded cores, test
//! doubles): both sides share one registry, the core stores reply values and
//! takes argument lists, the client does the opposite.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::bridge::{HandleError, HandleStore};
use crate::value::Value;

#[derive(Debug)]
enum Entry {
    Value(Value),
    Args(Vec<Vec<u8>>),
}

/// Shared table of single-use handles.
///
/// Handle `0` is never issued.
#[derive(Debug)]
pub struct HandleRegistry {
    next_handle: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

impl HandleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, entry: Entry) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(handle, entry);
        handle
    }

    /// Store a reply value and return its handle (core side).
    pub fn store_value(&self, value: Value) -> u64 {
        self.insert(Entry::Value(value))
    }

    /// Take the argument list behind `handle` (core side).
    pub fn take_args(&self, handle: u64) -> Result<Vec<Vec<u8>>, HandleError> {
        let mut entries = self.entries();
        match entries.remove(&handle) {
            Some(Entry::Args(args)) => Ok(args),
            Some(other) => {
                entries.insert(handle, other);
                Err(HandleError::WrongKind {
                    handle,
                    expected: "an argument list",
                })
            }
            None => Err(HandleError::Unknown(handle)),
        }
    }

    /// Number of handles issued and not yet consumed.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether every issued handle has been consumed.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleStore for HandleRegistry {
    fn value_from_handle(&self, handle: u64) -> Result<Value, HandleError> {
        let mut entries = self.entries();
        match entries.remove(&handle) {
            Some(Entry::Value(value)) => Ok(value),
            Some(other) => {
                entries.insert(handle, other);
                Err(HandleError::WrongKind {
                    handle,
                    expected: "a value",
                })
            }
            None => Err(HandleError::Unknown(handle)),
        }
    }

    fn store_args(&self, args: Vec<Vec<u8>>) -> u64 {
        self.insert(Entry::Args(args))
    }

    fn statistics(&self) -> BTreeMap<String, u64> {
        let issued = self.next_handle.load(Ordering::Relaxed) - 1;
        BTreeMap::from([
            ("issued_handles".to_string(), issued),
            ("live_handles".to_string(), self.len() as u64),
        ])
    }
}
