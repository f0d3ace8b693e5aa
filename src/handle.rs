//! Arena of live native resources keyed by opaque integer handles.
//!
//! The managed side never sees a native address: it holds a
//! [`ConnectionHandle`] (stored in the Java object's `long` field) and every
//! operation looks the entry up here. IDs come from one process-wide
//! monotonic counter and are never reused, so a destroyed handle stays
//! detectably stale and two tables never issue the same ID.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{BridgeError, Result};

/// Opaque ID of a connection owned by the bridge. `0` is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub const NULL: ConnectionHandle = ConnectionHandle(0);

    /// Rebuild a handle from the managed object's `long` field.
    pub fn from_raw(raw: i64) -> Self {
        Self(raw as u64)
    }

    /// Value stored in the managed object's `long` field.
    pub fn into_raw(self) -> i64 {
        self.0 as i64
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Handle table. Entries are shared as `Arc<T>` so an operation that has
/// looked an entry up keeps it alive even if the handle is removed
/// concurrently; the entry's `Drop` runs after the last user is done.
pub struct HandleTable<T> {
    entries: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Arc<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an entry and issue a fresh handle for it.
    pub fn insert(&self, value: T) -> ConnectionHandle {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(id, Arc::new(value));
        ConnectionHandle(id)
    }

    /// Look up a live entry.
    pub fn get(&self, handle: ConnectionHandle) -> Result<Arc<T>> {
        self.entries()
            .get(&handle.0)
            .cloned()
            .ok_or(BridgeError::StaleHandle(handle))
    }

    /// Remove an entry. The returned `Arc` may not be the last reference.
    pub fn remove(&self, handle: ConnectionHandle) -> Result<Arc<T>> {
        self.entries()
            .remove(&handle.0)
            .ok_or(BridgeError::StaleHandle(handle))
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.entries().contains_key(&handle.0)
    }

    /// Live handles, in issue order.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        let mut ids: Vec<u64> = self.entries().keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(ConnectionHandle).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
