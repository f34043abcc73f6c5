//! Kernel state: the key-value map.
//!
//! State transitions take ownership and return a new state (builder
//! pattern), so the kernel never needs to clone the map on the happy path.

use std::collections::BTreeMap;

/// The kernel's in-memory state: a deterministic map from key to value.
///
/// `BTreeMap` (not `HashMap`) so that diagnostic iteration order — e.g. a
/// future `GetState` dump — is identical on every replica.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    map: BTreeMap<String, String>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts or overwrites `key`, returning the updated state.
    ///
    /// Internal to the kernel — external code goes through
    /// [`crate::apply_committed`], which parses the command and records the
    /// reply.
    pub(crate) fn with_set(mut self, key: String, value: String) -> Self {
        self.map.insert(key, value);
        self
    }

    /// Removes `key` if present, returning the updated state and whether the
    /// key existed.
    pub(crate) fn with_delete(mut self, key: &str) -> (Self, bool) {
        let existed = self.map.remove(key).is_some();
        (self, existed)
    }
}
