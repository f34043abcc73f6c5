//! # qkv-kernel: functional core of `quorumkv`
//!
//! The kernel is the pure, deterministic heart of the key-value store. It
//! receives committed commands and produces a new state plus a reply.
//!
//! ## Key principles
//!
//! - **No IO**: the kernel never touches disk, network, or any external
//!   resource.
//! - **No clocks, no randomness**: same input always produces same output.
//! - **Pure function**: `apply_committed(state, command) -> (state, reply)`.
//!
//! Both the CFT and BFT engines call [`apply_committed`] from their apply
//! loop, guarded by a mutex they own (see [`StateMachine`]); the kernel
//! itself holds no lock and no shared state.

mod command;
mod kernel;
mod state;

pub use command::{CommandError, ParsedCommand};
pub use kernel::{apply_committed, Reply};
pub use state::State;

use std::sync::Mutex;

use qkv_types::Command;

/// Thread-safe wrapper around the kernel's pure core.
///
/// Owns the single mutex that guarantees at most one `apply` runs at a time
/// per replica, always from the local engine's apply loop. The engines never
/// reach into [`State`] directly.
#[derive(Default)]
pub struct StateMachine {
    state: Mutex<State>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a committed command, returning the `(ok, message)` pair an
    /// `apply(cmd)` contract produces.
    pub fn apply(&self, command: &Command) -> Reply {
        let mut guard = self.state.lock().expect("state machine mutex poisoned");
        let current = std::mem::take(&mut *guard);
        let (next, reply) = apply_committed(current, command);
        *guard = next;
        reply
    }

    /// Reads a key without going through the log (`GET` never mutates —
    /// included for uniformity but never written to the log).
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().expect("state machine mutex poisoned").get(key).cloned()
    }

    /// Returns the number of keys currently stored, for diagnostics.
    pub fn len(&self) -> usize {
        self.state.lock().expect("state machine mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
