//! The kernel: applies a committed command to produce new state and a reply.

use qkv_types::Command;

use crate::command::{CommandError, ParsedCommand};
use crate::state::State;

/// The result of applying one command, returned to the submitter.
///
/// An ⟨ok, message⟩ pair; there is deliberately no `Result`/`Err` here — a
/// parse failure is itself a valid `Reply` with `ok = false`, because the
/// command still occupies a log slot and must not abort the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub ok: bool,
    pub message: String,
}

impl Reply {
    fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Applies a committed command to the state, producing the new state and a
/// reply. Pure: no IO, no clocks, no randomness. Identical sequences of
/// commands on any replica produce identical final states.
pub fn apply_committed(state: State, command: &Command) -> (State, Reply) {
    let parsed = match ParsedCommand::parse(command) {
        Ok(parsed) => parsed,
        Err(err) => return (state, reply_for_parse_error(err)),
    };

    match parsed {
        ParsedCommand::Set { key, value } => {
            let reply = Reply::ok(format!("SET {key}"));
            (state.with_set(key, value), reply)
        }
        ParsedCommand::Delete { key } => {
            let (state, existed) = state.with_delete(&key);
            let reply = if existed {
                Reply::ok(format!("DELETE {key}"))
            } else {
                Reply::err(format!("key '{key}' not found"))
            };
            (state, reply)
        }
        ParsedCommand::Get { key } => {
            let reply = match state.get(&key) {
                Some(value) => Reply::ok(value.clone()),
                None => Reply::err(format!("key '{key}' not found")),
            };
            (state, reply)
        }
    }
}

fn reply_for_parse_error(err: CommandError) -> Reply {
    Reply::err(err.to_string())
}
