//! Command parsing.
//!
//! The log stores opaque bytes (`qkv_types::Command`); only the kernel
//! interprets them, by parsing one of three forms: `SET k=v`,
//! `DELETE k`, `GET k`.

use qkv_types::Command;

/// A command payload parsed into its structured form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Set { key: String, value: String },
    Delete { key: String },
    Get { key: String },
}

/// Errors from parsing a command payload.
///
/// These are returned to the submitter but never stop the replica — a
/// malformed command still occupies a log slot.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unrecognized command verb '{0}'")]
    UnknownVerb(String),

    #[error("SET requires 'key=value', got '{0}'")]
    MalformedSet(String),

    #[error("{0} requires a key, got no arguments")]
    MissingKey(&'static str),
}

impl ParsedCommand {
    pub fn parse(command: &Command) -> Result<Self, CommandError> {
        let text = command.as_str();
        let mut parts = text.trim().splitn(2, char::is_whitespace);
        let verb = parts.next().filter(|v| !v.is_empty()).ok_or(CommandError::Empty)?;
        let rest = parts.next().unwrap_or("").trim();

        match verb.to_ascii_uppercase().as_str() {
            "SET" => {
                let (key, value) = rest
                    .split_once('=')
                    .ok_or_else(|| CommandError::MalformedSet(rest.to_string()))?;
                if key.is_empty() {
                    return Err(CommandError::MalformedSet(rest.to_string()));
                }
                Ok(Self::Set {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
            "DELETE" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingKey("DELETE"));
                }
                Ok(Self::Delete { key: rest.to_string() })
            }
            "GET" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingKey("GET"));
                }
                Ok(Self::Get { key: rest.to_string() })
            }
            other => Err(CommandError::UnknownVerb(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set() {
        let cmd = Command::from_str("SET A=10");
        assert_eq!(
            ParsedCommand::parse(&cmd).unwrap(),
            ParsedCommand::Set { key: "A".into(), value: "10".into() }
        );
    }

    #[test]
    fn parses_set_with_equals_in_value() {
        let cmd = Command::from_str("SET A=x=y");
        assert_eq!(
            ParsedCommand::parse(&cmd).unwrap(),
            ParsedCommand::Set { key: "A".into(), value: "x=y".into() }
        );
    }

    #[test]
    fn parses_delete() {
        let cmd = Command::from_str("DELETE A");
        assert_eq!(ParsedCommand::parse(&cmd).unwrap(), ParsedCommand::Delete { key: "A".into() });
    }

    #[test]
    fn parses_get() {
        let cmd = Command::from_str("GET A");
        assert_eq!(ParsedCommand::parse(&cmd).unwrap(), ParsedCommand::Get { key: "A".into() });
    }

    #[test]
    fn rejects_empty_command() {
        let cmd = Command::from_str("");
        assert_eq!(ParsedCommand::parse(&cmd), Err(CommandError::Empty));
    }

    #[test]
    fn rejects_unknown_verb() {
        let cmd = Command::from_str("FROB A");
        assert!(matches!(ParsedCommand::parse(&cmd), Err(CommandError::UnknownVerb(_))));
    }

    #[test]
    fn rejects_set_without_equals() {
        let cmd = Command::from_str("SET A");
        assert!(matches!(ParsedCommand::parse(&cmd), Err(CommandError::MalformedSet(_))));
    }

    #[test]
    fn rejects_delete_without_key() {
        let cmd = Command::from_str("DELETE");
        assert_eq!(ParsedCommand::parse(&cmd), Err(CommandError::MissingKey("DELETE")));
    }
}
