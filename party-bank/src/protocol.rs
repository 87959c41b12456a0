use std::{fmt, num::ParseIntError};

use thiserror::Error;

/// Acknowledgment written after every processed frame, applied or not.
pub const ACK: &[u8; 2] = b"OK";

const FIELD_DELIMITER: char = ',';
const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One decoded command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { name: String, avatar_id: i32 },
    Add { address: String, amount: u64 },
    Rem { address: String, amount: u64 },
    Stop,
    /// Any other leading token. Acknowledged and otherwise ignored.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty command frame")]
    Empty,
    #[error("{command} is missing the {field} field")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
    #[error("{command} has an invalid {field} '{value}': {source}")]
    InvalidNumber {
        command: &'static str,
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Decodes one frame as ASCII text split on commas.
///
/// Only a payload that is exactly `STOP` is a stop command; `STOP,...` falls
/// through to [`Command::Unknown`]. Extra trailing fields are ignored.
pub fn decode(frame: &[u8]) -> Result<Command, ProtocolError> {
    let text = String::from_utf8_lossy(frame);
    let text = text.trim_end_matches(LINE_ENDINGS);
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if text == "STOP" {
        return Ok(Command::Stop);
    }

    let mut fields = text.split(FIELD_DELIMITER);
    let name = fields.next().unwrap_or_default();
    match name {
        "JOIN" => {
            let player = required(fields.next(), "JOIN", "name")?;
            let avatar = required(fields.next(), "JOIN", "avatar id")?;
            Ok(Command::Join {
                name: player.to_string(),
                avatar_id: number(avatar, "JOIN", "avatar id")?,
            })
        }
        "ADD" => {
            let (address, amount) = balance_fields(&mut fields, "ADD")?;
            Ok(Command::Add { address, amount })
        }
        "REM" => {
            let (address, amount) = balance_fields(&mut fields, "REM")?;
            Ok(Command::Rem { address, amount })
        }
        other => Ok(Command::Unknown(other.to_string())),
    }
}

pub fn encode_ack() -> &'static [u8] {
    ACK
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Join { name, avatar_id } => write!(f, "JOIN,{name},{avatar_id}"),
            Command::Add { address, amount } => write!(f, "ADD,{address},{amount}"),
            Command::Rem { address, amount } => write!(f, "REM,{address},{amount}"),
            Command::Stop => f.write_str("STOP"),
            Command::Unknown(token) => f.write_str(token),
        }
    }
}

fn balance_fields<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
) -> Result<(String, u64), ProtocolError> {
    let address = required(fields.next(), command, "address")?;
    let amount = required(fields.next(), command, "amount")?;
    Ok((address.to_string(), number(amount, command, "amount")?))
}

fn required<'a>(
    field: Option<&'a str>,
    command: &'static str,
    name: &'static str,
) -> Result<&'a str, ProtocolError> {
    field.ok_or(ProtocolError::MissingField {
        command,
        field: name,
    })
}

fn number<T>(value: &str, command: &'static str, field: &'static str) -> Result<T, ProtocolError>
where
    T: std::str::FromStr<Err = ParseIntError>,
{
    value
        .trim()
        .parse()
        .map_err(|source| ProtocolError::InvalidNumber {
            command,
            field,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_join_add_and_rem() {
        assert_eq!(
            decode(b"JOIN,Alice,3").unwrap(),
            Command::Join {
                name: "Alice".into(),
                avatar_id: 3
            }
        );
        assert_eq!(
            decode(b"ADD,10.0.0.4,50").unwrap(),
            Command::Add {
                address: "10.0.0.4".into(),
                amount: 50
            }
        );
        assert_eq!(
            decode(b"REM,10.0.0.4,75\r\n").unwrap(),
            Command::Rem {
                address: "10.0.0.4".into(),
                amount: 75
            }
        );
    }

    #[test]
    fn stop_must_be_the_whole_frame() {
        assert_eq!(decode(b"STOP").unwrap(), Command::Stop);
        assert_eq!(decode(b"STOP\n").unwrap(), Command::Stop);
        assert_eq!(
            decode(b"STOP,now").unwrap(),
            Command::Unknown("STOP".into())
        );
    }

    #[test]
    fn unknown_tokens_are_not_errors() {
        assert_eq!(
            decode(b"PING,1").unwrap(),
            Command::Unknown("PING".into())
        );
        assert_eq!(decode(b"join,a,1").unwrap(), Command::Unknown("join".into()));
    }

    #[test]
    fn malformed_frames_report_the_offending_field() {
        assert_eq!(decode(b""), Err(ProtocolError::Empty));
        assert_eq!(
            decode(b"JOIN,Alice"),
            Err(ProtocolError::MissingField {
                command: "JOIN",
                field: "avatar id"
            })
        );
        assert!(matches!(
            decode(b"ADD,10.0.0.4,-5"),
            Err(ProtocolError::InvalidNumber {
                command: "ADD",
                field: "amount",
                ..
            })
        ));
        assert!(matches!(
            decode(b"JOIN,Alice,blue"),
            Err(ProtocolError::InvalidNumber { command: "JOIN", .. })
        ));
    }

    #[test]
    fn encode_matches_wire_format() {
        let join = Command::Join {
            name: "Bob".into(),
            avatar_id: 2,
        };
        assert_eq!(join.encode(), b"JOIN,Bob,2".to_vec());
        assert_eq!(Command::Stop.encode(), b"STOP".to_vec());
        assert_eq!(encode_ack(), b"OK");
    }
}
