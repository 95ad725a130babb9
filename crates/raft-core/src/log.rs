//! # log
//!
//! why: give each replicated command a self-checksummed on-disk line that survives torn writes
//! relations: uses command.rs to name and rebuild payloads, driven by raft-storage's Log
//! what: LogEntry struct, line encoder, line decoder
//!
//! Line format (one entry per line):
//!
//! ```text
//! <crc32:8 hex> <index:16 hex> <term:16 hex> <command-name> <json-payload>\n
//! ```
//!
//! The checksum covers everything after its trailing space, newline included.

use std::io::{BufRead, Write};

use serde::de::IgnoredAny;

use crate::command::{Command, CommandRegistry};
use crate::error::EntryError;

/// Width of the checksum field, in hex digits.
pub const CHECKSUM_WIDTH: usize = 8;

/// Width of the index and term fields, in hex digits.
pub const FIELD_WIDTH: usize = 16;

/// A single entry in the replicated log
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The term when this entry was created
    pub term: u64,
    /// The command to be applied to the state machine
    pub command: Box<dyn Command>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, command: impl Command) -> Self {
        Self::from_boxed(term, index, Box::new(command))
    }

    pub fn from_boxed(term: u64, index: u64, command: Box<dyn Command>) -> Self {
        Self { index, term, command }
    }

    pub fn command_name(&self) -> &str {
        self.command.name()
    }

    /// Downcast the payload to its concrete type.
    pub fn command_as<T: Command>(&self) -> Option<&T> {
        self.command.as_any().downcast_ref::<T>()
    }

    /// Write this entry as one checksummed line. Returns the bytes written.
    ///
    /// The line is assembled in memory first and handed to the writer in a
    /// single `write_all`.
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<usize, EntryError> {
        let line = self.encode_line()?;
        w.write_all(&line)?;
        Ok(line.len())
    }

    /// Length of the encoded line, checksum field included.
    pub fn encoded_len(&self) -> Result<usize, EntryError> {
        self.encode_line().map(|line| line.len())
    }

    fn encode_line(&self) -> Result<Vec<u8>, EntryError> {
        let name = self.command.name();
        let payload = self.command.encode().map_err(|source| EntryError::Encode {
            name: name.to_string(),
            source,
        })?;

        let mut body = format!("{:016x} {:016x} {} ", self.index, self.term, name).into_bytes();
        body.extend_from_slice(&payload);
        body.push(b'\n');

        let checksum = crc32fast::hash(&body);
        let mut line = Vec::with_capacity(CHECKSUM_WIDTH + 1 + body.len());
        line.extend_from_slice(format!("{checksum:08x} ").as_bytes());
        line.extend_from_slice(&body);
        Ok(line)
    }

    /// Read one entry line from `r`, resolving its command through `registry`.
    ///
    /// Returns the entry and the number of bytes consumed, so callers can
    /// track the offset of the last good entry.
    pub fn decode<R: BufRead>(
        r: &mut R,
        registry: &CommandRegistry,
    ) -> Result<(Self, usize), EntryError> {
        let mut field = [0u8; CHECKSUM_WIDTH];
        r.read_exact(&mut field)
            .map_err(|e| EntryError::ReadChecksum(e.to_string()))?;
        let expected = parse_hex(&field, CHECKSUM_WIDTH)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                EntryError::ReadChecksum(format!(
                    "not hex: {:?}",
                    String::from_utf8_lossy(&field)
                ))
            })?;
        let mut consumed = CHECKSUM_WIDTH;

        // a missing separator reads as 0x00
        let mut space = [0u8; 1];
        if r.read_exact(&mut space).is_err() {
            space[0] = 0;
        }
        if space[0] != b' ' {
            return Err(EntryError::ExpectedSpace(space[0]));
        }
        consumed += 1;

        let mut line = Vec::new();
        r.read_until(b'\n', &mut line).map_err(EntryError::ReadLine)?;
        consumed += line.len();
        if line.last() != Some(&b'\n') {
            return Err(EntryError::UnexpectedEof(line.len()));
        }

        let actual = crc32fast::hash(&line);
        if actual != expected {
            return Err(EntryError::InvalidChecksum { expected, actual });
        }

        let (index, term, name, rest) = scan_header(&line)?;

        let mut command = registry
            .new_command(name)
            .map_err(|source| EntryError::Instantiate {
                name: name.to_string(),
                source,
            })?;

        let decode_err = |source: serde_json::Error| EntryError::Decode {
            name: name.to_string(),
            term,
            index,
            source,
        };
        let (payload, trailing) = split_payload(rest).map_err(decode_err)?;
        command.decode(payload).map_err(decode_err)?;

        match trailing {
            [b'\n'] => {}
            [other, ..] => return Err(EntryError::TrailingByte(*other)),
            [] => return Err(EntryError::UnexpectedEof(line.len())),
        }

        Ok((Self { index, term, command }, consumed))
    }
}

/// Split `<index> <term> <name> ` off the front of a line.
fn scan_header(line: &[u8]) -> Result<(u64, u64, &str, &[u8]), EntryError> {
    let mut rest = line;

    let index = next_token(&mut rest)
        .and_then(|t| parse_hex(t, FIELD_WIDTH))
        .ok_or_else(|| scan_error("index", line))?;
    let term = next_token(&mut rest)
        .and_then(|t| parse_hex(t, FIELD_WIDTH))
        .ok_or_else(|| scan_error("term", line))?;
    let name = next_token(&mut rest)
        .and_then(|t| std::str::from_utf8(t).ok())
        .ok_or_else(|| scan_error("command name", line))?;

    Ok((index, term, name, rest))
}

fn scan_error(field: &str, line: &[u8]) -> EntryError {
    let shown = String::from_utf8_lossy(&line[..line.len().min(64)]);
    EntryError::Scan(format!("missing or malformed {field} in {shown:?}"))
}

/// Take bytes up to the next space, consuming the space.
fn next_token<'a>(rest: &mut &'a [u8]) -> Option<&'a [u8]> {
    let end = rest.iter().position(|&b| b == b' ')?;
    let token = &rest[..end];
    *rest = &rest[end + 1..];
    (!token.is_empty()).then_some(token)
}

/// Parse exactly `width` lowercase-or-uppercase hex digits.
fn parse_hex(digits: &[u8], width: usize) -> Option<u64> {
    if digits.len() != width || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let s = std::str::from_utf8(digits).ok()?;
    u64::from_str_radix(s, 16).ok()
}

/// Find where the first JSON value in `rest` ends.
fn split_payload(rest: &[u8]) -> serde_json::Result<(&[u8], &[u8])> {
    let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<IgnoredAny>();
    match stream.next() {
        Some(Ok(_)) => Ok(rest.split_at(stream.byte_offset())),
        Some(Err(e)) => Err(e),
        None => Err(<serde_json::Error as serde::de::Error>::custom(
            "missing command payload",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NoopCommand;
    use std::io::Cursor;

    fn registry() -> CommandRegistry {
        CommandRegistry::builder().register::<NoopCommand>().build()
    }

    #[test]
    fn encodes_documented_line_format() {
        let entry = LogEntry::new(2, 3, NoopCommand {});
        let mut buf = Vec::new();
        let n = entry.encode(&mut buf).unwrap();

        let body = b"0000000000000003 0000000000000002 noop {}\n";
        let expected = format!("{:08x} ", crc32fast::hash(body));
        assert_eq!(n, buf.len());
        assert_eq!(&buf[..9], expected.as_bytes());
        assert_eq!(&buf[9..], body);
    }

    #[test]
    fn decode_reports_bytes_consumed() {
        let entry = LogEntry::new(1, 1, NoopCommand {});
        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();
        entry.encode(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf.clone());
        let (decoded, n) = LogEntry::decode(&mut cursor, &registry()).unwrap();
        assert_eq!(n, buf.len() / 2);
        assert_eq!(decoded.index, 1);
        assert_eq!(decoded.term, 1);
        assert_eq!(decoded.command_name(), "noop");
    }

    #[test]
    fn parse_hex_requires_full_width() {
        assert_eq!(parse_hex(b"000000000000000a", FIELD_WIDTH), Some(10));
        assert_eq!(parse_hex(b"a", FIELD_WIDTH), None);
        assert_eq!(parse_hex(b"+00000000000000a", FIELD_WIDTH), None);
    }

    #[test]
    fn next_token_rejects_empty_tokens() {
        let mut rest: &[u8] = b" abc";
        assert_eq!(next_token(&mut rest), None);
    }
}
