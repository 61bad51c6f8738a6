// MIT License - Copyright (c) 2026 Peter Wright
// Outbound command lines

use std::fmt;

use crate::error::CommandError;

/// Line terminator appended to every command on the wire.
pub const LINE_TERMINATOR: u8 = b'\n';

/// One opaque instruction for the device.
///
/// The device protocol is line-based: a command is a single line of UTF-8
/// text and carries no terminator of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Create a command, rejecting embedded `\n` or `\r`.
    pub fn new(text: impl Into<String>) -> Result<Self, CommandError> {
        let text = text.into();
        if let Some(position) = text.find(['\n', '\r']) {
            return Err(CommandError::EmbeddedNewline { position });
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The exact bytes written to the socket: the command followed by `\n`.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.0.len() + 1);
        line.extend_from_slice(self.0.as_bytes());
        line.push(LINE_TERMINATOR);
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<String> for Command {
    type Error = CommandError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bytes() {
        let cmd = Command::new("PING").unwrap();
        assert_eq!(cmd.to_wire_bytes(), b"PING\n");

        let cmd = Command::new("").unwrap();
        assert_eq!(cmd.to_wire_bytes(), b"\n");
    }

    #[test]
    fn test_rejects_line_terminators() {
        assert_eq!(
            Command::new("GAIN 5\nOFFSET 3"),
            Err(CommandError::EmbeddedNewline { position: 6 })
        );
        assert_eq!(
            Command::try_from("PING\r"),
            Err(CommandError::EmbeddedNewline { position: 4 })
        );
    }

    #[test]
    fn test_utf8_passthrough() {
        let cmd = Command::new("LABEL=µV").unwrap();
        assert_eq!(cmd.as_str(), "LABEL=µV");
        assert_eq!(cmd.to_wire_bytes().last(), Some(&b'\n'));
    }
}
