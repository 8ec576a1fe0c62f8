//! Wire format of the messages sent by instrumentation hooks.

use std::fmt;

use crate::error::{Error, Result};

pub const ENTER: &str = "enter";
pub const EXIT: &str = "exit";

/// Terminate sentinel, sent once when the traced program winds down.
pub const END: &str = "END";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraceEvent {
    Enter(u64),
    Exit(u64),
    Terminate,
}

impl TraceEvent {
    /// Decode a raw message: `enter <hex>`, `exit <hex>` or `END`.
    ///
    /// Trailing NUL bytes are ignored, since C hooks commonly send the string terminator.
    pub fn decode(message: &[u8]) -> Result<Self> {
        let end = message
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(message.len());

        let text = std::str::from_utf8(&message[..end]).map_err(|_| protocol(message))?;

        let mut tokens = text.split_whitespace();
        let event = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(END), None, None) => TraceEvent::Terminate,
            (Some(ENTER), Some(addr), None) => TraceEvent::Enter(parse_addr(addr).ok_or_else(|| protocol(message))?),
            (Some(EXIT), Some(addr), None) => TraceEvent::Exit(parse_addr(addr).ok_or_else(|| protocol(message))?),
            _ => return Err(protocol(message)),
        };

        Ok(event)
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Enter(addr) => write!(f, "{ENTER} {addr:#x}"),
            TraceEvent::Exit(addr) => write!(f, "{EXIT} {addr:#x}"),
            TraceEvent::Terminate => f.write_str(END),
        }
    }
}

fn parse_addr(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    if digits.is_empty() {
        return None;
    }

    u64::from_str_radix(digits, 16).ok()
}

fn protocol(message: &[u8]) -> Error {
    let message = String::from_utf8_lossy(message)
        .trim_end_matches('\0')
        .to_owned();

    Error::Protocol { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hook_messages() {
        assert_eq!(TraceEvent::decode(b"enter 0x401136").unwrap(), TraceEvent::Enter(0x401136));
        assert_eq!(TraceEvent::decode(b"exit 401136").unwrap(), TraceEvent::Exit(0x401136));
        assert_eq!(TraceEvent::decode(b"END").unwrap(), TraceEvent::Terminate);
    }

    #[test]
    fn test_decode_ignores_nul_terminator() {
        assert_eq!(TraceEvent::decode(b"enter 0x10\0\0\0").unwrap(), TraceEvent::Enter(0x10));
        assert_eq!(TraceEvent::decode(b"END\0").unwrap(), TraceEvent::Terminate);
    }

    #[test]
    fn test_decode_rejects_unknown_shapes() {
        for raw in [&b"call 0x10"[..], b"enter", b"enter zz", b"exit 0x", b"END now", b"", b"enter 0x10 0x20"] {
            let err = TraceEvent::decode(raw).unwrap_err();
            assert!(matches!(err, Error::Protocol { .. }), "{raw:?}: {err}");
        }
    }

    #[test]
    fn test_encode_matches_wire_shape() {
        assert_eq!(TraceEvent::Enter(0x2a).encode(), "enter 0x2a");
        assert_eq!(TraceEvent::Exit(0x2a).encode(), "exit 0x2a");
        assert_eq!(TraceEvent::Terminate.encode(), "END");
    }
}
