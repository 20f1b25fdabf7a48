//! Newline-delimited JSON framing.

use crate::protocol::codec;
use crate::types::{DecodeError, JsonRpcMessage, TransportError};

/// Default upper bound on one inbound frame, newline excluded.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Serialize a message as one line, trailing newline included.
pub fn encode_line(message: &JsonRpcMessage) -> Result<String, TransportError> {
    let mut line = codec::encode(message)
        .map_err(|e| TransportError::Other(format!("Failed to encode message: {e}")))?;
    line.push('\n');
    Ok(line)
}

/// Decode one line. Blank lines yield `None`.
pub fn decode_line(line: &[u8]) -> Result<Option<JsonRpcMessage>, DecodeError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| DecodeError::parse(format!("Frame is not valid UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    codec::decode(text).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JsonRpcNotification;

    #[test]
    fn encoded_line_is_single_line() {
        let msg: JsonRpcMessage = JsonRpcNotification::new(
            "notifications/message",
            Some(serde_json::json!({ "data": "a\nb" })),
        )
        .into();
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_line(line.as_bytes()).unwrap(), Some(msg));
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(decode_line(b"   \r\n").unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_parse_error() {
        let err = decode_line(&[0xff, 0xfe, b'\n']).unwrap_err();
        assert_eq!(err.code(), -32700);
        assert!(err.is_unrecoverable());
    }
}
