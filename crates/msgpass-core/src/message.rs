//! The fixed-size message record exchanged between connector and dispatcher.
//!
//! ```text
//! ┌────────────┬──────────────────────────────────────────┐
//! │ kind (4B)  │ payload (256B, NUL-terminated, 0-padded) │
//! │ i32 LE     │                                          │
//! └────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Both ends must agree on [`PAYLOAD_CAPACITY`] at build time; the record
//! carries no version or length field.

use std::fmt;

/// Size of the payload buffer in bytes, including the NUL terminator.
pub const PAYLOAD_CAPACITY: usize = 256;

/// Size of one encoded record on the wire.
pub const RECORD_LEN: usize = 4 + PAYLOAD_CAPACITY;

/// Value of [`Message::kind`] for every message a connector creates.
pub const DEFAULT_KIND: i32 = 0;

/// Request payload that asks the dispatcher to stop serving.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

/// Reply payload telling the connector to stop exchanging.
pub const TERMINATE_REPLY: &str = "terminate";

/// Reply payload for every request other than [`SHUTDOWN_COMMAND`].
pub const ACK_REPLY: &str = "ack";

/// Capacity-bounded text.
///
/// Holds at most [`Payload::MAX_LEN`] bytes of UTF-8 with no interior NUL, so
/// it always fits the wire buffer together with its terminator.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload {
    text: String,
}

impl Payload {
    /// Longest text a payload can hold; one byte is reserved for the NUL.
    pub const MAX_LEN: usize = PAYLOAD_CAPACITY - 1;

    /// Build a payload from `text`, cutting it at the first NUL and then to
    /// at most [`Self::MAX_LEN`] bytes on a character boundary.
    pub fn truncating(text: &str) -> Self {
        let text = text.split('\0').next().unwrap_or_default();
        let mut end = text.len().min(Self::MAX_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            text: text[..end].to_string(),
        }
    }

    /// Decode a wire buffer. Bytes after the first NUL are ignored; a buffer
    /// with no NUL is treated as terminated at its last byte.
    pub fn from_wire(buf: &[u8; PAYLOAD_CAPACITY]) -> Self {
        let end = buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::MAX_LEN);
        Self::truncating(&String::from_utf8_lossy(&buf[..end]))
    }

    /// Encode into a zero-padded wire buffer.
    pub fn to_wire(&self) -> [u8; PAYLOAD_CAPACITY] {
        let mut buf = [0u8; PAYLOAD_CAPACITY];
        buf[..self.text.len()].copy_from_slice(self.text.as_bytes());
        buf
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.text, f)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::truncating(text)
    }
}

/// One request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Reserved message type. Carried on the wire, never interpreted.
    pub kind: i32,
    pub payload: Payload,
}

impl Message {
    /// A message of [`DEFAULT_KIND`] carrying `text` (truncated to capacity).
    pub fn new(text: &str) -> Self {
        Self {
            kind: DEFAULT_KIND,
            payload: Payload::truncating(text),
        }
    }

    /// A reply to this message. The reserved `kind` is echoed unchanged.
    pub fn reply(&self, text: &str) -> Self {
        Self {
            kind: self.kind,
            payload: Payload::truncating(text),
        }
    }

    /// Whether the payload equals `token` byte for byte.
    pub fn is(&self, token: &str) -> bool {
        self.payload.as_str().as_bytes() == token.as_bytes()
    }

    /// Encode to a wire record.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[..4].copy_from_slice(&self.kind.to_le_bytes());
        record[4..].copy_from_slice(&self.payload.to_wire());
        record
    }

    /// Decode a wire record.
    pub fn decode(record: &[u8; RECORD_LEN]) -> Self {
        let (kind, payload) = record.split_at(4);
        let mut kind_bytes = [0u8; 4];
        kind_bytes.copy_from_slice(kind);
        let mut payload_bytes = [0u8; PAYLOAD_CAPACITY];
        payload_bytes.copy_from_slice(payload);
        Self {
            kind: i32::from_le_bytes(kind_bytes),
            payload: Payload::from_wire(&payload_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_message_uses_default_kind() {
        let msg = Message::new("hello");
        assert_eq!(msg.kind, DEFAULT_KIND);
        assert_eq!(msg.payload.as_str(), "hello");
    }

    #[test]
    fn test_overlong_input_is_truncated_to_capacity() {
        let long = "x".repeat(PAYLOAD_CAPACITY * 2);
        let payload = Payload::truncating(&long);
        assert_eq!(payload.len(), Payload::MAX_LEN);

        let wire = payload.to_wire();
        assert_eq!(wire[PAYLOAD_CAPACITY - 1], 0, "terminator must survive");
    }

    #[test]
    fn test_input_exactly_at_capacity_is_truncated() {
        let exact = "y".repeat(PAYLOAD_CAPACITY);
        assert_eq!(Payload::truncating(&exact).len(), PAYLOAD_CAPACITY - 1);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 254 ASCII bytes followed by a 3-byte character straddling the limit.
        let text = format!("{}€", "a".repeat(254));
        let payload = Payload::truncating(&text);
        assert_eq!(payload.len(), 254);
        assert!(payload.as_str().chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_interior_nul_terminates_text() {
        assert_eq!(Payload::truncating("ab\0cd").as_str(), "ab");
    }

    #[test]
    fn test_empty_payload() {
        let msg = Message::new("");
        assert!(msg.payload.is_empty());
        assert!(msg.encode()[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_record_layout() {
        let msg = Message {
            kind: 7,
            payload: Payload::from("ack"),
        };
        let record = msg.encode();
        assert_eq!(record.len(), RECORD_LEN);
        assert_eq!(&record[..4], &7i32.to_le_bytes());
        assert_eq!(&record[4..7], b"ack");
        assert!(record[7..].iter().all(|&b| b == 0));
        assert_eq!(Message::decode(&record), msg);
    }

    #[test]
    fn test_decode_unterminated_buffer() {
        let mut record = [b'z'; RECORD_LEN];
        record[..4].copy_from_slice(&0i32.to_le_bytes());
        let msg = Message::decode(&record);
        assert_eq!(msg.payload.len(), Payload::MAX_LEN);
    }

    #[test]
    fn test_decode_ignores_bytes_after_terminator() {
        let mut record = [0u8; RECORD_LEN];
        record[4..9].copy_from_slice(b"hi\0yo");
        assert_eq!(Message::decode(&record).payload.as_str(), "hi");
    }

    #[test]
    fn test_decode_replaces_invalid_utf8() {
        let mut record = [0u8; RECORD_LEN];
        record[4] = 0xff;
        record[5] = b'!';
        assert_eq!(Message::decode(&record).payload.as_str(), "\u{fffd}!");
    }

    #[test]
    fn test_reply_echoes_kind() {
        let request = Message {
            kind: -3,
            payload: Payload::from("ping"),
        };
        let reply = request.reply(ACK_REPLY);
        assert_eq!(reply.kind, -3);
        assert!(reply.is(ACK_REPLY));
    }

    #[test]
    fn test_is_compares_exact_bytes() {
        assert!(Message::new("shutdown").is(SHUTDOWN_COMMAND));
        assert!(!Message::new("shutdown ").is(SHUTDOWN_COMMAND));
        assert!(!Message::new("Shutdown").is(SHUTDOWN_COMMAND));
    }
}
