//! Decoded messages and the plaintext framing used before a key exists.

use std::fmt;

/// One message taken out of a decrypted frame or a container.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Server-assigned message id.
    pub msg_id: i64,
    /// Odd for content-related messages, even otherwise.
    pub seq_no: i32,
    /// TL-serialized body, constructor ID first.
    pub body: Vec<u8>,
}

impl Message {
    /// The body's constructor ID, if the body is long enough to have one.
    pub fn constructor_id(&self) -> Option<u32> {
        constructor_id(&self.body)
    }

    /// Whether the server expects this message to be acknowledged.
    pub fn requires_ack(&self) -> bool {
        self.seq_no & 1 == 1
    }
}

impl From<tether_tl_types::types::Message> for Message {
    fn from(m: tether_tl_types::types::Message) -> Self {
        Self { msg_id: m.msg_id, seq_no: m.seqno, body: m.body }
    }
}

/// Read the leading constructor ID of a serialized object.
pub fn constructor_id(body: &[u8]) -> Option<u32> {
    let head: [u8; 4] = body.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(head))
}

// ─── Plaintext framing ───────────────────────────────────────────────────────

/// Errors from [`unpack_plain`].
#[derive(Clone, Debug, PartialEq)]
pub enum PlainError {
    /// Fewer than the 20 header bytes.
    TooShort { len: usize },
    /// The frame carries an auth key id, so it is not a plaintext message.
    NonZeroKeyId { key_id: i64 },
    /// The declared body length does not match the frame.
    BadLength { declared: i32, available: usize },
}

impl fmt::Display for PlainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "plaintext frame too short ({len} bytes)"),
            Self::NonZeroKeyId { key_id } => write!(f, "plaintext frame has auth_key_id {key_id}"),
            Self::BadLength { declared, available } => {
                write!(f, "plaintext body length {declared} with {available} bytes available")
            }
        }
    }
}
impl std::error::Error for PlainError {}

/// Frame `body` as an unencrypted message:
///
/// ```text
/// auth_key_id:long = 0
/// message_id:long
/// message_data_length:int
/// message_data:bytes
/// ```
pub fn pack_plain(msg_id: i64, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20 + body.len());
    buf.extend(0i64.to_le_bytes());
    buf.extend(msg_id.to_le_bytes());
    buf.extend((body.len() as i32).to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Split an unencrypted frame into its message id and body.
pub fn unpack_plain(frame: &[u8]) -> Result<(i64, &[u8]), PlainError> {
    if frame.len() < 20 {
        return Err(PlainError::TooShort { len: frame.len() });
    }
    let word = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&frame[at..at + 8]);
        i64::from_le_bytes(b)
    };
    let key_id = word(0);
    if key_id != 0 {
        return Err(PlainError::NonZeroKeyId { key_id });
    }
    let msg_id = word(8);
    let mut len = [0u8; 4];
    len.copy_from_slice(&frame[16..20]);
    let declared = i32::from_le_bytes(len);
    let available = frame.len() - 20;
    match usize::try_from(declared) {
        Ok(n) if n <= available => Ok((msg_id, &frame[20..20 + n])),
        _ => Err(PlainError::BadLength { declared, available }),
    }
}
