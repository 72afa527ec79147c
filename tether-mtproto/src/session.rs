//! MTProto 2.0 client session state.
//!
//! A [`Session`] owns everything that changes per message: the session id,
//! sequence counter, last issued message id, current salt and clock offset.
//! The auth key is supplied by the owner and survives [`Session::reset`].

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::Compression;
use flate2::write::GzEncoder;
use tether_crypto::{AuthKey, DequeBuffer, decrypt_data_v2, encrypt_data_v2};
use tether_tl_types::{Identifiable, Serializable, enums, functions, types};

use crate::message::{Message, constructor_id};

/// Messages older than this many seconds are dropped.
const MSG_TOO_OLD_DELTA: i64 = 300;
/// Messages this many seconds ahead of our clock move the clock offset.
const MSG_TOO_NEW_DELTA: i64 = 30;
/// Size of the window of recently seen server message ids.
const RECENT_REMOTE_IDS: usize = 500;
/// Consecutive ignored messages tolerated before giving up on the session.
const MAX_CONSECUTIVE_IGNORED: u32 = 10;
/// Content-related bodies above this size are gzip-packed if that helps.
const GZIP_THRESHOLD: usize = 512;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors from [`Session::encrypt_message_data`].
#[derive(Clone, Debug, PartialEq)]
pub enum EncryptError {
    /// No auth key has been set yet.
    MissingAuthKey,
}

impl fmt::Display for EncryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAuthKey => write!(f, "no auth key to encrypt with"),
        }
    }
}
impl std::error::Error for EncryptError {}

/// Errors from [`Session::decrypt_message_data`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// No auth key has been set yet.
    MissingAuthKey,
    /// The frame did not decrypt under our key.
    Crypto(tether_crypto::DecryptError),
    /// The decrypted plaintext is too short or its length field is wrong.
    FrameTooShort,
    /// The frame belongs to another session.
    SessionMismatch { got: i64, expected: i64 },
    /// Server message ids are always odd.
    EvenMessageId(i64),
    /// Too many replayed or stale messages in a row.
    TooManyIgnored(u32),
}

impl DecryptError {
    /// Whether the frame proves our auth key is not the server's.
    pub fn is_broken_key(&self) -> bool {
        matches!(
            self,
            Self::Crypto(
                tether_crypto::DecryptError::AuthKeyMismatch
                    | tether_crypto::DecryptError::MessageKeyMismatch
            )
        )
    }
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAuthKey => write!(f, "no auth key to decrypt with"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::FrameTooShort => write!(f, "inner plaintext too short"),
            Self::SessionMismatch { got, expected } => {
                write!(f, "session_id mismatch: got {got}, expected {expected}")
            }
            Self::EvenMessageId(id) => write!(f, "server sent even msg_id {id}"),
            Self::TooManyIgnored(n) => write!(f, "{n} messages ignored in a row"),
        }
    }
}

impl std::error::Error for DecryptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Crypto(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tether_crypto::DecryptError> for DecryptError {
    fn from(e: tether_crypto::DecryptError) -> Self {
        Self::Crypto(e)
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

fn unix_now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Per-connection MTProto state.
pub struct Session {
    auth_key: Option<AuthKey>,
    session_id: i64,
    sequence: i32,
    last_msg_id: i64,
    salt: i64,
    time_offset: i32,
    recent_remote_ids: VecDeque<i64>,
    highest_remote_id: i64,
    ignore_count: u32,
}

impl Session {
    /// A fresh session with a random id.
    pub fn new(auth_key: Option<AuthKey>) -> Self {
        Self {
            auth_key,
            session_id: tether_crypto::random_i64(),
            sequence: 0,
            last_msg_id: 0,
            salt: 0,
            time_offset: 0,
            recent_remote_ids: VecDeque::with_capacity(RECENT_REMOTE_IDS),
            highest_remote_id: 0,
            ignore_count: 0,
        }
    }

    /// Start over as a new session on the same key.
    ///
    /// The time offset is kept; it describes our clock, not the session.
    pub fn reset(&mut self) {
        self.session_id = tether_crypto::random_i64();
        self.sequence = 0;
        self.last_msg_id = 0;
        self.salt = 0;
        self.recent_remote_ids.clear();
        self.highest_remote_id = 0;
        self.ignore_count = 0;
        log::debug!("session reset, new id {}", self.session_id);
    }

    pub fn auth_key(&self) -> Option<&AuthKey> {
        self.auth_key.as_ref()
    }

    pub fn set_auth_key(&mut self, auth_key: Option<AuthKey>) {
        self.auth_key = auth_key;
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn salt(&self) -> i64 {
        self.salt
    }

    pub fn set_salt(&mut self, salt: i64) {
        self.salt = salt;
    }

    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    pub fn set_time_offset(&mut self, offset: i32) {
        self.time_offset = offset;
    }

    /// Shift the content counter after a `msg_seqno too low/high` notice.
    pub fn adjust_sequence(&mut self, delta: i32) {
        self.sequence = self.sequence.saturating_add(delta).max(0);
    }

    // ── ids and sequence numbers ────────────────────────────────────────────

    /// A message id strictly greater than every id issued before.
    pub fn new_msg_id(&mut self) -> i64 {
        self.msg_id_at(unix_now())
    }

    fn msg_id_at(&mut self, now: Duration) -> i64 {
        let secs = (now.as_secs() as i64).wrapping_add(i64::from(self.time_offset));
        let nanos = i64::from(now.subsec_nanos());
        let mut id = (secs << 32) | (nanos << 2);
        if self.last_msg_id >= id {
            id = self.last_msg_id + 4;
        }
        self.last_msg_id = id;
        id
    }

    /// Odd and advancing for content-related messages, even otherwise.
    pub fn seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.sequence * 2 + 1;
            self.sequence += 1;
            n
        } else {
            self.sequence * 2
        }
    }

    /// Recompute the clock offset from a message id the server vouched for.
    ///
    /// Returns the new offset. Issued ids restart from the corrected clock
    /// when the offset changed.
    pub fn update_time_offset(&mut self, correct_msg_id: i64) -> i32 {
        let now = unix_now().as_secs() as i64;
        let correct = correct_msg_id >> 32;
        let old = self.time_offset;
        self.time_offset = (correct - now) as i32;
        if self.time_offset != old {
            self.last_msg_id = 0;
            log::info!("updated time offset: {old} → {}", self.time_offset);
        }
        self.time_offset
    }

    // ── framing ─────────────────────────────────────────────────────────────

    /// Append `msg_id ‖ seq_no ‖ len ‖ body` for `data` to `buf`.
    ///
    /// With `after_id`, the body becomes `invokeAfterMsg(after_id, data)`.
    /// Large content-related bodies are gzip-packed when that shrinks them.
    pub fn write_data_as_message(
        &mut self,
        buf: &mut Vec<u8>,
        data: &[u8],
        content_related: bool,
        after_id: Option<i64>,
    ) -> i64 {
        let msg_id = self.new_msg_id();
        let seq_no = self.seq_no(content_related);

        let wrapped;
        let data = match after_id {
            Some(after) => {
                wrapped = functions::InvokeAfterMsg { msg_id: after, query: data.to_vec() }
                    .to_bytes();
                &wrapped[..]
            }
            None => data,
        };
        let body = gzip_if_smaller(content_related, data);

        msg_id.serialize(buf);
        seq_no.serialize(buf);
        (body.len() as i32).serialize(buf);
        buf.extend_from_slice(&body);
        msg_id
    }

    // ── encryption ──────────────────────────────────────────────────────────

    /// Encrypt serialized message(s) for the wire.
    ///
    /// The result is `key_id ‖ msg_key ‖ AES-IGE(salt ‖ session_id ‖ data ‖ padding)`.
    pub fn encrypt_message_data(&self, data: &[u8]) -> Result<Vec<u8>, EncryptError> {
        let auth_key = self.auth_key.as_ref().ok_or(EncryptError::MissingAuthKey)?;
        let mut buffer = DequeBuffer::with_capacity(16 + data.len() + 32, 24);
        buffer.extend(self.salt.to_le_bytes());
        buffer.extend(self.session_id.to_le_bytes());
        buffer.extend(data.iter().copied());
        encrypt_data_v2(&mut buffer, auth_key);
        Ok(buffer.to_vec())
    }

    /// Decrypt and validate one frame from the server.
    ///
    /// `Ok(None)` means the message was a replay or too old and has been
    /// dropped. A message too far ahead of our clock corrects the time
    /// offset instead. A key-id or integrity failure leaves the
    /// session untouched.
    pub fn decrypt_message_data(&mut self, frame: &mut [u8]) -> Result<Option<Message>, DecryptError> {
        let auth_key = self.auth_key.as_ref().ok_or(DecryptError::MissingAuthKey)?;
        let plain = decrypt_data_v2(frame, auth_key)?;

        if plain.len() < 32 {
            return Err(DecryptError::FrameTooShort);
        }
        let long = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&plain[at..at + 8]);
            i64::from_le_bytes(b)
        };
        let session_id = long(8);
        let msg_id = long(16);
        let mut word = [0u8; 4];
        word.copy_from_slice(&plain[24..28]);
        let seq_no = i32::from_le_bytes(word);
        word.copy_from_slice(&plain[28..32]);
        let len = i32::from_le_bytes(word);

        if session_id != self.session_id {
            return Err(DecryptError::SessionMismatch { got: session_id, expected: self.session_id });
        }
        if msg_id & 1 == 0 {
            return Err(DecryptError::EvenMessageId(msg_id));
        }
        let body = usize::try_from(len)
            .ok()
            .and_then(|len| plain.get(32..32 + len))
            .ok_or(DecryptError::FrameTooShort)?;

        if msg_id <= self.highest_remote_id && self.recent_remote_ids.contains(&msg_id) {
            log::warn!("server resent message {msg_id}, ignoring");
            self.count_ignored()?;
            return Ok(None);
        }

        let exempt = constructor_id(body).is_some_and(|id| {
            id == types::BadServerSalt::CONSTRUCTOR_ID
                || id == types::BadMsgNotification::CONSTRUCTOR_ID
        });
        if !exempt {
            let local = unix_now().as_secs() as i64 + i64::from(self.time_offset);
            let delta = local - (msg_id >> 32);
            if delta > MSG_TOO_OLD_DELTA {
                log::warn!("server sent a very old message {msg_id}, ignoring");
                self.count_ignored()?;
                return Ok(None);
            }
            if -delta > MSG_TOO_NEW_DELTA {
                // Authenticated and newer than anything a replay could carry:
                // our clock is behind the server's.
                log::info!("server message {msg_id} is ahead of our clock, resyncing");
                self.update_time_offset(msg_id);
            }
        }

        let body = body.to_vec();
        if self.recent_remote_ids.len() == RECENT_REMOTE_IDS {
            self.recent_remote_ids.pop_front();
        }
        self.recent_remote_ids.push_back(msg_id);
        self.highest_remote_id = self.highest_remote_id.max(msg_id);
        self.ignore_count = 0;

        Ok(Some(Message { msg_id, seq_no, body }))
    }

    fn count_ignored(&mut self) -> Result<(), DecryptError> {
        self.ignore_count += 1;
        if self.ignore_count > MAX_CONSECUTIVE_IGNORED {
            return Err(DecryptError::TooManyIgnored(self.ignore_count));
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("auth_key", &self.auth_key)
            .field("session_id", &self.session_id)
            .field("sequence", &self.sequence)
            .field("salt", &self.salt)
            .field("time_offset", &self.time_offset)
            .finish_non_exhaustive()
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// `gzip_packed` of `data` if it is content-related, large, and compresses.
fn gzip_if_smaller(content_related: bool, data: &[u8]) -> Vec<u8> {
    if content_related && data.len() > GZIP_THRESHOLD {
        if let Ok(packed_data) = gzip(data) {
            let gzipped = enums::GzipPacked::from(types::GzipPacked { packed_data }).to_bytes();
            if gzipped.len() < data.len() {
                return gzipped;
            }
        }
    }
    data.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_crypto::{Side, decrypt_data_v2_as, encrypt_data_v2_as};

    fn keyed() -> Session {
        let mut s = Session::new(Some(AuthKey::from_bytes([0x11; 256])));
        s.set_salt(77);
        s
    }

    #[test]
    fn msg_ids_survive_clock_stutter() {
        let mut s = Session::new(None);
        let t = Duration::new(1_700_000_000, 123_456_789);
        let a = s.msg_id_at(t);
        let b = s.msg_id_at(t);
        let c = s.msg_id_at(t - Duration::from_secs(5));
        assert_eq!(a % 4, 0);
        assert_eq!(b, a + 4);
        assert_eq!(c, b + 4);
    }

    #[test]
    fn msg_id_encodes_corrected_time() {
        let mut s = Session::new(None);
        s.set_time_offset(-100);
        let id = s.msg_id_at(Duration::from_secs(1_700_000_000));
        assert_eq!(id >> 32, 1_700_000_000 - 100);
    }

    #[test]
    fn seq_no_parity() {
        let mut s = Session::new(None);
        assert_eq!(s.seq_no(false), 0);
        assert_eq!(s.seq_no(true), 1);
        assert_eq!(s.seq_no(true), 3);
        assert_eq!(s.seq_no(false), 4);
        s.adjust_sequence(64);
        assert_eq!(s.seq_no(true), 2 * 66 + 1);
    }

    #[test]
    fn time_offset_restarts_ids() {
        let mut s = Session::new(None);
        let far_future = s.msg_id_at(Duration::from_secs(4_000_000_000));
        let correct = (unix_now().as_secs() as i64) << 32;
        s.update_time_offset(correct + 4 * 1000);
        assert_eq!(s.time_offset(), 0);
        // The offset did not change from 0, so the stale id is kept.
        assert!(s.new_msg_id() > far_future);

        let ahead = ((unix_now().as_secs() as i64) + 3600) << 32;
        s.update_time_offset(ahead);
        assert!((3599..=3600).contains(&s.time_offset()));
        let id = s.new_msg_id();
        assert!(id < far_future, "ids restart from the corrected clock");
    }

    #[test]
    fn gzip_only_for_large_content() {
        let data = vec![0u8; 2048];
        let packed = gzip_if_smaller(true, &data);
        assert_eq!(constructor_id(&packed), Some(types::GzipPacked::CONSTRUCTOR_ID));
        assert!(packed.len() < data.len());
        assert_eq!(gzip_if_smaller(false, &data), data);
        assert_eq!(gzip_if_smaller(true, &data[..100]), &data[..100]);
    }

    #[test]
    fn invoke_after_wraps_body() {
        let mut s = Session::new(None);
        let mut buf = Vec::new();
        let id = s.write_data_as_message(&mut buf, &[1, 2, 3, 4], true, Some(42));
        assert_eq!(&buf[..8], &id.to_le_bytes());
        assert_eq!(&buf[8..12], &1i32.to_le_bytes());
        assert_eq!(&buf[12..16], &16i32.to_le_bytes());
        assert_eq!(&buf[16..20], &functions::InvokeAfterMsg::CONSTRUCTOR_ID.to_le_bytes());
        assert_eq!(&buf[20..28], &42i64.to_le_bytes());
        assert_eq!(&buf[28..], &[1, 2, 3, 4]);
    }

    /// What a server would send: salt, our session id, then one message.
    fn server_frame(s: &Session, msg_id: i64, seq_no: i32, body: &[u8]) -> Vec<u8> {
        let mut buffer = DequeBuffer::with_capacity(64 + body.len(), 24);
        buffer.extend(s.salt().to_le_bytes());
        buffer.extend(s.session_id().to_le_bytes());
        buffer.extend(msg_id.to_le_bytes());
        buffer.extend(seq_no.to_le_bytes());
        buffer.extend((body.len() as i32).to_le_bytes());
        buffer.extend(body.iter().copied());
        encrypt_data_v2_as(&mut buffer, s.auth_key().unwrap(), Side::Server);
        buffer.to_vec()
    }

    fn server_msg_id(offset_secs: i64) -> i64 {
        ((unix_now().as_secs() as i64 + offset_secs) << 32) | 1
    }

    #[test]
    fn encrypted_payload_reaches_server() {
        let mut s = keyed();
        let mut data = Vec::new();
        s.write_data_as_message(&mut data, &[5u8; 12], true, None);
        let mut wire = s.encrypt_message_data(&data).unwrap();
        let plain = decrypt_data_v2_as(&mut wire, s.auth_key().unwrap(), Side::Client).unwrap();
        assert_eq!(&plain[..8], &77i64.to_le_bytes());
        assert_eq!(&plain[8..16], &s.session_id().to_le_bytes());
        assert_eq!(&plain[16..16 + data.len()], data.as_slice());
        let padding = plain.len() - 16 - data.len();
        assert!((12..=27).contains(&padding));
    }

    #[test]
    fn decrypts_and_drops_replays() {
        let mut s = keyed();
        let id = server_msg_id(0);
        let frame = server_frame(&s, id, 1, &[9, 9, 9, 9]);

        let msg = s.decrypt_message_data(&mut frame.clone()).unwrap().unwrap();
        assert_eq!(msg, Message { msg_id: id, seq_no: 1, body: vec![9, 9, 9, 9] });
        assert_eq!(s.decrypt_message_data(&mut frame.clone()), Ok(None));
    }

    #[test]
    fn stale_messages_are_ignored_unless_salt_notice() {
        let mut s = keyed();
        let old = server_msg_id(-1000);
        let frame = server_frame(&s, old, 1, &[1, 2, 3, 4]);
        assert_eq!(s.decrypt_message_data(&mut frame.clone()), Ok(None));

        let notice = server_frame(&s, old + 4, 2, &types::BadServerSalt::CONSTRUCTOR_ID.to_le_bytes());
        assert!(s.decrypt_message_data(&mut notice.clone()).unwrap().is_some());
    }

    #[test]
    fn eleventh_ignored_message_is_fatal() {
        let mut s = keyed();
        let stale = server_msg_id(-1000);
        let frame = server_frame(&s, stale, 1, &[0; 4]);
        for _ in 0..MAX_CONSECUTIVE_IGNORED {
            assert_eq!(s.decrypt_message_data(&mut frame.clone()), Ok(None));
        }
        assert_eq!(
            s.decrypt_message_data(&mut frame.clone()),
            Err(DecryptError::TooManyIgnored(MAX_CONSECUTIVE_IGNORED + 1))
        );
    }

    #[test]
    fn slow_clock_is_corrected_by_the_server() {
        let mut s = keyed();
        s.set_time_offset(-60);
        for i in 0..=MAX_CONSECUTIVE_IGNORED as i64 {
            let frame = server_frame(&s, server_msg_id(0) + 4 * i, 1, &[0; 4]);
            assert!(s.decrypt_message_data(&mut frame.clone()).unwrap().is_some());
        }
        assert!((-1..=0).contains(&s.time_offset()), "offset {}", s.time_offset());
        s.reset();
        assert!((-1..=0).contains(&s.time_offset()));
    }

    #[test]
    fn even_server_id_is_rejected() {
        let mut s = keyed();
        let frame = server_frame(&s, server_msg_id(0) & !1, 1, &[0; 4]);
        assert!(matches!(
            s.decrypt_message_data(&mut frame.clone()),
            Err(DecryptError::EvenMessageId(_))
        ));
    }

    #[test]
    fn reset_forgets_session_but_keeps_key() {
        let mut s = keyed();
        s.seq_no(true);
        let before = s.session_id();
        s.reset();
        assert_ne!(s.session_id(), before);
        assert_eq!(s.salt(), 0);
        assert_eq!(s.seq_no(false), 0);
        assert!(s.auth_key().is_some());
    }
}
