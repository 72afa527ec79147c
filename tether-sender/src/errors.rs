//! Error types for tether-sender.

use std::{fmt, io};

use tether_mtproto::authentication;
use tether_mtproto::message::PlainError;
use tether_mtproto::transport;
use tether_tl_types::deserialize;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by the server in response to an RPC call.
///
/// Numeric values are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with the numeric suffix removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// Data center the server wants a request sent to, and why.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MigrateReason {
    File,
    Phone,
    Network,
    User,
    Stats,
}

/// Typed view of an [`RpcError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcErrorKind {
    FloodWait { seconds: u32 },
    FloodPremiumWait { seconds: u32 },
    SlowModeWait { seconds: u32 },
    TakeoutInitDelay { seconds: u32 },
    Migrate { reason: MigrateReason, dc_id: i32 },
    /// No pattern matched; inspect the raw code and name.
    Other,
}

type KindFn = fn(u32) -> RpcErrorKind;

/// Error names that carry a number, and what the number means.
static PATTERNS: &[(&str, KindFn)] = &[
    ("FLOOD_WAIT", |seconds| RpcErrorKind::FloodWait { seconds }),
    ("FLOOD_PREMIUM_WAIT", |seconds| RpcErrorKind::FloodPremiumWait { seconds }),
    ("SLOWMODE_WAIT", |seconds| RpcErrorKind::SlowModeWait { seconds }),
    ("TAKEOUT_INIT_DELAY", |seconds| RpcErrorKind::TakeoutInitDelay { seconds }),
    ("FILE_MIGRATE", |dc| migrate(MigrateReason::File, dc)),
    ("PHONE_MIGRATE", |dc| migrate(MigrateReason::Phone, dc)),
    ("NETWORK_MIGRATE", |dc| migrate(MigrateReason::Network, dc)),
    ("USER_MIGRATE", |dc| migrate(MigrateReason::User, dc)),
    ("STATS_MIGRATE", |dc| migrate(MigrateReason::Stats, dc)),
];

fn migrate(reason: MigrateReason, dc_id: u32) -> RpcErrorKind {
    RpcErrorKind::Migrate { reason, dc_id: dc_id as i32 }
}

/// Broad class of an RPC error, from its numeric code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    SeeOther,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    NotAcceptable,
    Flood,
    Internal,
    Timeout,
    Unknown,
}

impl RpcError {
    /// Parse a raw server error message like `"FLOOD_WAIT_30"` into an `RpcError`.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    let name = message[..idx].to_string();
                    return Self { code, name, value: Some(v) };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")` — exact match
    /// - `err.is("PHONE_CODE_*")` — starts-with match
    /// - `err.is("*_INVALID")` — ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    pub fn kind(&self) -> RpcErrorKind {
        let Some(value) = self.value else {
            return RpcErrorKind::Other;
        };
        PATTERNS
            .iter()
            .find(|(name, _)| *name == self.name)
            .map_or(RpcErrorKind::Other, |(_, make)| make(value))
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code {
            303 => ErrorCategory::SeeOther,
            400 => ErrorCategory::BadRequest,
            401 => ErrorCategory::Unauthorized,
            403 => ErrorCategory::Forbidden,
            404 => ErrorCategory::NotFound,
            406 => ErrorCategory::NotAcceptable,
            420 => ErrorCategory::Flood,
            500 => ErrorCategory::Internal,
            -503 => ErrorCategory::Timeout,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Seconds to wait before retrying, for any of the wait-style errors.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self.kind() {
            RpcErrorKind::FloodWait { seconds }
            | RpcErrorKind::FloodPremiumWait { seconds }
            | RpcErrorKind::SlowModeWait { seconds } => Some(u64::from(seconds)),
            _ => None,
        }
    }

    /// The data center to migrate to, if this is a `*_MIGRATE_n` error.
    pub fn migrate_to(&self) -> Option<(MigrateReason, i32)> {
        match self.kind() {
            RpcErrorKind::Migrate { reason, dc_id } => Some((reason, dc_id)),
            _ => None,
        }
    }
}

// ─── TransportError ───────────────────────────────────────────────────────────

/// Failure reading or writing frames. The connection is unusable afterwards.
#[derive(Debug)]
pub enum TransportError {
    Io(io::Error),
    /// The peer sent something that is not a valid frame, or a status code.
    Framing(transport::Error),
    /// The peer closed the connection.
    Closed,
}

impl TransportError {
    /// The server reported it does not know our auth key.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::Framing(transport::Error::BadStatus(-404)))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Framing(e) => write!(f, "framing error: {e}"),
            Self::Closed => write!(f, "connection closed by peer"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Framing(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<transport::Error> for TransportError {
    fn from(e: transport::Error) -> Self {
        Self::Framing(e)
    }
}

// ─── ConnectError ─────────────────────────────────────────────────────────────

/// Failure to bring a connection up.
#[derive(Debug)]
pub enum ConnectError {
    Transport(TransportError),
    /// The key exchange failed. Never retried on the same connection.
    Handshake(authentication::Error),
    /// A handshake answer was not a valid plaintext message.
    Plain(PlainError),
    Deserialize(deserialize::Error),
    /// Connecting or the key exchange took too long.
    Timeout,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Handshake(e) => write!(f, "auth key generation failed: {e}"),
            Self::Plain(e) => write!(f, "{e}"),
            Self::Deserialize(e) => write!(f, "deserialize error: {e}"),
            Self::Timeout => write!(f, "connect timed out"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Handshake(e) => Some(e),
            Self::Plain(e) => Some(e),
            Self::Deserialize(e) => Some(e),
            Self::Timeout => None,
        }
    }
}

impl From<TransportError> for ConnectError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}

impl From<authentication::Error> for ConnectError {
    fn from(e: authentication::Error) -> Self {
        Self::Handshake(e)
    }
}

impl From<PlainError> for ConnectError {
    fn from(e: PlainError) -> Self {
        Self::Plain(e)
    }
}

impl From<deserialize::Error> for ConnectError {
    fn from(e: deserialize::Error) -> Self {
        Self::Deserialize(e)
    }
}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any request sent through a
/// [`crate::Sender`] or [`crate::Client`].
#[derive(Debug)]
pub enum InvocationError {
    /// The server rejected the request.
    Rpc(RpcError),
    /// Network / I/O failure.
    Io(io::Error),
    /// Response deserialization failed.
    Deserialize(deserialize::Error),
    /// The request was dropped (e.g. the sender shut down).
    Dropped,
    /// The server refused the message itself with a `bad_msg_notification`
    /// code that cannot be corrected locally.
    BadMessage { code: i32 },
    /// The serialized request can never fit in a single message.
    PayloadTooLarge { len: usize },
    /// A connection to another data center could not be established.
    Connect(ConnectError),
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Deserialize(e) => write!(f, "deserialize error: {e}"),
            Self::Dropped => write!(f, "request dropped"),
            Self::BadMessage { code } => write!(f, "bad message (code {code})"),
            Self::PayloadTooLarge { len } => write!(f, "request of {len} bytes is too large"),
            Self::Connect(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Deserialize(e) => Some(e),
            Self::Connect(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for InvocationError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<deserialize::Error> for InvocationError {
    fn from(e: deserialize::Error) -> Self {
        Self::Deserialize(e)
    }
}

impl From<ConnectError> for InvocationError {
    fn from(e: ConnectError) -> Self {
        Self::Connect(e)
    }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _ => false,
        }
    }

    /// If this is a wait-style RPC error, returns how many seconds to wait.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::Rpc(e) => e.flood_wait_seconds(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_suffix_is_split_off() {
        let e = RpcError::from_telegram(420, "FLOOD_WAIT_30");
        assert_eq!(e, RpcError { code: 420, name: "FLOOD_WAIT".into(), value: Some(30) });
        assert_eq!(e.kind(), RpcErrorKind::FloodWait { seconds: 30 });
        assert_eq!(e.category(), ErrorCategory::Flood);

        let e = RpcError::from_telegram(400, "PEER_ID_INVALID");
        assert_eq!(e.value, None);
        assert_eq!(e.kind(), RpcErrorKind::Other);
        assert!(e.is("*_INVALID"));
        assert!(e.is("PEER_*"));
    }

    #[test]
    fn migrate_errors_carry_dc() {
        let e = RpcError::from_telegram(303, "PHONE_MIGRATE_4");
        assert_eq!(e.migrate_to(), Some((MigrateReason::Phone, 4)));
        assert_eq!(e.category(), ErrorCategory::SeeOther);
        assert_eq!(
            RpcError::from_telegram(303, "FILE_MIGRATE_2").kind(),
            RpcErrorKind::Migrate { reason: MigrateReason::File, dc_id: 2 }
        );
    }

    #[test]
    fn wait_variants() {
        let cases = [
            ("FLOOD_PREMIUM_WAIT_7", RpcErrorKind::FloodPremiumWait { seconds: 7 }),
            ("SLOWMODE_WAIT_60", RpcErrorKind::SlowModeWait { seconds: 60 }),
            ("TAKEOUT_INIT_DELAY_3600", RpcErrorKind::TakeoutInitDelay { seconds: 3600 }),
        ];
        for (message, kind) in cases {
            assert_eq!(RpcError::from_telegram(420, message).kind(), kind);
        }
        assert_eq!(
            InvocationError::Rpc(RpcError::from_telegram(420, "SLOWMODE_WAIT_9")).flood_wait_seconds(),
            Some(9)
        );
        assert_eq!(RpcError::from_telegram(-503, "Timeout").category(), ErrorCategory::Timeout);
    }

    #[test]
    fn missing_key_status() {
        assert!(TransportError::Framing(transport::Error::BadStatus(-404)).is_missing_key());
        assert!(!TransportError::Framing(transport::Error::BadStatus(-429)).is_missing_key());
    }
}
