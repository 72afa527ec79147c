//! MTProto service functions.
//!
//! Serialized with their constructor ID. Each implements
//! [`crate::RemoteCall`] with the boxed type the server answers with.

use crate::{Deserializable, Identifiable, Serializable, enums};

// ─── Key exchange ────────────────────────────────────────────────────────────

tl_function! {
    /// `req_pq_multi#be7e8ef1`
    ReqPqMulti = 0xbe7e8ef1 {
        nonce: [u8; 16],
    } -> enums::ResPq
}

tl_function! {
    /// `req_DH_params#d712e4be`
    ReqDhParams = 0xd712e4be {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        p: Vec<u8>,
        q: Vec<u8>,
        public_key_fingerprint: i64,
        encrypted_data: Vec<u8>,
    } -> enums::ServerDhParams
}

tl_function! {
    /// `set_client_DH_params#f5045f1f`
    SetClientDhParams = 0xf5045f1f {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_data: Vec<u8>,
    } -> enums::SetClientDhParamsAnswer
}

// ─── Session control ─────────────────────────────────────────────────────────

tl_function! {
    /// `ping#7abe77ec`
    Ping = 0x7abe77ec {
        ping_id: i64,
    } -> enums::Pong
}

tl_function! {
    /// `ping_delay_disconnect#f3427b8c`
    ///
    /// Asks the server to drop the connection if no further ping arrives
    /// within `disconnect_delay` seconds.
    PingDelayDisconnect = 0xf3427b8c {
        ping_id: i64,
        disconnect_delay: i32,
    } -> enums::Pong
}

tl_function! {
    /// `get_future_salts#b921bd04`
    GetFutureSalts = 0xb921bd04 {
        num: i32,
    } -> enums::FutureSalts
}

tl_function! {
    /// `destroy_session#e7512126`
    DestroySession = 0xe7512126 {
        session_id: i64,
    } -> enums::DestroySessionRes
}

// ─── invokeAfterMsg ──────────────────────────────────────────────────────────

/// `invokeAfterMsg#cb9f372d {X:Type} msg_id:long query:!X = X`
///
/// The server runs `query` only once the message `msg_id` has been processed.
/// `query` holds an already-serialized request.
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeAfterMsg {
    pub msg_id: i64,
    pub query: Vec<u8>,
}

impl Identifiable for InvokeAfterMsg {
    const CONSTRUCTOR_ID: u32 = 0xcb9f372d;
}

impl Serializable for InvokeAfterMsg {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        buf.extend(self.query.iter().copied());
    }
}

impl Deserializable for InvokeAfterMsg {
    fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(crate::deserialize::Error::UnexpectedConstructor { id });
        }
        let msg_id = i64::deserialize(buf)?;
        Ok(Self { msg_id, query: buf.take_rest().to_vec() })
    }
}
