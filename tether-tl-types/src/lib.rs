//! TL binary serialization and the MTProto service schema.
//!
//! # Overview
//!
//! | Module        | Contents                                                   |
//! |---------------|------------------------------------------------------------|
//! | [`types`]     | Concrete constructors (bare types) as `struct`s            |
//! | [`functions`] | RPC functions as `struct`s implementing [`RemoteCall`]     |
//! | [`enums`]     | Boxed types as `enum`s implementing [`Deserializable`]     |
//!
//! Only the service layer (key exchange, acknowledgements, containers, salts,
//! pings) is described here. Higher-level API requests are opaque to the
//! transport: anything implementing [`RemoteCall`] can be sent.
//!
//! ```rust
//! use tether_tl_types::{functions, Serializable};
//!
//! let req = functions::Ping { ping_id: 42 };
//! let bytes = req.to_bytes();
//! assert_eq!(&bytes[..4], &0x7abe77ecu32.to_le_bytes());
//! ```

#![deny(unsafe_code)]

#[macro_use]
mod macros;

pub mod deserialize;
pub mod enums;
pub mod functions;
pub mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// Bare vector: `vector` (lowercase) as opposed to the boxed `Vector`.
///
/// Used where the schema sends a length-prefixed list without the usual
/// `0x1cb5c415` constructor ID header, e.g. inside `msg_container`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Opaque blob of bytes that should be passed through without interpretation.
///
/// Used as the return type of requests whose answer the caller decodes itself.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

impl Serializable for Blob {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
}

impl Deserializable for Blob {
    fn deserialize(buf: deserialize::Buffer) -> deserialize::Result<Self> {
        Ok(Self(buf.take_rest().to_vec()))
    }
}

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Every schema type has a unique 32-bit constructor ID.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function type that can be sent to the server as an RPC call.
///
/// `Return` is the type the server will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;
}

/// Constructor ID of the boxed `Vector<T>`.
pub const VECTOR_ID: u32 = 0x1cb5c415;
/// `boolTrue`.
pub const BOOL_TRUE_ID: u32 = 0x997275b5;
/// `boolFalse`.
pub const BOOL_FALSE_ID: u32 = 0xbc799737;

/// Returns the TL name for a known service constructor ID.
#[cfg(feature = "name-for-id")]
pub fn name_for_id(id: u32) -> Option<&'static str> {
    Some(match id {
        0x05162463 => "resPQ",
        0x83c95aec => "p_q_inner_data",
        0x79cb045d => "server_DH_params_fail",
        0xd0e8075c => "server_DH_params_ok",
        0xb5890dba => "server_DH_inner_data",
        0x6643b654 => "client_DH_inner_data",
        0x3bcbf734 => "dh_gen_ok",
        0x46dc1fb9 => "dh_gen_retry",
        0xa69dae02 => "dh_gen_fail",
        0xf35c6d01 => "rpc_result",
        0x2144ca19 => "rpc_error",
        0x0949d9dc => "future_salt",
        0xae500895 => "future_salts",
        0x347773c5 => "pong",
        0x9ec20908 => "new_session_created",
        0x73f1f8dc => "msg_container",
        0x62d6b459 => "msgs_ack",
        0xa7eff811 => "bad_msg_notification",
        0xedab447b => "bad_server_salt",
        0xda69fb52 => "msgs_state_req",
        0x04deb57d => "msgs_state_info",
        0x8cc0d131 => "msgs_all_info",
        0x7d861a08 => "msg_resend_req",
        0x276d3ec6 => "msg_detailed_info",
        0x809db6df => "msg_new_detailed_info",
        0x3072cfa1 => "gzip_packed",
        0xe22045fc => "destroy_session_ok",
        0x62d350c9 => "destroy_session_none",
        0xbe7e8ef1 => "req_pq_multi",
        0xd712e4be => "req_DH_params",
        0xf5045f1f => "set_client_DH_params",
        0x7abe77ec => "ping",
        0xf3427b8c => "ping_delay_disconnect",
        0xb921bd04 => "get_future_salts",
        0xe7512126 => "destroy_session",
        0xcb9f372d => "invokeAfterMsg",
        VECTOR_ID => "vector",
        BOOL_TRUE_ID => "boolTrue",
        BOOL_FALSE_ID => "boolFalse",
        _ => return None,
    })
}
