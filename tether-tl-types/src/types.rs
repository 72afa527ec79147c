//! Bare MTProto service constructors.
//!
//! Serialized without their constructor ID; wrap them in the matching
//! [`crate::enums`] variant to get the boxed form.

use crate::{Deserializable, RawVec, Serializable};

// ─── Key exchange ────────────────────────────────────────────────────────────

tl_type! {
    /// `resPQ#05162463`
    ResPq = 0x05162463 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        pq: Vec<u8>,
        server_public_key_fingerprints: Vec<i64>,
    }
}

tl_type! {
    /// `p_q_inner_data#83c95aec`
    PQInnerData = 0x83c95aec {
        pq: Vec<u8>,
        p: Vec<u8>,
        q: Vec<u8>,
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce: [u8; 32],
    }
}

tl_type! {
    /// `server_DH_params_fail#79cb045d`
    ServerDhParamsFail = 0x79cb045d {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
    }
}

tl_type! {
    /// `server_DH_params_ok#d0e8075c`
    ServerDhParamsOk = 0xd0e8075c {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_answer: Vec<u8>,
    }
}

tl_type! {
    /// `server_DH_inner_data#b5890dba`
    ServerDhInnerData = 0xb5890dba {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        g: i32,
        dh_prime: Vec<u8>,
        g_a: Vec<u8>,
        server_time: i32,
    }
}

tl_type! {
    /// `client_DH_inner_data#6643b654`
    ClientDhInnerData = 0x6643b654 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        retry_id: i64,
        g_b: Vec<u8>,
    }
}

tl_type! {
    /// `dh_gen_ok#3bcbf734`
    DhGenOk = 0x3bcbf734 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash1: [u8; 16],
    }
}

tl_type! {
    /// `dh_gen_retry#46dc1fb9`
    DhGenRetry = 0x46dc1fb9 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash2: [u8; 16],
    }
}

tl_type! {
    /// `dh_gen_fail#a69dae02`
    DhGenFail = 0xa69dae02 {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash3: [u8; 16],
    }
}

// ─── Service messages ────────────────────────────────────────────────────────

/// `rpc_result#f35c6d01 req_msg_id:long result:Object`
///
/// `result` is kept as raw bytes (constructor ID included) because its type
/// depends on the request it answers.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl crate::Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl crate::Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.req_msg_id.serialize(buf);
        buf.extend(self.result.iter().copied());
    }
}

impl crate::Deserializable for RpcResult {
    fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
        let req_msg_id = i64::deserialize(buf)?;
        Ok(Self { req_msg_id, result: buf.take_rest().to_vec() })
    }
}

tl_type! {
    /// `rpc_error#2144ca19`
    RpcError = 0x2144ca19 {
        error_code: i32,
        error_message: String,
    }
}

tl_type! {
    /// `future_salt#0949d9dc`
    FutureSalt = 0x0949d9dc {
        valid_since: i32,
        valid_until: i32,
        salt: i64,
    }
}

tl_type! {
    /// `future_salts#ae500895`
    FutureSalts = 0xae500895 {
        req_msg_id: i64,
        now: i32,
        salts: RawVec<FutureSalt>,
    }
}

tl_type! {
    /// `pong#347773c5`
    Pong = 0x347773c5 {
        msg_id: i64,
        ping_id: i64,
    }
}

tl_type! {
    /// `new_session_created#9ec20908`
    NewSessionCreated = 0x9ec20908 {
        first_msg_id: i64,
        unique_id: i64,
        server_salt: i64,
    }
}

/// One entry of a `msg_container`: `msg_id:long seqno:int bytes:int body:Object`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id: i64,
    pub seqno: i32,
    pub body: Vec<u8>,
}

impl crate::Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seqno.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl crate::Deserializable for Message {
    fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seqno = i32::deserialize(buf)?;
        let len = i32::deserialize(buf)?;
        let len = usize::try_from(len).map_err(|_| crate::deserialize::Error::UnexpectedEof)?;
        let body = buf.take(len)?.to_vec();
        Ok(Self { msg_id, seqno, body })
    }
}

tl_type! {
    /// `msg_container#73f1f8dc`
    MsgContainer = 0x73f1f8dc {
        messages: RawVec<Message>,
    }
}

tl_type! {
    /// `msgs_ack#62d6b459`
    MsgsAck = 0x62d6b459 {
        msg_ids: Vec<i64>,
    }
}

tl_type! {
    /// `bad_msg_notification#a7eff811`
    BadMsgNotification = 0xa7eff811 {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
    }
}

tl_type! {
    /// `bad_server_salt#edab447b`
    BadServerSalt = 0xedab447b {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
        new_server_salt: i64,
    }
}

tl_type! {
    /// `msgs_state_req#da69fb52`
    MsgsStateReq = 0xda69fb52 {
        msg_ids: Vec<i64>,
    }
}

tl_type! {
    /// `msgs_state_info#04deb57d`
    MsgsStateInfo = 0x04deb57d {
        req_msg_id: i64,
        info: Vec<u8>,
    }
}

tl_type! {
    /// `msgs_all_info#8cc0d131`
    MsgsAllInfo = 0x8cc0d131 {
        msg_ids: Vec<i64>,
        info: Vec<u8>,
    }
}

tl_type! {
    /// `msg_resend_req#7d861a08`
    MsgResendReq = 0x7d861a08 {
        msg_ids: Vec<i64>,
    }
}

tl_type! {
    /// `msg_detailed_info#276d3ec6`
    MsgDetailedInfo = 0x276d3ec6 {
        msg_id: i64,
        answer_msg_id: i64,
        bytes: i32,
        status: i32,
    }
}

tl_type! {
    /// `msg_new_detailed_info#809db6df`
    MsgNewDetailedInfo = 0x809db6df {
        answer_msg_id: i64,
        bytes: i32,
        status: i32,
    }
}

tl_type! {
    /// `gzip_packed#3072cfa1`
    GzipPacked = 0x3072cfa1 {
        packed_data: Vec<u8>,
    }
}

tl_type! {
    /// `destroy_session_ok#e22045fc`
    DestroySessionOk = 0xe22045fc {
        session_id: i64,
    }
}

tl_type! {
    /// `destroy_session_none#62d350c9`
    DestroySessionNone = 0x62d350c9 {
        session_id: i64,
    }
}
