//! Classification of decrypted message bodies.
//!
//! Every body the server sends is either one of a fixed set of service
//! messages or something the session layer does not interpret (an update,
//! or a result for an API call). [`Incoming`] is that closed set; anything
//! unrecognised ends up in [`Incoming::Other`].

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use tether_tl_types::deserialize::{Error, Result};
use tether_tl_types::{Deserializable, Identifiable, enums, types};

use crate::message::{Message, constructor_id};

/// A decoded service message, or an opaque body.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    RpcResult(types::RpcResult),
    Container(Vec<Message>),
    /// Already inflated; classify the contents again.
    GzipPacked(Vec<u8>),
    Pong(types::Pong),
    BadServerSalt(types::BadServerSalt),
    BadMsgNotification(types::BadMsgNotification),
    /// `msg_detailed_info` or `msg_new_detailed_info`.
    DetailedInfo { answer_msg_id: i64 },
    NewSessionCreated(types::NewSessionCreated),
    MsgsAck(types::MsgsAck),
    FutureSalts(types::FutureSalts),
    /// `msgs_state_req` or `msg_resend_req`: the ids the server asks about.
    StateRequest { msg_ids: Vec<i64> },
    MsgsAllInfo(types::MsgsAllInfo),
    /// `destroy_session_ok` or `destroy_session_none`.
    DestroySession { session_id: i64 },
    /// Not a service message.
    Other(Vec<u8>),
}

impl Incoming {
    /// Decode `body` by its leading constructor ID.
    pub fn classify(body: &[u8]) -> Result<Self> {
        let id = constructor_id(body).ok_or(Error::UnexpectedEof)?;
        let incoming = match id {
            types::RpcResult::CONSTRUCTOR_ID => {
                let enums::RpcResult::RpcResult(r) = enums::RpcResult::from_bytes(body)?;
                Self::RpcResult(r)
            }
            types::MsgContainer::CONSTRUCTOR_ID => {
                let enums::MessageContainer::MsgContainer(c) =
                    enums::MessageContainer::from_bytes(body)?;
                Self::Container(c.messages.0.into_iter().map(Message::from).collect())
            }
            types::GzipPacked::CONSTRUCTOR_ID => {
                let enums::GzipPacked::GzipPacked(g) = enums::GzipPacked::from_bytes(body)?;
                Self::GzipPacked(gunzip(&g.packed_data).map_err(|_| Error::UnexpectedEof)?)
            }
            types::Pong::CONSTRUCTOR_ID => {
                let enums::Pong::Pong(p) = enums::Pong::from_bytes(body)?;
                Self::Pong(p)
            }
            types::BadServerSalt::CONSTRUCTOR_ID | types::BadMsgNotification::CONSTRUCTOR_ID => {
                match enums::BadMsgNotification::from_bytes(body)? {
                    enums::BadMsgNotification::BadServerSalt(s) => Self::BadServerSalt(s),
                    enums::BadMsgNotification::BadMsgNotification(n) => Self::BadMsgNotification(n),
                }
            }
            types::MsgDetailedInfo::CONSTRUCTOR_ID | types::MsgNewDetailedInfo::CONSTRUCTOR_ID => {
                let answer_msg_id = match enums::MsgDetailedInfo::from_bytes(body)? {
                    enums::MsgDetailedInfo::MsgDetailedInfo(i) => i.answer_msg_id,
                    enums::MsgDetailedInfo::MsgNewDetailedInfo(i) => i.answer_msg_id,
                };
                Self::DetailedInfo { answer_msg_id }
            }
            types::NewSessionCreated::CONSTRUCTOR_ID => {
                let enums::NewSession::NewSessionCreated(n) = enums::NewSession::from_bytes(body)?;
                Self::NewSessionCreated(n)
            }
            types::MsgsAck::CONSTRUCTOR_ID => {
                let enums::MsgsAck::MsgsAck(a) = enums::MsgsAck::from_bytes(body)?;
                Self::MsgsAck(a)
            }
            types::FutureSalts::CONSTRUCTOR_ID => {
                let enums::FutureSalts::FutureSalts(s) = enums::FutureSalts::from_bytes(body)?;
                Self::FutureSalts(s)
            }
            types::MsgsStateReq::CONSTRUCTOR_ID => {
                let enums::MsgsStateReq::MsgsStateReq(r) = enums::MsgsStateReq::from_bytes(body)?;
                Self::StateRequest { msg_ids: r.msg_ids }
            }
            types::MsgResendReq::CONSTRUCTOR_ID => {
                let enums::MsgResendReq::MsgResendReq(r) = enums::MsgResendReq::from_bytes(body)?;
                Self::StateRequest { msg_ids: r.msg_ids }
            }
            types::MsgsAllInfo::CONSTRUCTOR_ID => {
                let enums::MsgsAllInfo::MsgsAllInfo(i) = enums::MsgsAllInfo::from_bytes(body)?;
                Self::MsgsAllInfo(i)
            }
            types::DestroySessionOk::CONSTRUCTOR_ID | types::DestroySessionNone::CONSTRUCTOR_ID => {
                let session_id = match enums::DestroySessionRes::from_bytes(body)? {
                    enums::DestroySessionRes::DestroySessionOk(d) => d.session_id,
                    enums::DestroySessionRes::DestroySessionNone(d) => d.session_id,
                };
                Self::DestroySession { session_id }
            }
            _ => Self::Other(body.to_vec()),
        };
        Ok(incoming)
    }
}

/// The payload of an `rpc_result`.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcAnswer {
    Error(types::RpcError),
    /// Serialized answer, inflated if it was gzip-packed.
    Ok(Vec<u8>),
}

impl RpcAnswer {
    pub fn parse(result: Vec<u8>) -> Result<Self> {
        match constructor_id(&result) {
            Some(types::RpcError::CONSTRUCTOR_ID) => {
                let enums::RpcError::RpcError(e) = enums::RpcError::from_bytes(&result)?;
                Ok(Self::Error(e))
            }
            Some(types::GzipPacked::CONSTRUCTOR_ID) => {
                let enums::GzipPacked::GzipPacked(g) = enums::GzipPacked::from_bytes(&result)?;
                let inner = gunzip(&g.packed_data).map_err(|_| Error::UnexpectedEof)?;
                Self::parse(inner)
            }
            _ => Ok(Self::Ok(result)),
        }
    }
}

/// Inflate a `gzip_packed` payload. Some servers send bare zlib streams.
pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    if GzDecoder::new(data).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
