//! Boxed MTProto service types.
//!
//! Each enum reads the leading constructor ID and dispatches to the bare
//! [`crate::types`] struct. Variant names follow the constructor names.

use crate::types;

tl_enum! {
    /// `ResPQ`
    ResPq { ResPq(types::ResPq) }
}

tl_enum! {
    /// `P_Q_inner_data`
    PQInnerData { PQInnerData(types::PQInnerData) }
}

tl_enum! {
    /// `Server_DH_Params`
    ServerDhParams {
        Fail(types::ServerDhParamsFail),
        Ok(types::ServerDhParamsOk),
    }
}

tl_enum! {
    /// `Server_DH_inner_data`
    ServerDhInnerData { ServerDhInnerData(types::ServerDhInnerData) }
}

tl_enum! {
    /// `Client_DH_Inner_Data`
    ClientDhInnerData { ClientDhInnerData(types::ClientDhInnerData) }
}

tl_enum! {
    /// `Set_client_DH_params_answer`
    SetClientDhParamsAnswer {
        DhGenOk(types::DhGenOk),
        DhGenRetry(types::DhGenRetry),
        DhGenFail(types::DhGenFail),
    }
}

tl_enum! {
    /// `RpcResult`
    RpcResult { RpcResult(types::RpcResult) }
}

tl_enum! {
    /// `RpcError`
    RpcError { RpcError(types::RpcError) }
}

tl_enum! {
    /// `FutureSalts`
    FutureSalts { FutureSalts(types::FutureSalts) }
}

tl_enum! {
    /// `Pong`
    Pong { Pong(types::Pong) }
}

tl_enum! {
    /// `NewSession`
    NewSession { NewSessionCreated(types::NewSessionCreated) }
}

tl_enum! {
    /// `MessageContainer`
    MessageContainer { MsgContainer(types::MsgContainer) }
}

tl_enum! {
    /// `MsgsAck`
    MsgsAck { MsgsAck(types::MsgsAck) }
}

tl_enum! {
    /// `BadMsgNotification`
    BadMsgNotification {
        BadMsgNotification(types::BadMsgNotification),
        BadServerSalt(types::BadServerSalt),
    }
}

tl_enum! {
    /// `MsgsStateReq`
    MsgsStateReq { MsgsStateReq(types::MsgsStateReq) }
}

tl_enum! {
    /// `MsgsStateInfo`
    MsgsStateInfo { MsgsStateInfo(types::MsgsStateInfo) }
}

tl_enum! {
    /// `MsgsAllInfo`
    MsgsAllInfo { MsgsAllInfo(types::MsgsAllInfo) }
}

tl_enum! {
    /// `MsgResendReq`
    MsgResendReq { MsgResendReq(types::MsgResendReq) }
}

tl_enum! {
    /// `MsgDetailedInfo`
    MsgDetailedInfo {
        MsgDetailedInfo(types::MsgDetailedInfo),
        MsgNewDetailedInfo(types::MsgNewDetailedInfo),
    }
}

tl_enum! {
    /// `Object` wrapper for compressed payloads.
    GzipPacked { GzipPacked(types::GzipPacked) }
}

tl_enum! {
    /// `DestroySessionRes`
    DestroySessionRes {
        DestroySessionOk(types::DestroySessionOk),
        DestroySessionNone(types::DestroySessionNone),
    }
}
