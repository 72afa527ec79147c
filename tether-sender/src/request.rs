//! In-flight request bookkeeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tether_mtproto::message::constructor_id;
use tether_tl_types::{Identifiable, types};
use tokio::sync::oneshot;

use crate::errors::InvocationError;

/// Constructor of `auth.logOut`, the only request confirmed by a plain ack.
pub(crate) const LOG_OUT_ID: u32 = 0x3e72ba19;

pub(crate) type Completion = oneshot::Sender<Result<Vec<u8>, InvocationError>>;

/// The msg id a request was last sent under. Shared with requests that must
/// run after it and with the caller's [`PendingRequest`].
#[derive(Clone, Debug, Default)]
pub(crate) struct MsgIdCell(Arc<AtomicI64>);

impl MsgIdCell {
    pub fn get(&self) -> Option<i64> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn set(&self, id: i64) {
        self.0.store(id, Ordering::Relaxed);
    }

    /// Whether both cells belong to the same request.
    pub fn same(&self, other: &MsgIdCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One logical request, from enqueue until its answer arrives.
#[derive(Debug)]
pub(crate) struct RequestState {
    pub body: Vec<u8>,
    /// Requests are content-related; acks and state replies are not.
    pub content_related: bool,
    pub msg_id: MsgIdCell,
    /// Set while the request travels inside a `msg_container`.
    pub container_id: Option<i64>,
    /// Serialize inside `invokeAfterMsg` with this request's id.
    pub after: Option<MsgIdCell>,
    /// A keep-alive ping. Never resent on a new connection.
    pub keep_alive: bool,
    result: Option<Completion>,
}

impl RequestState {
    /// A request the caller waits on.
    pub fn request(body: Vec<u8>, after: Option<MsgIdCell>) -> (Self, PendingRequest) {
        let (tx, rx) = oneshot::channel();
        let msg_id = MsgIdCell::default();
        let state = Self {
            body,
            content_related: true,
            msg_id: msg_id.clone(),
            container_id: None,
            after,
            keep_alive: false,
            result: Some(tx),
        };
        (state, PendingRequest { msg_id, rx })
    }

    /// A content-related keep-alive nobody waits on.
    pub fn keep_alive(body: Vec<u8>) -> Self {
        Self { content_related: true, keep_alive: true, ..Self::service(body) }
    }

    /// A service message nobody waits on.
    pub fn service(body: Vec<u8>) -> Self {
        Self {
            body,
            content_related: false,
            msg_id: MsgIdCell::default(),
            container_id: None,
            after: None,
            keep_alive: false,
            result: None,
        }
    }

    pub fn constructor_id(&self) -> Option<u32> {
        constructor_id(&self.body)
    }

    pub fn is_ack(&self) -> bool {
        self.constructor_id() == Some(types::MsgsAck::CONSTRUCTOR_ID)
    }

    pub fn is_log_out(&self) -> bool {
        self.constructor_id() == Some(LOG_OUT_ID)
    }

    /// Fulfil the completion slot. Later calls are no-ops.
    pub fn resolve(&mut self, result: Result<Vec<u8>, InvocationError>) {
        if let Some(tx) = self.result.take() {
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        }
    }
}

/// Handle to a request queued on a [`crate::Sender`].
#[derive(Debug)]
pub struct PendingRequest {
    msg_id: MsgIdCell,
    rx: oneshot::Receiver<Result<Vec<u8>, InvocationError>>,
}

impl PendingRequest {
    /// The id of the message that most recently carried this request.
    /// `None` until it has been sent.
    pub fn msg_id(&self) -> Option<i64> {
        self.msg_id.get()
    }

    pub(crate) fn id_cell(&self) -> MsgIdCell {
        self.msg_id.clone()
    }

    /// Wait for the answer.
    pub async fn wait(self) -> Result<Vec<u8>, InvocationError> {
        self.rx.await.unwrap_or(Err(InvocationError::Dropped))
    }
}
