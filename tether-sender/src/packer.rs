//! Queue of outgoing requests and the logic that packs them into frames.

use std::collections::VecDeque;

use tether_mtproto::Session;
use tether_tl_types::{Identifiable, types};

use crate::errors::InvocationError;
use crate::request::RequestState;

/// Most messages the server accepts in one container.
pub(crate) const MAX_CONTAINER_MESSAGES: usize = 100;
/// Largest serialized payload the server accepts, minus the container header.
pub(crate) const MAX_PAYLOAD: usize = 1_044_456 - 8;
/// `msg_id:long seq_no:int bytes:int` in front of every body.
const MESSAGE_OVERHEAD: usize = 16;
/// `invokeAfterMsg` constructor and msg id.
const AFTER_OVERHEAD: usize = 12;

/// One frame's worth of serialized messages, ready to encrypt.
#[derive(Debug)]
pub(crate) struct Batch {
    pub data: Vec<u8>,
    pub states: Vec<RequestState>,
}

#[derive(Debug, Default)]
pub(crate) struct Packer {
    queue: VecDeque<RequestState>,
}

impl Packer {
    pub fn push_back(&mut self, state: RequestState) {
        self.queue.push_back(state);
    }

    pub fn push_front(&mut self, state: RequestState) {
        self.queue.push_front(state);
    }

    /// Put `states` in front of the queue, keeping their order.
    pub fn extend_front(&mut self, states: impl IntoIterator<Item = RequestState>) {
        let states: Vec<_> = states.into_iter().collect();
        for state in states.into_iter().rev() {
            self.queue.push_front(state);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = RequestState> + '_ {
        self.queue.drain(..)
    }

    /// Take as many queued states as fit in one frame and serialize them.
    ///
    /// More than one state goes out inside a `msg_container`. Each state's
    /// msg id cell is updated, and `container_id` set when it travels in a
    /// container. States that could never fit are failed and skipped, and
    /// so are states ordered after a request that never went out.
    pub fn pack(&mut self, session: &mut Session) -> Option<Batch> {
        let mut states = Vec::new();
        let mut size = 0;

        while let Some(front) = self.queue.front() {
            let len = estimated_len(front);
            if len > MAX_PAYLOAD {
                if let Some(mut state) = self.queue.pop_front() {
                    tracing::warn!(
                        "[tether] request of {} bytes can never be sent, failing it",
                        state.body.len()
                    );
                    state.resolve(Err(InvocationError::PayloadTooLarge { len: state.body.len() }));
                }
                continue;
            }
            if states.len() == MAX_CONTAINER_MESSAGES || size + len > MAX_PAYLOAD {
                break;
            }
            let orphaned = front.after.as_ref().is_some_and(|after| {
                after.get().is_none() && !states.iter().any(|s: &RequestState| s.msg_id.same(after))
            });
            if orphaned {
                if let Some(mut state) = self.queue.pop_front() {
                    tracing::warn!("[tether] request ordered after one that was never sent, failing it");
                    state.resolve(Err(InvocationError::Dropped));
                }
                continue;
            }
            size += len;
            states.extend(self.queue.pop_front());
        }

        if states.is_empty() {
            return None;
        }

        let mut data = Vec::with_capacity(size + MESSAGE_OVERHEAD + 8);
        if let [state] = states.as_mut_slice() {
            let after = state.after.as_ref().and_then(|cell| cell.get());
            let msg_id = session.write_data_as_message(&mut data, &state.body, state.content_related, after);
            state.msg_id.set(msg_id);
            state.container_id = None;
            return Some(Batch { data, states });
        }

        let mut body = Vec::with_capacity(size + 8);
        body.extend(types::MsgContainer::CONSTRUCTOR_ID.to_le_bytes());
        body.extend((states.len() as i32).to_le_bytes());
        for state in states.iter_mut() {
            let after = state.after.as_ref().and_then(|cell| cell.get());
            let msg_id = session.write_data_as_message(&mut body, &state.body, state.content_related, after);
            state.msg_id.set(msg_id);
        }
        let container_id = session.write_data_as_message(&mut data, &body, false, None);
        for state in states.iter_mut() {
            state.container_id = Some(container_id);
        }
        tracing::trace!("[tether] packed {} messages into container {container_id}", states.len());
        Some(Batch { data, states })
    }
}

fn estimated_len(state: &RequestState) -> usize {
    let after = if state.after.is_some() { AFTER_OVERHEAD } else { 0 };
    MESSAGE_OVERHEAD + after + state.body.len()
}
