//! The sender: many concurrent requests over one connection.
//!
//! A [`Sender`] owns a supervisor task which in turn runs a send loop and a
//! receive loop per physical connection. All MTProto state shared by the
//! loops lives in one [`Core`] behind a single mutex that is never held
//! across an `.await`.
//!
//! ```text
//!  enqueue ──► Packer ──► send loop ──► FrameWriter
//!                 ▲                          │
//!     requeue     │        pending map       ▼
//!  (salt, reconnect)◄──── receive loop ◄── FrameReader
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tether_crypto::AuthKey;
use tether_mtproto::message::constructor_id;
use tether_mtproto::session::{DecryptError, EncryptError};
use tether_mtproto::{Incoming, Message, RpcAnswer, Session};
use tether_tl_types::{Deserializable, RemoteCall, Serializable, enums, functions, types};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::errors::{ConnectError, InvocationError, RpcError};
use crate::handshake::do_authentication;
use crate::packer::Packer;
use crate::request::{MsgIdCell, PendingRequest, RequestState};
use crate::transport::{Connector, FrameReader, FrameWriter};

/// Server updates buffered before new ones are dropped.
const UPDATE_BUFFER: usize = 1024;
/// Sent `msgs_ack` messages kept around in case the server rejects their salt.
const MAX_RECENT_ACKS: usize = 10;
/// `upload.file`, sometimes answered to a request we no longer track.
const UPLOAD_FILE_ID: u32 = 0x096a18d5;

/// An auth key with the salt and clock offset learned alongside it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthData {
    pub auth_key: [u8; 256],
    pub first_salt: i64,
    /// Server time minus local time, in seconds.
    pub time_offset: i32,
}

impl AuthData {
    /// A key with no salt or clock offset known yet.
    pub fn new(auth_key: [u8; 256]) -> Self {
        Self { auth_key, first_salt: 0, time_offset: 0 }
    }
}

impl std::fmt::Debug for AuthData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthData")
            .field("key_id", &AuthKey::from_bytes(self.auth_key).key_id())
            .field("first_salt", &self.first_salt)
            .field("time_offset", &self.time_offset)
            .finish()
    }
}

/// Called with every auth key the sender derives, again whenever the
/// server corrects our clock, and with `None` when the server stops
/// accepting the current key. Runs on the receive loop and must not block.
pub type AuthKeyCallback = Arc<dyn Fn(Option<AuthData>) + Send + Sync>;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Connection and keep-alive settings for a [`Sender`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SenderConfig {
    /// Extra attempts for the first connection. `None` retries forever.
    pub connect_retries: Option<u32>,
    /// Attempts after the connection drops. `None` retries forever.
    pub reconnect_retries: Option<u32>,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
    /// Limit for opening the transport.
    pub connect_timeout: Duration,
    /// Limit for the whole auth key exchange.
    pub handshake_timeout: Duration,
    /// Reconnect on transport failure instead of failing every request.
    pub auto_reconnect: bool,
    /// Send `ping_delay_disconnect` this often. `None` disables keep-alive.
    pub ping_interval: Option<Duration>,
    /// How long the server waits for the next ping before closing.
    pub ping_disconnect_delay: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            connect_retries: Some(5),
            reconnect_retries: Some(5),
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(15),
            auto_reconnect: true,
            ping_interval: Some(Duration::from_secs(60)),
            ping_disconnect_delay: Duration::from_secs(75),
        }
    }
}

/// Where the connection currently is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt number `attempt`.
    Reconnecting { attempt: u32 },
}

// ─── UpdateStream ─────────────────────────────────────────────────────────────

/// Bodies the server pushed that are not service messages or answers.
pub struct UpdateStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl UpdateStream {
    /// Wait for the next update. Returns `None` once the sender has shut down.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

// ─── Core ─────────────────────────────────────────────────────────────────────

struct Core {
    session: Session,
    packer: Packer,
    /// Sent, content-related, awaiting an answer. Keyed by msg id.
    pending: HashMap<i64, RequestState>,
    /// Server msg ids to acknowledge in the next frame.
    pending_ack: BTreeSet<i64>,
    last_acks: VecDeque<RequestState>,
    updates: Option<mpsc::Sender<Vec<u8>>>,
    /// Salt from the key exchange, used to start every new session.
    first_salt: i64,
    closed: bool,
}

impl Core {
    fn new(auth: Option<AuthData>, updates: mpsc::Sender<Vec<u8>>) -> Self {
        let mut session = Session::new(auth.map(|auth| AuthKey::from_bytes(auth.auth_key)));
        if let Some(auth) = &auth {
            session.set_time_offset(auth.time_offset);
        }
        Self {
            session,
            packer: Packer::default(),
            pending: HashMap::new(),
            pending_ack: BTreeSet::new(),
            last_acks: VecDeque::with_capacity(MAX_RECENT_ACKS),
            updates: Some(updates),
            first_salt: auth.map_or(0, |auth| auth.first_salt),
            closed: false,
        }
    }

    fn auth_data(&self) -> Option<AuthData> {
        self.session.auth_key().map(|key| AuthData {
            auth_key: key.to_bytes(),
            first_salt: self.first_salt,
            time_offset: self.session.time_offset(),
        })
    }

    /// Pack and encrypt the next frame, moving its states in flight.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, EncryptError> {
        if !self.pending_ack.is_empty() {
            let msg_ids = std::mem::take(&mut self.pending_ack).into_iter().collect();
            let body = enums::MsgsAck::from(types::MsgsAck { msg_ids }).to_bytes();
            self.packer.push_front(RequestState::service(body));
        }

        let Some(batch) = self.packer.pack(&mut self.session) else {
            return Ok(None);
        };
        let frame = match self.session.encrypt_message_data(&batch.data) {
            Ok(frame) => frame,
            Err(e) => {
                self.packer.extend_front(batch.states);
                return Err(e);
            }
        };
        for state in batch.states {
            self.track(state);
        }
        Ok(Some(frame))
    }

    fn track(&mut self, state: RequestState) {
        if state.content_related {
            if let Some(msg_id) = state.msg_id.get() {
                self.pending.insert(msg_id, state);
            }
        } else if state.is_ack() {
            if self.last_acks.len() == MAX_RECENT_ACKS {
                self.last_acks.pop_front();
            }
            self.last_acks.push_back(state);
        }
    }

    /// Queue everything that was in flight on a dead connection again.
    /// Keep-alive pings are not carried over.
    fn requeue_in_flight(&mut self) {
        let mut states: Vec<_> = self
            .pending
            .drain()
            .map(|(_, state)| state)
            .filter(|state| !state.keep_alive)
            .collect();
        states.sort_by_key(|state| state.msg_id.get());
        for state in &mut states {
            state.container_id = None;
        }
        if !states.is_empty() {
            tracing::info!("[tether] resending {} requests on the new connection", states.len());
        }
        self.packer.extend_front(states);
        self.pending_ack.clear();
        self.last_acks.clear();
    }

    /// States sent under `msg_id`: the message itself, or every member of the
    /// container with that id, including recently sent acks.
    fn pop_states(&mut self, msg_id: i64) -> Vec<RequestState> {
        if let Some(state) = self.pending.remove(&msg_id) {
            return vec![state];
        }

        let ids: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, state)| state.container_id == Some(msg_id))
            .map(|(id, _)| *id)
            .collect();
        let mut states: Vec<_> = ids.iter().filter_map(|id| self.pending.remove(id)).collect();

        let mut i = 0;
        while i < self.last_acks.len() {
            let ack = &self.last_acks[i];
            if ack.msg_id.get() == Some(msg_id) || ack.container_id == Some(msg_id) {
                states.extend(self.last_acks.remove(i));
            } else {
                i += 1;
            }
        }

        states.sort_by_key(|state| state.msg_id.get());
        states
    }

    // ── dispatch ────────────────────────────────────────────────────────────

    fn process(&mut self, message: Message) {
        if message.requires_ack() {
            self.pending_ack.insert(message.msg_id);
        }
        self.dispatch(message.msg_id, &message.body);
    }

    fn dispatch(&mut self, msg_id: i64, body: &[u8]) {
        let incoming = match Incoming::classify(body) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!("[tether] dropping malformed message {msg_id}: {e}");
                return;
            }
        };
        match incoming {
            Incoming::RpcResult(result) => self.on_rpc_result(result),
            Incoming::Container(messages) => {
                for message in messages {
                    self.process(message);
                }
            }
            Incoming::GzipPacked(inner) => self.dispatch(msg_id, &inner),
            Incoming::Pong(pong) => self.on_pong(pong),
            Incoming::BadServerSalt(bad) => self.on_bad_server_salt(bad),
            Incoming::BadMsgNotification(bad) => self.on_bad_msg_notification(msg_id, bad),
            Incoming::DetailedInfo { answer_msg_id } => {
                self.pending_ack.insert(answer_msg_id);
            }
            Incoming::NewSessionCreated(created) => {
                tracing::debug!("[tether] new session created, salt {}", created.server_salt);
                self.session.set_salt(created.server_salt);
            }
            Incoming::MsgsAck(ack) => self.on_ack(ack),
            Incoming::FutureSalts(salts) => match self.pending.remove(&salts.req_msg_id) {
                Some(mut state) => state.resolve(Ok(body.to_vec())),
                None => tracing::debug!("[tether] unsolicited future_salts"),
            },
            Incoming::StateRequest { msg_ids } => {
                let info = enums::MsgsStateInfo::from(types::MsgsStateInfo {
                    req_msg_id: msg_id,
                    info: vec![1; msg_ids.len()],
                });
                self.packer.push_back(RequestState::service(info.to_bytes()));
            }
            Incoming::MsgsAllInfo(_) => {}
            Incoming::DestroySession { session_id } => self.on_destroy_session(session_id, body),
            Incoming::Other(update) => self.forward_update(update),
        }
    }

    fn on_rpc_result(&mut self, result: types::RpcResult) {
        let types::RpcResult { req_msg_id, result } = result;
        let Some(mut state) = self.pending.remove(&req_msg_id) else {
            if constructor_id(&result) != Some(UPLOAD_FILE_ID) {
                tracing::warn!("[tether] rpc_result for unknown request {req_msg_id}, dropping");
            }
            return;
        };

        match RpcAnswer::parse(result) {
            Ok(RpcAnswer::Ok(body)) => {
                tracing::debug!("[tether] got result for {req_msg_id}");
                state.resolve(Ok(body));
            }
            Ok(RpcAnswer::Error(e)) => {
                let error = RpcError::from_telegram(e.error_code, &e.error_message);
                tracing::debug!("[tether] got rpc error for {req_msg_id}: {error}");
                self.pending_ack.insert(req_msg_id);
                state.resolve(Err(InvocationError::Rpc(error)));
            }
            Err(e) => state.resolve(Err(InvocationError::Deserialize(e))),
        }
    }

    fn on_pong(&mut self, pong: types::Pong) {
        match self.pending.remove(&pong.msg_id) {
            Some(mut state) => state.resolve(Ok(enums::Pong::from(pong).to_bytes())),
            None => tracing::debug!("[tether] pong for unknown ping {}", pong.ping_id),
        }
    }

    fn on_bad_server_salt(&mut self, bad: types::BadServerSalt) {
        tracing::debug!(
            "[tether] bad server salt for {}, switching to {}",
            bad.bad_msg_id,
            bad.new_server_salt
        );
        self.session.set_salt(bad.new_server_salt);
        let states = self.pop_states(bad.bad_msg_id);
        self.packer.extend_front(states);
    }

    fn on_bad_msg_notification(&mut self, msg_id: i64, bad: types::BadMsgNotification) {
        let states = self.pop_states(bad.bad_msg_id);
        match bad.error_code {
            // msg_id too low / too high
            16 | 17 => {
                self.session.update_time_offset(msg_id);
            }
            // msg_seqno too low
            32 => self.session.adjust_sequence(64),
            // msg_seqno too high
            33 => self.session.adjust_sequence(-16),
            code => {
                tracing::warn!("[tether] message {} rejected with code {code}", bad.bad_msg_id);
                for mut state in states {
                    state.resolve(Err(InvocationError::BadMessage { code }));
                }
                return;
            }
        }
        tracing::debug!(
            "[tether] resending {} states after bad_msg_notification {}",
            states.len(),
            bad.error_code
        );
        self.packer.extend_front(states);
    }

    fn on_ack(&mut self, ack: types::MsgsAck) {
        for msg_id in ack.msg_ids {
            if !self.pending.get(&msg_id).is_some_and(RequestState::is_log_out) {
                continue;
            }
            if let Some(mut state) = self.pending.remove(&msg_id) {
                state.resolve(Ok(true.to_bytes()));
            }
        }
    }

    fn on_destroy_session(&mut self, session_id: i64, body: &[u8]) {
        let request = functions::DestroySession { session_id }.to_bytes();
        let msg_id = self
            .pending
            .iter()
            .find(|(_, state)| state.body == request)
            .map(|(id, _)| *id);
        if let Some(mut state) = msg_id.and_then(|id| self.pending.remove(&id)) {
            state.resolve(Ok(body.to_vec()));
        }
    }

    fn forward_update(&mut self, body: Vec<u8>) {
        let Some(updates) = &self.updates else {
            return;
        };
        match updates.try_send(body) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("[tether] update buffer full, dropping update");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

// ─── Shared ───────────────────────────────────────────────────────────────────

struct Shared {
    core: Mutex<Core>,
    /// Wakes the send loop when there is something to send.
    notify: Notify,
    state: watch::Sender<ConnectionState>,
    on_auth_key: Option<AuthKeyCallback>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn report_auth(&self, auth: Option<AuthData>) {
        if let Some(callback) = &self.on_auth_key {
            callback(auth);
        }
    }

    /// Fail everything and refuse new work.
    async fn shutdown(&self) {
        let states: Vec<_> = {
            let mut core = self.core.lock().await;
            core.closed = true;
            core.updates = None;
            core.last_acks.clear();
            core.pending_ack.clear();
            let mut states: Vec<_> = core.packer.drain().collect();
            states.extend(core.pending.drain().map(|(_, state)| state));
            states
        };
        if !states.is_empty() {
            tracing::info!("[tether] dropping {} unanswered requests", states.len());
        }
        for mut state in states {
            state.resolve(Err(InvocationError::Dropped));
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

// ─── Loops ────────────────────────────────────────────────────────────────────

/// Why a connection's loops stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Exit {
    Cancelled,
    /// The connection failed; a new one may work.
    Transport,
    /// The server does not accept our auth key.
    BrokenKey,
}

async fn recv_loop<R: FrameReader>(shared: Arc<Shared>, mut reader: R, token: CancellationToken) -> Exit {
    loop {
        let received = tokio::select! {
            received = reader.recv() => received,
            _ = token.cancelled() => return Exit::Cancelled,
        };
        let mut frame = match received {
            Ok(frame) => frame,
            Err(e) if e.is_missing_key() => {
                tracing::warn!("[tether] server does not know our auth key");
                return Exit::BrokenKey;
            }
            Err(e) => {
                tracing::warn!("[tether] read failed: {e}");
                return Exit::Transport;
            }
        };

        {
            let mut core = shared.core.lock().await;
            let offset = core.session.time_offset();
            let decrypted = core.session.decrypt_message_data(&mut frame);
            // Stored before any answer the message carries is handed out.
            report_if_resynced(&shared, &core, offset);
            match decrypted {
                Ok(Some(message)) => {
                    let offset = core.session.time_offset();
                    core.process(message);
                    report_if_resynced(&shared, &core, offset);
                }
                Ok(None) => {}
                Err(e) if e.is_broken_key() => {
                    tracing::warn!("[tether] frame not encrypted with our key: {e}");
                    return Exit::BrokenKey;
                }
                Err(DecryptError::MissingAuthKey) => return Exit::BrokenKey,
                Err(e @ DecryptError::TooManyIgnored(_)) => {
                    tracing::warn!("[tether] {e}, reconnecting");
                    return Exit::Transport;
                }
                Err(e) => tracing::warn!("[tether] dropping frame: {e}"),
            }
        }
        // Answers often queue acks or resends.
        shared.notify.notify_one();
    }
}

fn report_if_resynced(shared: &Shared, core: &Core, old_offset: i32) {
    if core.session.time_offset() != old_offset {
        shared.report_auth(core.auth_data());
    }
}

async fn send_loop<W: FrameWriter>(
    shared: Arc<Shared>,
    mut writer: W,
    ping: Option<(Duration, Duration)>,
    token: CancellationToken,
) -> Exit {
    let mut ping_timer = ping.map(|(period, delay)| {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        (timer, delay)
    });

    let exit = loop {
        let next = shared.core.lock().await.next_frame();
        match next {
            Ok(Some(frame)) => {
                let written = tokio::select! {
                    written = writer.send(&frame) => written,
                    _ = token.cancelled() => break Exit::Cancelled,
                };
                if let Err(e) = written {
                    tracing::warn!("[tether] write failed: {e}");
                    break Exit::Transport;
                }
                continue;
            }
            Ok(None) => {}
            Err(EncryptError::MissingAuthKey) => break Exit::BrokenKey,
        }

        tokio::select! {
            _ = shared.notify.notified() => {}
            delay = next_ping(&mut ping_timer) => {
                let ping = functions::PingDelayDisconnect {
                    ping_id: tether_crypto::random_i64(),
                    disconnect_delay: whole_secs(delay),
                };
                let mut core = shared.core.lock().await;
                // A new ping supersedes any unanswered one.
                core.pending.retain(|_, state| !state.keep_alive);
                core.packer.push_back(RequestState::keep_alive(ping.to_bytes()));
            }
            _ = token.cancelled() => break Exit::Cancelled,
        }
    };
    writer.disconnect().await;
    exit
}

/// `delay` in seconds for a TL `int`, saturating.
fn whole_secs(delay: Duration) -> i32 {
    i32::try_from(delay.as_secs()).unwrap_or(i32::MAX)
}

async fn next_ping(timer: &mut Option<(Interval, Duration)>) -> Duration {
    match timer {
        Some((interval, delay)) => {
            interval.tick().await;
            *delay
        }
        None => std::future::pending().await,
    }
}

// ─── Supervisor ───────────────────────────────────────────────────────────────

struct Supervisor<C: Connector> {
    connector: C,
    addr: String,
    config: SenderConfig,
    shared: Arc<Shared>,
}

impl<C: Connector> Supervisor<C> {
    /// Open the transport, generate a key if there is none, and prepare the
    /// session for the new connection.
    async fn establish(&self) -> Result<(C::Reader, C::Writer), ConnectError> {
        self.shared.set_state(ConnectionState::Connecting);
        let (mut reader, mut writer) =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&self.addr))
                .await
                .map_err(|_| ConnectError::Timeout)??;

        let has_key = self.shared.core.lock().await.session.auth_key().is_some();
        let generated = if has_key {
            None
        } else {
            tracing::info!("[tether] no auth key for {}, generating one", self.addr);
            let exchange = do_authentication(&mut reader, &mut writer);
            match tokio::time::timeout(self.config.handshake_timeout, exchange).await {
                Ok(done) => Some(done?),
                Err(_) => return Err(ConnectError::Timeout),
            }
        };

        let derived = {
            let mut core = self.shared.core.lock().await;
            core.session.reset();
            if let Some(done) = &generated {
                core.session.set_auth_key(Some(AuthKey::from_bytes(done.auth_key)));
                core.session.set_time_offset(done.time_offset);
                core.first_salt = done.first_salt;
            }
            let salt = core.first_salt;
            core.session.set_salt(salt);
            core.requeue_in_flight();
            generated.and_then(|_| core.auth_data())
        };
        if derived.is_some() {
            self.shared.report_auth(derived);
        }

        tracing::info!("[tether] connected to {}", self.addr);
        self.shared.set_state(ConnectionState::Connected);
        self.shared.notify.notify_one();
        Ok((reader, writer))
    }

    /// [`Self::establish`] with up to `retries` further attempts.
    ///
    /// Handshake failures are never retried.
    async fn establish_with_retries(
        &self,
        retries: Option<u32>,
        reconnecting: bool,
    ) -> Result<(C::Reader, C::Writer), ConnectError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if reconnecting {
                self.shared.set_state(ConnectionState::Reconnecting { attempt });
            }
            let e = match self.establish().await {
                Ok(conn) => return Ok(conn),
                Err(e) => e,
            };
            let exhausted = retries.is_some_and(|max| attempt > max);
            if exhausted || matches!(e, ConnectError::Handshake(_)) {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
            tracing::warn!("[tether] connection attempt {attempt} to {} failed: {e}", self.addr);
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// Run the send and receive loops until one of them stops.
    async fn run_connection(&self, reader: C::Reader, writer: C::Writer, token: &CancellationToken) -> Exit {
        let conn_token = token.child_token();
        let ping = self.config.ping_interval.map(|period| (period, self.config.ping_disconnect_delay));

        let mut tasks = JoinSet::new();
        tasks.spawn(recv_loop(Arc::clone(&self.shared), reader, conn_token.clone()));
        tasks.spawn(send_loop(Arc::clone(&self.shared), writer, ping, conn_token.clone()));

        let exit = match tasks.join_next().await {
            Some(Ok(exit)) => exit,
            Some(Err(e)) => {
                tracing::error!("[tether] connection task failed: {e}");
                Exit::Transport
            }
            None => Exit::Transport,
        };
        conn_token.cancel();
        while tasks.join_next().await.is_some() {}

        if token.is_cancelled() { Exit::Cancelled } else { exit }
    }

    async fn supervise(self, mut conn: (C::Reader, C::Writer), token: CancellationToken) {
        loop {
            let (reader, writer) = conn;
            match self.run_connection(reader, writer, &token).await {
                Exit::Cancelled => break,
                Exit::Transport => {}
                Exit::BrokenKey => {
                    tracing::warn!("[tether] dropping auth key for {}", self.addr);
                    {
                        let mut core = self.shared.core.lock().await;
                        core.session.set_auth_key(None);
                        core.first_salt = 0;
                    }
                    self.shared.report_auth(None);
                }
            }

            if !self.config.auto_reconnect {
                tracing::error!("[tether] connection to {} lost", self.addr);
                break;
            }
            let reconnected = tokio::select! {
                reconnected = self.establish_with_retries(self.config.reconnect_retries, true) => reconnected,
                _ = token.cancelled() => break,
            };
            match reconnected {
                Ok(next) => conn = next,
                Err(e) => {
                    tracing::error!("[tether] giving up on {}: {e}", self.addr);
                    break;
                }
            }
        }
        self.shared.shutdown().await;
    }
}

// ─── Sender ───────────────────────────────────────────────────────────────────

/// Multiplexes concurrent requests over one MTProto connection.
///
/// Requests are queued, batched into containers, and matched with their
/// answers. The connection is kept alive and re-established on failure,
/// resending whatever was unanswered.
///
/// # Example
///
/// ```rust,no_run
/// use tether_sender::{Sender, SenderConfig, TcpConnector};
/// use tether_tl_types::functions;
///
/// # async fn f() -> Result<(), Box<dyn std::error::Error>> {
/// let sender = Sender::connect(
///     TcpConnector::default(),
///     "149.154.167.40:443",
///     None,
///     None,
///     SenderConfig::default(),
/// )
/// .await?;
/// let pong = sender.invoke_typed(&functions::Ping { ping_id: 1 }).await?;
/// println!("{pong:?}");
/// sender.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct Sender {
    shared: Arc<Shared>,
    token: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    updates: std::sync::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    state: watch::Receiver<ConnectionState>,
}

impl Sender {
    /// Connect to `addr`, generating an auth key first when `auth` is
    /// `None`. Every derived or invalidated key, and every clock correction,
    /// is passed to `on_auth_key`.
    pub async fn connect<C: Connector>(
        connector: C,
        addr: impl Into<String>,
        auth: Option<AuthData>,
        on_auth_key: Option<AuthKeyCallback>,
        config: SenderConfig,
    ) -> Result<Self, ConnectError> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        let shared = Arc::new(Shared {
            core: Mutex::new(Core::new(auth, updates_tx)),
            notify: Notify::new(),
            state: state_tx,
            on_auth_key,
        });

        let supervisor = Supervisor {
            connector,
            addr: addr.into(),
            shared: Arc::clone(&shared),
            config,
        };
        let conn = supervisor
            .establish_with_retries(supervisor.config.connect_retries, false)
            .await?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(supervisor.supervise(conn, token.clone()));

        Ok(Self {
            shared,
            token,
            supervisor: Mutex::new(Some(handle)),
            updates: std::sync::Mutex::new(Some(updates_rx)),
            state: state_rx,
        })
    }

    async fn submit(&self, states: Vec<RequestState>) {
        let rejected = {
            let mut core = self.shared.core.lock().await;
            if core.closed {
                states
            } else {
                for state in states {
                    core.packer.push_back(state);
                }
                Vec::new()
            }
        };
        for mut state in rejected {
            state.resolve(Err(InvocationError::Dropped));
        }
        self.shared.notify.notify_one();
    }

    /// Queue a serialized request without waiting for its answer.
    pub async fn enqueue(&self, body: Vec<u8>) -> PendingRequest {
        let (state, pending) = RequestState::request(body, None);
        self.submit(vec![state]).await;
        pending
    }

    /// Queue a request the server must only run after `after` has run.
    ///
    /// `after` must have been queued on this sender. If it fails before
    /// being sent, this request fails with [`InvocationError::Dropped`].
    pub async fn enqueue_after(&self, body: Vec<u8>, after: &PendingRequest) -> PendingRequest {
        let (state, pending) = RequestState::request(body, Some(after.id_cell()));
        self.submit(vec![state]).await;
        pending
    }

    /// Send a serialized request and wait for the serialized answer.
    pub async fn invoke(&self, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        self.enqueue(body).await.wait().await
    }

    /// Like [`Sender::invoke`], ordered after `after`.
    pub async fn invoke_after(
        &self,
        body: Vec<u8>,
        after: &PendingRequest,
    ) -> Result<Vec<u8>, InvocationError> {
        self.enqueue_after(body, after).await.wait().await
    }

    /// Send `request` and deserialize its answer.
    pub async fn invoke_typed<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.invoke(request.to_bytes()).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Queue several requests together so they travel in one container.
    ///
    /// With `ordered`, each request runs only after the one before it.
    /// Results come back in input order.
    pub async fn send_batch(
        &self,
        bodies: Vec<Vec<u8>>,
        ordered: bool,
    ) -> Vec<Result<Vec<u8>, InvocationError>> {
        let mut states = Vec::with_capacity(bodies.len());
        let mut handles = Vec::with_capacity(bodies.len());
        let mut previous: Option<MsgIdCell> = None;
        for body in bodies {
            let after = if ordered { previous.take() } else { None };
            let (state, pending) = RequestState::request(body, after);
            previous = Some(pending.id_cell());
            states.push(state);
            handles.push(pending);
        }
        self.submit(states).await;

        let mut results = Vec::with_capacity(handles.len());
        for pending in handles {
            results.push(pending.wait().await);
        }
        results
    }

    /// The server's pushed updates. Returns `Some` only on the first call.
    pub fn take_updates(&self) -> Option<UpdateStream> {
        let mut slot = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
        slot.take().map(|rx| UpdateStream { rx })
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The current auth key, if any.
    pub async fn auth_key(&self) -> Option<[u8; 256]> {
        self.shared.core.lock().await.session.auth_key().map(AuthKey::to_bytes)
    }

    /// The current auth key with its first salt and clock offset, for
    /// resuming later without a key exchange.
    pub async fn auth_data(&self) -> Option<AuthData> {
        self.shared.core.lock().await.auth_data()
    }

    /// Close the connection and fail every unanswered request with
    /// [`InvocationError::Dropped`].
    pub async fn disconnect(&self) {
        self.token.cancel();
        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("[tether] supervisor task failed: {e}");
            }
        }
        // The supervisor is gone either way.
        self.shared.shutdown().await;
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").field("state", &*self.state.borrow()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_tl_types::{Identifiable, RawVec};

    fn core() -> (Core, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(4);
        let mut core = Core::new(Some(AuthData::new([3; 256])), tx);
        core.session.set_salt(1);
        (core, rx)
    }

    /// Queue and "send" one request, returning its handle.
    fn in_flight(core: &mut Core, body: &[u8]) -> PendingRequest {
        let (state, pending) = RequestState::request(body.to_vec(), None);
        core.packer.push_back(state);
        core.next_frame().unwrap().unwrap();
        pending
    }

    fn message(msg_id: i64, seq_no: i32, body: Vec<u8>) -> Message {
        Message { msg_id, seq_no, body }
    }

    fn rpc_result(req_msg_id: i64, result: Vec<u8>) -> Vec<u8> {
        enums::RpcResult::from(types::RpcResult { req_msg_id, result }).to_bytes()
    }

    #[tokio::test]
    async fn rpc_result_resolves_and_is_acked() {
        let (mut core, _rx) = core();
        let pending = in_flight(&mut core, &[1, 0, 0, 0]);
        let id = pending.msg_id().unwrap();

        core.process(message(101, 1, rpc_result(id, vec![9, 9, 9, 9])));
        assert!(core.pending.is_empty());
        assert!(core.pending_ack.contains(&101));
        assert_eq!(pending.wait().await.unwrap(), vec![9, 9, 9, 9]);
    }

    #[tokio::test]
    async fn rpc_error_is_typed_and_acks_request() {
        let (mut core, _rx) = core();
        let pending = in_flight(&mut core, &[1, 0, 0, 0]);
        let id = pending.msg_id().unwrap();
        let error = enums::RpcError::from(types::RpcError {
            error_code: 420,
            error_message: "FLOOD_WAIT_5".into(),
        })
        .to_bytes();

        core.process(message(101, 2, rpc_result(id, error)));
        assert!(core.pending_ack.contains(&id));
        assert!(!core.pending_ack.contains(&101));
        let err = pending.wait().await.unwrap_err();
        assert_eq!(err.flood_wait_seconds(), Some(5));
    }

    #[test]
    fn orphan_results_are_dropped() {
        let (mut core, _rx) = core();
        core.process(message(101, 2, rpc_result(77, UPLOAD_FILE_ID.to_le_bytes().to_vec())));
        core.process(message(105, 2, rpc_result(78, vec![1, 2, 3, 4])));
        assert!(core.pending.is_empty());
    }

    #[test]
    fn bad_salt_requeues_whole_container() {
        let (mut core, _rx) = core();
        let (a, pa) = RequestState::request(vec![1, 0, 0, 0], None);
        let (b, pb) = RequestState::request(vec![2, 0, 0, 0], None);
        core.packer.push_back(a);
        core.packer.push_back(b);
        core.next_frame().unwrap().unwrap();
        let container_id = core.pending.values().next().unwrap().container_id.unwrap();

        let bad = enums::BadMsgNotification::from(types::BadServerSalt {
            bad_msg_id: container_id,
            bad_msg_seqno: 2,
            error_code: 48,
            new_server_salt: 0x5a17,
        });
        core.process(message(101, 2, bad.to_bytes()));

        assert_eq!(core.session.salt(), 0x5a17);
        assert!(core.pending.is_empty());
        let batch = core.packer.pack(&mut core.session).unwrap();
        let bodies: Vec<_> = batch.states.iter().map(|s| s.body[0]).collect();
        assert_eq!(bodies, vec![1, 2]);
        assert!(pa.msg_id().unwrap() < pb.msg_id().unwrap());
    }

    #[tokio::test]
    async fn unrecoverable_bad_msg_fails_request() {
        let (mut core, _rx) = core();
        let pending = in_flight(&mut core, &[1, 0, 0, 0]);
        let bad = enums::BadMsgNotification::from(types::BadMsgNotification {
            bad_msg_id: pending.msg_id().unwrap(),
            bad_msg_seqno: 1,
            error_code: 64,
        });
        core.process(message(101, 2, bad.to_bytes()));
        assert!(matches!(pending.wait().await, Err(InvocationError::BadMessage { code: 64 })));
    }

    #[test]
    fn seqno_notifications_nudge_sequence() {
        let (mut core, _rx) = core();
        let pending = in_flight(&mut core, &[1, 0, 0, 0]);
        let bad = enums::BadMsgNotification::from(types::BadMsgNotification {
            bad_msg_id: pending.msg_id().unwrap(),
            bad_msg_seqno: 1,
            error_code: 32,
        });
        core.process(message(101, 2, bad.to_bytes()));
        // one content message sent before, plus 64
        assert_eq!(core.session.seq_no(true), 65 * 2 + 1);
        assert!(!core.packer.is_empty());
    }

    #[test]
    fn state_request_gets_state_info() {
        let (mut core, _rx) = core();
        let req = enums::MsgsStateReq::from(types::MsgsStateReq { msg_ids: vec![10, 20, 30] });
        core.process(message(101, 2, req.to_bytes()));

        let batch = core.packer.pack(&mut core.session).unwrap();
        let expected = enums::MsgsStateInfo::from(types::MsgsStateInfo {
            req_msg_id: 101,
            info: vec![1, 1, 1],
        })
        .to_bytes();
        assert_eq!(batch.states[0].body, expected);
        assert!(!batch.states[0].content_related);
    }

    #[tokio::test]
    async fn ack_resolves_only_log_out() {
        let (mut core, _rx) = core();
        let log_out = in_flight(&mut core, &crate::request::LOG_OUT_ID.to_le_bytes());
        let other = in_flight(&mut core, &[1, 0, 0, 0]);
        let ack = enums::MsgsAck::from(types::MsgsAck {
            msg_ids: vec![log_out.msg_id().unwrap(), other.msg_id().unwrap()],
        });
        core.process(message(101, 2, ack.to_bytes()));

        assert_eq!(core.pending.len(), 1);
        assert_eq!(log_out.wait().await.unwrap(), true.to_bytes());
    }

    #[tokio::test]
    async fn pong_and_future_salts_resolve_by_id() {
        let (mut core, _rx) = core();
        let ping = in_flight(&mut core, &functions::Ping { ping_id: 7 }.to_bytes());
        let salts = in_flight(&mut core, &functions::GetFutureSalts { num: 1 }.to_bytes());

        let pong = types::Pong { msg_id: ping.msg_id().unwrap(), ping_id: 7 };
        core.process(message(101, 2, enums::Pong::from(pong.clone()).to_bytes()));
        let answer = enums::FutureSalts::from(types::FutureSalts {
            req_msg_id: salts.msg_id().unwrap(),
            now: 0,
            salts: RawVec(vec![]),
        })
        .to_bytes();
        core.process(message(105, 2, answer.clone()));

        let enums::Pong::Pong(got) = enums::Pong::from_bytes(&ping.wait().await.unwrap()).unwrap();
        assert_eq!(got, pong);
        assert_eq!(salts.wait().await.unwrap(), answer);
    }

    #[tokio::test]
    async fn destroy_session_resolves_matching_request() {
        let (mut core, _rx) = core();
        let pending = in_flight(&mut core, &functions::DestroySession { session_id: 42 }.to_bytes());
        let answer = enums::DestroySessionRes::from(types::DestroySessionNone { session_id: 42 }).to_bytes();
        core.process(message(101, 2, answer.clone()));
        assert_eq!(pending.wait().await.unwrap(), answer);
    }

    #[tokio::test]
    async fn unknown_bodies_become_updates() {
        let (mut core, mut rx) = core();
        let container = enums::MessageContainer::from(types::MsgContainer {
            messages: RawVec(vec![
                types::Message { msg_id: 201, seqno: 3, body: vec![0xaa, 0, 0, 0] },
                types::Message { msg_id: 205, seqno: 4, body: vec![0xbb, 0, 0, 0] },
            ]),
        });
        core.process(message(209, 4, container.to_bytes()));

        assert_eq!(rx.recv().await.unwrap(), vec![0xaa, 0, 0, 0]);
        assert_eq!(rx.recv().await.unwrap(), vec![0xbb, 0, 0, 0]);
        assert_eq!(core.pending_ack.iter().copied().collect::<Vec<_>>(), vec![201]);
    }

    #[test]
    fn acks_ride_in_front_and_are_remembered() {
        let (mut core, _rx) = core();
        core.pending_ack.extend([5, 9]);
        let (state, _pending) = RequestState::request(vec![1, 0, 0, 0], None);
        core.packer.push_back(state);
        core.next_frame().unwrap().unwrap();

        assert!(core.pending_ack.is_empty());
        assert_eq!(core.last_acks.len(), 1);
        assert_eq!(core.pending.len(), 1);
        assert_eq!(
            core.last_acks[0].constructor_id(),
            Some(types::MsgsAck::CONSTRUCTOR_ID)
        );
    }

    #[test]
    fn reconnect_resends_only_caller_requests() {
        let (mut core, _rx) = core();
        let _pending = in_flight(&mut core, &[1, 0, 0, 0]);
        let keep_alive = functions::PingDelayDisconnect { ping_id: 3, disconnect_delay: 75 };
        core.packer.push_back(RequestState::keep_alive(keep_alive.to_bytes()));
        core.next_frame().unwrap().unwrap();
        assert_eq!(core.pending.len(), 2);

        core.requeue_in_flight();
        let batch = core.packer.pack(&mut core.session).unwrap();
        assert_eq!(batch.states.len(), 1);
        assert_eq!(batch.states[0].body, vec![1, 0, 0, 0]);
    }

    #[test]
    fn disconnect_delay_saturates() {
        assert_eq!(whole_secs(Duration::from_millis(75_900)), 75);
        assert_eq!(whole_secs(Duration::from_secs(u64::MAX)), i32::MAX);
    }

    #[test]
    fn stored_auth_data_seeds_the_session() {
        let (tx, _rx) = mpsc::channel(1);
        let auth = AuthData { auth_key: [3; 256], first_salt: 0x5a17, time_offset: -42 };
        let core = Core::new(Some(auth), tx);
        assert_eq!(core.session.time_offset(), -42);
        assert_eq!(core.auth_data(), Some(auth));
    }

    #[tokio::test]
    async fn missing_key_refuses_to_encrypt() {
        let (tx, _rx) = mpsc::channel(1);
        let mut core = Core::new(None, tx);
        let (state, _pending) = RequestState::request(vec![1, 0, 0, 0], None);
        core.packer.push_back(state);
        assert_eq!(core.next_frame(), Err(EncryptError::MissingAuthKey));
        assert!(!core.packer.is_empty());
    }
}
