//! In-process MTProto server for driving a `Sender` over `tokio::io::duplex`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tether_crypto::{AuthKey, DequeBuffer, Side, decrypt_data_v2_as, encrypt_data_v2_as};
use tether_mtproto::message::{constructor_id, pack_plain, unpack_plain};
use tether_mtproto::transport::{self, Abridged, Transport};
use tether_sender::transport::{FramedReader, FramedWriter};
use tether_sender::{Connector, SenderConfig, TransportError, TransportKind, framed};
use tether_tl_types::{Deserializable, Identifiable, Serializable, enums, functions, types};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

pub const KEY: [u8; 256] = [0x42; 256];
pub const WAIT: Duration = Duration::from_secs(5);

/// Fast retries, no keep-alive pings.
pub fn config() -> SenderConfig {
    SenderConfig {
        retry_delay: Duration::from_millis(10),
        connect_timeout: Duration::from_secs(1),
        handshake_timeout: Duration::from_secs(1),
        ping_interval: None,
        ..Default::default()
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

pub fn ping(ping_id: i64) -> Vec<u8> {
    functions::Ping { ping_id }.to_bytes()
}

// ─── Connector ────────────────────────────────────────────────────────────────

/// Hands the server end of every new connection to the test.
#[derive(Clone)]
pub struct DuplexConnector {
    tx: mpsc::UnboundedSender<(String, DuplexStream)>,
}

pub type Incoming = mpsc::UnboundedReceiver<(String, DuplexStream)>;

pub fn connector() -> (DuplexConnector, Incoming) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DuplexConnector { tx }, rx)
}

impl Connector for DuplexConnector {
    type Reader = FramedReader<ReadHalf<DuplexStream>>;
    type Writer = FramedWriter<WriteHalf<DuplexStream>>;

    async fn connect(&self, addr: &str) -> Result<(Self::Reader, Self::Writer), TransportError> {
        let (client, server) = tokio::io::duplex(1 << 20);
        self.tx.send((addr.to_string(), server)).map_err(|_| TransportError::Closed)?;
        Ok(framed(client, &TransportKind::Abridged))
    }
}

// ─── Server ───────────────────────────────────────────────────────────────────

/// One message the client sent, with the frame it came in.
#[derive(Clone, Debug)]
pub struct ClientMessage {
    pub salt: i64,
    pub session_id: i64,
    pub container_id: Option<i64>,
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

pub struct ServerConn {
    pub addr: String,
    stream: DuplexStream,
    key: AuthKey,
    buffer: Vec<u8>,
    seen_init: bool,
    queue: VecDeque<ClientMessage>,
    salt: i64,
    session_id: i64,
    counter: i64,
    /// Seconds the server's clock runs ahead of ours.
    pub clock_skew: i64,
}

impl ServerConn {
    /// Take the next connection the client opens.
    pub async fn accept(incoming: &mut Incoming, key: [u8; 256]) -> Self {
        let (addr, stream) = tokio::time::timeout(WAIT, incoming.recv())
            .await
            .expect("client did not connect")
            .expect("connector dropped");
        Self {
            addr,
            stream,
            key: AuthKey::from_bytes(key),
            buffer: Vec::new(),
            seen_init: false,
            queue: VecDeque::new(),
            salt: 0,
            session_id: 0,
            counter: 0,
            clock_skew: 0,
        }
    }

    /// The next transport payload, or `None` once the client hung up.
    pub async fn read_payload(&mut self) -> Option<Vec<u8>> {
        if !self.seen_init {
            let mut tag = [0u8; 1];
            self.stream.read_exact(&mut tag).await.ok()?;
            assert_eq!(tag[0], 0xef, "expected abridged init byte");
            self.seen_init = true;
        }
        loop {
            match Abridged.unpack(&self.buffer) {
                Ok(unpacked) => {
                    let payload = self.buffer[unpacked.data_start..unpacked.data_end].to_vec();
                    self.buffer.drain(..unpacked.next_offset);
                    return Some(payload);
                }
                Err(transport::Error::MissingBytes) => {}
                Err(e) => panic!("client sent a bad frame: {e}"),
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn write_payload(&mut self, payload: &[u8]) {
        let mut out = Vec::new();
        Abridged.pack(payload, &mut out);
        self.stream.write_all(&out).await.expect("client hung up");
    }

    // ── plaintext ───────────────────────────────────────────────────────────

    pub async fn read_plain(&mut self) -> Option<(i64, Vec<u8>)> {
        let frame = self.read_payload().await?;
        let (msg_id, body) = unpack_plain(&frame).expect("not a plaintext frame");
        Some((msg_id, body.to_vec()))
    }

    pub async fn send_plain(&mut self, body: &[u8]) {
        let msg_id = self.next_msg_id();
        self.write_payload(&pack_plain(msg_id, body)).await;
    }

    // ── encrypted ───────────────────────────────────────────────────────────

    /// The next message, with containers flattened.
    pub async fn next_message(&mut self) -> Option<ClientMessage> {
        while self.queue.is_empty() {
            let mut frame = self.read_payload().await?;
            let plain = decrypt_data_v2_as(&mut frame, &self.key, Side::Client).expect("bad frame");
            let long = |at: usize| i64::from_le_bytes(plain[at..at + 8].try_into().unwrap());
            let int = |at: usize| i32::from_le_bytes(plain[at..at + 4].try_into().unwrap());
            let (salt, session_id, msg_id, seq_no, len) = (long(0), long(8), long(16), int(24), int(28));
            let body = plain[32..32 + len as usize].to_vec();
            self.salt = salt;
            self.session_id = session_id;

            if constructor_id(&body) == Some(types::MsgContainer::CONSTRUCTOR_ID) {
                let enums::MessageContainer::MsgContainer(container) =
                    enums::MessageContainer::from_bytes(&body).expect("bad container");
                for m in container.messages.0 {
                    self.queue.push_back(ClientMessage {
                        salt,
                        session_id,
                        container_id: Some(msg_id),
                        msg_id: m.msg_id,
                        seq_no: m.seqno,
                        body: m.body,
                    });
                }
            } else {
                self.queue.push_back(ClientMessage { salt, session_id, container_id: None, msg_id, seq_no, body });
            }
        }
        self.queue.pop_front()
    }

    /// The next message that is not an ack.
    pub async fn next_request(&mut self) -> Option<ClientMessage> {
        loop {
            let message = self.next_message().await?;
            if constructor_id(&message.body) != Some(types::MsgsAck::CONSTRUCTOR_ID) {
                return Some(message);
            }
        }
    }

    fn next_msg_id(&mut self) -> i64 {
        self.counter += 1;
        ((now_secs() + self.clock_skew) << 32) | (self.counter << 2) | 1
    }

    fn encrypt(&mut self, key: &AuthKey, content_related: bool, body: &[u8]) -> Vec<u8> {
        let msg_id = self.next_msg_id();
        let seq_no: i32 = if content_related { 1 } else { 2 };
        let mut buffer = DequeBuffer::with_capacity(32 + body.len() + 32, 24);
        buffer.extend(self.salt.to_le_bytes());
        buffer.extend(self.session_id.to_le_bytes());
        buffer.extend(msg_id.to_le_bytes());
        buffer.extend(seq_no.to_le_bytes());
        buffer.extend((body.len() as i32).to_le_bytes());
        buffer.extend(body.iter().copied());
        encrypt_data_v2_as(&mut buffer, key, Side::Server);
        buffer.to_vec()
    }

    /// Send `body` encrypted for the client's current session.
    pub async fn send(&mut self, content_related: bool, body: &[u8]) {
        let key = self.key.clone();
        let frame = self.encrypt(&key, content_related, body);
        self.write_payload(&frame).await;
    }

    /// Send `body` encrypted under a key the client does not have.
    pub async fn send_with_key(&mut self, key: [u8; 256], body: &[u8]) {
        let frame = self.encrypt(&AuthKey::from_bytes(key), true, body);
        self.write_payload(&frame).await;
    }

    /// A bare transport status such as `-404`.
    pub async fn send_status(&mut self, code: i32) {
        self.write_payload(&code.to_le_bytes()).await;
    }

    pub async fn reply(&mut self, req_msg_id: i64, result: &[u8]) {
        let body = enums::RpcResult::from(types::RpcResult { req_msg_id, result: result.to_vec() }).to_bytes();
        self.send(true, &body).await;
    }

    pub async fn reply_error(&mut self, req_msg_id: i64, error_code: i32, message: &str) {
        let error = enums::RpcError::from(types::RpcError {
            error_code,
            error_message: message.to_string(),
        })
        .to_bytes();
        self.reply(req_msg_id, &error).await;
    }
}
