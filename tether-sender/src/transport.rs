//! Async frame transports.
//!
//! A [`Connector`] opens a connection and hands back a reader and a writer
//! half, so the receive and send loops can run independently. The halves
//! move whole MTProto payloads; framing and obfuscation happen inside.
//!
//! | Variant        | Init bytes     | Notes                          |
//! |----------------|----------------|--------------------------------|
//! | `Abridged`     | `0xef`         | Default, smallest overhead     |
//! | `Intermediate` | `0xeeeeeeee`   | Better proxy compat            |
//! | `Full`         | none           | Adds seqno + CRC32             |
//! | `Obfuscated`   | random 64B     | Bypasses DPI / MTProxy         |

use std::future::Future;
use std::time::Duration;

use tether_crypto::obfuscated::{ObfuscatedCipher, ObfuscatedDecryptor, ObfuscatedEncryptor};
use tether_mtproto::transport::{self, Abridged, Full, Intermediate, Transport};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::errors::TransportError;
use crate::socks5::Socks5Config;

const READ_CHUNK: usize = 16 * 1024;

// ─── Traits ───────────────────────────────────────────────────────────────────

/// Receiving half of a connection.
pub trait FrameReader: Send + 'static {
    /// Read the next complete payload.
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// Sending half of a connection.
pub trait FrameWriter: Send + 'static {
    /// Frame and write one payload.
    fn send(&mut self, payload: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection. Errors are ignored.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens connections to a server address.
pub trait Connector: Send + Sync + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    fn connect(
        &self,
        addr: &str,
    ) -> impl Future<Output = Result<(Self::Reader, Self::Writer), TransportError>> + Send;
}

// ─── TransportKind ────────────────────────────────────────────────────────────

/// Framings that can run inside an obfuscated stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObfuscatedFraming {
    #[default]
    Abridged,
    Intermediate,
}

/// Which MTProto transport framing to use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// [Abridged] transport: length prefix is 1 or 4 bytes.
    ///
    /// [Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
    #[default]
    Abridged,
    /// [Intermediate] transport: 4-byte LE length prefix.
    ///
    /// [Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
    Intermediate,
    /// [Full] transport: 4-byte length + seqno + CRC32.
    ///
    /// [Full]: https://core.telegram.org/mtproto/mtproto-transports#full
    Full,
    /// [Obfuscated2]: AES-CTR over an inner framing.
    /// Required for MTProxy and networks with deep-packet inspection.
    ///
    /// `secret` is the 16-byte proxy secret, or `None` for keyless obfuscation.
    ///
    /// [Obfuscated2]: https://core.telegram.org/mtproto/mtproto-transports#obfuscated-2
    Obfuscated { secret: Option<[u8; 16]>, inner: ObfuscatedFraming },
}

impl TransportKind {
    fn codecs(&self) -> (Box<dyn Transport>, Box<dyn Transport>) {
        match self {
            Self::Abridged
            | Self::Obfuscated { inner: ObfuscatedFraming::Abridged, .. } => {
                (Box::new(Abridged), Box::new(Abridged))
            }
            Self::Intermediate
            | Self::Obfuscated { inner: ObfuscatedFraming::Intermediate, .. } => {
                (Box::new(Intermediate), Box::new(Intermediate))
            }
            Self::Full => (Box::new(Full::new()), Box::new(Full::new())),
        }
    }
}

// ─── Framed halves ────────────────────────────────────────────────────────────

/// Reader half produced by [`framed`].
pub struct FramedReader<R> {
    inner: R,
    codec: Box<dyn Transport>,
    cipher: Option<ObfuscatedDecryptor>,
    buffer: Vec<u8>,
}

/// Writer half produced by [`framed`].
pub struct FramedWriter<W> {
    inner: W,
    codec: Box<dyn Transport>,
    cipher: Option<ObfuscatedEncryptor>,
    /// Init bytes or obfuscation header, sent with the first payload.
    preamble: Vec<u8>,
}

/// Wrap already-split stream halves with the framing `kind`.
///
/// `dc_id` is written into the obfuscation header, where proxies read it.
pub fn framed_halves<R, W>(
    reader: R,
    writer: W,
    kind: &TransportKind,
    dc_id: Option<i16>,
) -> (FramedReader<R>, FramedWriter<W>) {
    let (rx_codec, tx_codec) = kind.codecs();
    let (preamble, tx_cipher, rx_cipher) = match kind {
        TransportKind::Obfuscated { secret, .. } => {
            // Every obfuscatable framing has a tag.
            let tag = tx_codec.obfuscated_tag().unwrap_or(tether_crypto::obfuscated::TAG_ABRIDGED);
            let (cipher, header) = ObfuscatedCipher::generate(tag, dc_id, secret.as_ref());
            let (tx, rx) = cipher.split();
            (header.to_vec(), Some(tx), Some(rx))
        }
        _ => (tx_codec.init_bytes().to_vec(), None, None),
    };
    (
        FramedReader { inner: reader, codec: rx_codec, cipher: rx_cipher, buffer: Vec::new() },
        FramedWriter { inner: writer, codec: tx_codec, cipher: tx_cipher, preamble },
    )
}

/// Split any byte stream and wrap both halves with the framing `kind`.
pub fn framed<S>(stream: S, kind: &TransportKind) -> (FramedReader<ReadHalf<S>>, FramedWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    framed_halves(reader, writer, kind, None)
}

impl<R: AsyncRead + Unpin + Send + 'static> FrameReader for FramedReader<R> {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            match self.codec.unpack(&self.buffer) {
                Ok(unpacked) => {
                    let payload = self.buffer[unpacked.data_start..unpacked.data_end].to_vec();
                    self.buffer.drain(..unpacked.next_offset);
                    return Ok(payload);
                }
                Err(transport::Error::MissingBytes) => {}
                Err(e) => return Err(e.into()),
            }

            let start = self.buffer.len();
            self.buffer.resize(start + READ_CHUNK, 0);
            let read = self.inner.read(&mut self.buffer[start..]).await;
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e.into());
                }
            };
            self.buffer.truncate(start + n);
            if n == 0 {
                return Err(TransportError::Closed);
            }
            if let Some(cipher) = &mut self.cipher {
                cipher.apply(&mut self.buffer[start..]);
            }
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> FrameWriter for FramedWriter<W> {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut out = std::mem::take(&mut self.preamble);
        let start = out.len();
        self.codec.pack(payload, &mut out);
        if let Some(cipher) = &mut self.cipher {
            cipher.apply(&mut out[start..]);
        }
        self.inner.write_all(&out).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

// ─── TcpConnector ─────────────────────────────────────────────────────────────

/// Plain TCP, optionally through a SOCKS5 proxy.
#[derive(Clone, Debug, Default)]
pub struct TcpConnector {
    pub transport: TransportKind,
    /// Every connection is tunnelled through this proxy when set.
    pub socks5: Option<Socks5Config>,
    /// Idle time before TCP keep-alive probes start.
    pub keepalive: Option<Duration>,
    /// DC id announced in the obfuscation header.
    pub dc_id: Option<i16>,
}

impl Connector for TcpConnector {
    type Reader = FramedReader<OwnedReadHalf>;
    type Writer = FramedWriter<OwnedWriteHalf>;

    async fn connect(
        &self,
        addr: &str,
    ) -> Result<(Self::Reader, Self::Writer), TransportError> {
        tracing::debug!("[tether] connecting to {addr} ({:?})", self.transport);
        let stream = match &self.socks5 {
            Some(proxy) => proxy.connect(addr).await?,
            None => TcpStream::connect(addr).await?,
        };
        stream.set_nodelay(true)?;
        if let Some(idle) = self.keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(idle);
            socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        }
        let (reader, writer) = stream.into_split();
        Ok(framed_halves(reader, writer, &self.transport, self.dc_id))
    }
}
