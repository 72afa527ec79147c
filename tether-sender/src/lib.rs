//! # tether-sender
//!
//! Async MTProto 2.0 sender built on [`tether_mtproto`].
//!
//! ## Features
//! - Many concurrent requests over one connection, batched into containers
//! - Acks, salt changes, clock drift and sequence corrections handled inline
//! - Auth key generation on first connect, reported through a callback
//! - Automatic reconnection that resends whatever was unanswered
//! - Typed RPC errors and a `FLOOD_WAIT` retry policy
//! - DC-aware [`Client`] that follows migrate errors
//! - Abridged, Intermediate, Full and Obfuscated2 framings over TCP or SOCKS5
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_sender::{Client, ClientConfig, MemorySessionStore, TcpConnector};
//! use tether_tl_types::functions;
//!
//! # async fn f() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(
//!     TcpConnector::default(),
//!     Arc::new(MemorySessionStore::new()),
//!     ClientConfig::default(),
//! )
//! .await?;
//! let pong = client.invoke(&functions::Ping { ping_id: 42 }).await?;
//! println!("{pong:?}");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod client;
mod errors;
mod handshake;
mod packer;
mod request;
mod retry;
mod sender;
mod session_store;
pub mod socks5;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use errors::{
    ConnectError, ErrorCategory, InvocationError, MigrateReason, RpcError, RpcErrorKind,
    TransportError,
};
pub use request::PendingRequest;
pub use retry::{AutoSleep, NoRetries, RetryContext, RetryPolicy};
pub use sender::{AuthData, AuthKeyCallback, ConnectionState, Sender, SenderConfig, UpdateStream};
pub use session_store::{
    DEFAULT_HOME_DC, DcEntry, MemorySessionStore, PersistedSession, SessionStore,
    default_dc_addresses,
};
pub use socks5::{Socks5Config, Socks5Credentials};
pub use transport::{
    Connector, FrameReader, FrameWriter, ObfuscatedFraming, TcpConnector, TransportKind, framed,
    framed_halves,
};
