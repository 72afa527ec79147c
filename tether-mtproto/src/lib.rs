//! MTProto 2.0 session and transport primitives.
//!
//! This crate handles:
//! * Message ids, sequence numbers and the replay window ([`Session`])
//! * Encrypted and plaintext message framing
//! * Service-message classification ([`Incoming`])
//! * The three-step DH auth key exchange ([`authentication`])
//! * Transport framings (abridged, intermediate, full)
//!
//! Nothing here performs IO. Bring your own socket.

#![deny(unsafe_code)]

pub mod authentication;
pub mod message;
pub mod service;
pub mod session;
pub mod transport;

pub use message::Message;
pub use service::{Incoming, RpcAnswer};
pub use session::Session;
