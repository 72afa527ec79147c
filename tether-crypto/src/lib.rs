//! Cryptographic primitives for Telegram MTProto.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption
//! - AES-256-CTR keys for the obfuscated transport
//! - SHA-1 / SHA-256 hash macros
//! - Pollard-rho PQ factorization
//! - RSA padding (MTProto RSA-PAD scheme) and the trusted server keys
//! - `AuthKey`: 256-byte session key
//! - MTProto 2.0 message encryption / decryption
//! - DH nonce→key derivation

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod deque_buffer;
mod factorize;
pub mod obfuscated;
pub mod rsa;
mod sha;

pub use auth_key::AuthKey;
pub use deque_buffer::DequeBuffer;
pub use factorize::{FactorizeError, factorize};
pub use obfuscated::ObfuscatedCipher;

use num_bigint::BigUint;
use num_traits::Zero;

#[doc(hidden)]
pub mod __private {
    pub use crate::sha::digest_parts;
    pub use sha1::Sha1;
    pub use sha2::Sha256;
}

// ─── Randomness ──────────────────────────────────────────────────────────────

/// Fill an array from the operating system's CSPRNG.
///
/// # Panics
///
/// If the OS random source is unavailable. There is no meaningful way to
/// continue an encrypted session without one.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out).expect("OS random source unavailable");
    out
}

/// A random `i64`, used for session ids and ping ids.
pub fn random_i64() -> i64 {
    i64::from_le_bytes(random_array())
}

// ─── Big integers ────────────────────────────────────────────────────────────

/// `base ^ exp mod modulus`, or `None` if `modulus` is zero.
pub fn mod_exp(base: &BigUint, exp: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    if modulus.is_zero() {
        return None;
    }
    Some(base.modpow(exp, modulus))
}

// ─── MTProto 2.0 encrypt / decrypt ───────────────────────────────────────────

/// Errors from [`decrypt_data_v2`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}
impl std::error::Error for DecryptError {}

/// The party that produced a message.
///
/// Both ends derive keys from the producer's side, so a message encrypted
/// with `Side::Client` is decrypted with `Side::Client` as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// Offset into the auth key used by this direction.
    pub fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// Derive the AES key and IV for one message from its `msg_key`.
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256!(msg_key, &auth_key.data[x..x + 36]);
    let sha_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..24].copy_from_slice(&sha_b[8..24]);
    aes_key[24..].copy_from_slice(&sha_a[24..]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..8].copy_from_slice(&sha_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha_b[24..]);

    (aes_key, aes_iv)
}

/// Padding appended to a plaintext of `len` bytes: between 12 and 27 bytes,
/// bringing the total to a multiple of 16.
fn padding_len(len: usize) -> usize {
    12 + (16 - (len + 12) % 16) % 16
}

fn msg_key_for(auth_key: &AuthKey, plaintext: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256!(&auth_key.data[88 + x..88 + x + 32], plaintext);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

/// Encrypt `buffer` (in-place, with prepended header) using MTProto 2.0,
/// as the client.
///
/// After this call `buffer` contains `key_id || msg_key || ciphertext`.
pub fn encrypt_data_v2(buffer: &mut DequeBuffer, auth_key: &AuthKey) {
    encrypt_data_v2_as(buffer, auth_key, Side::Client)
}

/// Like [`encrypt_data_v2`] with an explicit producing side.
pub fn encrypt_data_v2_as(buffer: &mut DequeBuffer, auth_key: &AuthKey, side: Side) {
    do_encrypt_data_v2(buffer, auth_key, side, &random_array());
}

pub(crate) fn do_encrypt_data_v2(
    buffer: &mut DequeBuffer,
    auth_key: &AuthKey,
    side: Side,
    rnd: &[u8; 32],
) {
    let pad = padding_len(buffer.len());
    buffer.extend(rnd.iter().take(pad).copied());

    let msg_key = msg_key_for(auth_key, buffer.as_ref(), side);
    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_encrypt(buffer.as_mut(), &key, &iv);

    buffer.extend_front(&msg_key);
    buffer.extend_front(&auth_key.key_id);
}

/// Decrypt an MTProto 2.0 ciphertext sent by the server.
///
/// `buffer` must start with `key_id || msg_key || ciphertext`.
/// On success returns a slice of `buffer` containing the plaintext.
pub fn decrypt_data_v2<'a>(
    buffer: &'a mut [u8],
    auth_key: &AuthKey,
) -> Result<&'a mut [u8], DecryptError> {
    decrypt_data_v2_as(buffer, auth_key, Side::Server)
}

/// Like [`decrypt_data_v2`] for a message produced by `side`.
pub fn decrypt_data_v2_as<'a>(
    buffer: &'a mut [u8],
    auth_key: &AuthKey,
    side: Side,
) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() < 24 || (buffer.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if auth_key.key_id != buffer[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&buffer[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_decrypt(&mut buffer[24..], &key, &iv);

    if msg_key != msg_key_for(auth_key, &buffer[24..], side) {
        return Err(DecryptError::MessageKeyMismatch);
    }
    Ok(&mut buffer[24..])
}

/// Derive `(key, iv)` from nonces for decrypting `ServerDhParams.encrypted_answer`.
pub fn generate_key_data_from_nonce(
    server_nonce: &[u8; 16],
    new_nonce: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}
