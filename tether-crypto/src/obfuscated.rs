//! AES-256-CTR stream keys for the Obfuscated2 transport.
//!
//! The client opens the connection with a 64-byte header. Bytes `8..56` of
//! that header seed both directions: read forwards they give the outgoing
//! key and IV, reversed they give the incoming ones. When connecting through
//! a proxy with a secret, each key is replaced by `SHA256(key ‖ secret)`.
//! Bytes `56..60` carry the inner framing tag and are only visible after
//! encryption with the outgoing stream.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::sha256;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Tag for the abridged framing inside an obfuscated stream.
pub const TAG_ABRIDGED: [u8; 4] = [0xef; 4];
/// Tag for the intermediate framing inside an obfuscated stream.
pub const TAG_INTERMEDIATE: [u8; 4] = [0xee; 4];
/// Tag for the padded intermediate framing.
pub const TAG_PADDED_INTERMEDIATE: [u8; 4] = [0xdd; 4];

// First words a server could mistake for another protocol.
const FORBIDDEN_FIRST_WORDS: [[u8; 4]; 8] = [
    *b"HEAD",
    *b"POST",
    *b"GET ",
    *b"OPTI",
    *b"PVrG",
    [0xdd; 4],
    [0xee; 4],
    [0x16, 0x03, 0x01, 0x02],
];

/// Whether `nonce` is acceptable as the start of an obfuscated stream.
pub fn is_valid_nonce(nonce: &[u8; 64]) -> bool {
    nonce[0] != 0xef
        && !FORBIDDEN_FIRST_WORDS.iter().any(|w| nonce[..4] == w[..])
        && nonce[4..8] != [0, 0, 0, 0]
}

fn derive(key_iv: &[u8], secret: Option<&[u8; 16]>) -> Aes256Ctr {
    let key: [u8; 32] = match secret {
        Some(secret) => sha256!(&key_iv[..32], secret),
        None => {
            let mut key = [0u8; 32];
            key.copy_from_slice(&key_iv[..32]);
            key
        }
    };
    Aes256Ctr::new(GenericArray::from_slice(&key), GenericArray::from_slice(&key_iv[32..48]))
}

/// The pair of CTR streams for one obfuscated connection.
pub struct ObfuscatedCipher {
    tx: Aes256Ctr,
    rx: Aes256Ctr,
}

impl ObfuscatedCipher {
    /// Build the client side from a valid `nonce` and the framing `tag`.
    ///
    /// Returns the cipher together with the 64-byte header to send first.
    pub fn client(
        nonce: [u8; 64],
        tag: [u8; 4],
        dc_id: Option<i16>,
        secret: Option<&[u8; 16]>,
    ) -> (Self, [u8; 64]) {
        let mut init = nonce;
        init[56..60].copy_from_slice(&tag);
        if let Some(dc) = dc_id {
            init[60..62].copy_from_slice(&dc.to_le_bytes());
        }

        let reversed: Vec<u8> = init[8..56].iter().rev().copied().collect();
        let mut cipher = Self { tx: derive(&init[8..56], secret), rx: derive(&reversed, secret) };

        let mut encrypted = init;
        cipher.tx.apply_keystream(&mut encrypted);
        let mut header = init;
        header[56..].copy_from_slice(&encrypted[56..]);
        (cipher, header)
    }

    /// Build the client side from fresh OS randomness.
    pub fn generate(tag: [u8; 4], dc_id: Option<i16>, secret: Option<&[u8; 16]>) -> (Self, [u8; 64]) {
        let nonce = loop {
            let nonce: [u8; 64] = crate::random_array();
            if is_valid_nonce(&nonce) {
                break nonce;
            }
        };
        Self::client(nonce, tag, dc_id, secret)
    }

    /// Accept a client's header as the receiving end of the stream.
    ///
    /// Returns the cipher and the framing tag the client asked for.
    pub fn server(header: &[u8; 64], secret: Option<&[u8; 16]>) -> (Self, [u8; 4]) {
        let reversed: Vec<u8> = header[8..56].iter().rev().copied().collect();
        let mut cipher = Self { tx: derive(&reversed, secret), rx: derive(&header[8..56], secret) };

        let mut decrypted = *header;
        cipher.rx.apply_keystream(&mut decrypted);
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&decrypted[56..60]);
        (cipher, tag)
    }

    /// Encrypt outgoing bytes in place.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.tx.apply_keystream(buf);
    }

    /// Decrypt incoming bytes in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.rx.apply_keystream(buf);
    }

    /// Split into independent halves for concurrent reading and writing.
    pub fn split(self) -> (ObfuscatedEncryptor, ObfuscatedDecryptor) {
        (ObfuscatedEncryptor(self.tx), ObfuscatedDecryptor(self.rx))
    }
}

/// Outgoing half of an [`ObfuscatedCipher`].
pub struct ObfuscatedEncryptor(Aes256Ctr);

impl ObfuscatedEncryptor {
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

/// Incoming half of an [`ObfuscatedCipher`].
pub struct ObfuscatedDecryptor(Aes256Ctr);

impl ObfuscatedDecryptor {
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce() -> [u8; 64] {
        std::array::from_fn(|i| (i as u8).wrapping_mul(37).wrapping_add(11))
    }

    #[test]
    fn nonce_filter() {
        let mut n = nonce();
        assert!(is_valid_nonce(&n));
        n[0] = 0xef;
        assert!(!is_valid_nonce(&n));
        let mut n = nonce();
        n[..4].copy_from_slice(b"POST");
        assert!(!is_valid_nonce(&n));
        let mut n = nonce();
        n[4..8].fill(0);
        assert!(!is_valid_nonce(&n));
    }

    #[test]
    fn header_hides_tag_but_keeps_key_material() {
        let (_, header) = ObfuscatedCipher::client(nonce(), TAG_INTERMEDIATE, None, None);
        assert_eq!(header[..56], nonce()[..56]);
        assert_ne!(header[56..60], TAG_INTERMEDIATE);
    }

    #[test]
    fn server_recovers_tag_and_streams_match() {
        for secret in [None, Some([0x5a; 16])] {
            let (mut client, header) =
                ObfuscatedCipher::client(nonce(), TAG_ABRIDGED, Some(2), secret.as_ref());
            let (mut server, tag) = ObfuscatedCipher::server(&header, secret.as_ref());
            assert_eq!(tag, TAG_ABRIDGED);

            let mut up = b"client to server".to_vec();
            client.encrypt(&mut up);
            server.decrypt(&mut up);
            assert_eq!(up, b"client to server");

            let mut down = b"server to client".to_vec();
            server.encrypt(&mut down);
            client.decrypt(&mut down);
            assert_eq!(down, b"server to client");
        }
    }

    #[test]
    fn secret_changes_keys() {
        let (mut plain, _) = ObfuscatedCipher::client(nonce(), TAG_ABRIDGED, None, None);
        let (mut keyed, _) = ObfuscatedCipher::client(nonce(), TAG_ABRIDGED, None, Some(&[1; 16]));
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        plain.encrypt(&mut a);
        keyed.encrypt(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn generated_header_is_valid() {
        let (_, header) = ObfuscatedCipher::generate(TAG_ABRIDGED, None, None);
        assert!(is_valid_nonce(&header));
    }
}
