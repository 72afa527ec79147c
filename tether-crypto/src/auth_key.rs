//! The 256-byte shared secret produced by the DH exchange.

use crate::sha1;

/// An authorization key with its derived identifiers.
///
/// `key_id` is `SHA1(key)[12..20]` and is sent in front of every encrypted
/// message; `aux_hash` is `SHA1(key)[0..8]` and only matters while
/// verifying the final handshake answer.
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    aux_hash: [u8; 8],
    pub(crate) key_id: [u8; 8],
}

impl AuthKey {
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&sha[..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&sha[12..20]);
        Self { data, aux_hash, key_id }
    }

    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    /// The key id as it appears on the wire.
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// The key id read as a little-endian `i64`.
    pub fn id(&self) -> i64 {
        i64::from_le_bytes(self.key_id)
    }

    /// `SHA1(new_nonce ‖ number ‖ aux_hash)[4..20]`, where `number` is 1, 2
    /// or 3 for `dh_gen_ok`, `dh_gen_retry` and `dh_gen_fail`.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let sha = sha1!(new_nonce, [number], &self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&sha[4..]);
        out
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthKey").field("id", &self.id()).finish_non_exhaustive()
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for AuthKey {}
