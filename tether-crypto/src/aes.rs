//! AES-256 in Infinite Garble Extension (IGE) mode.
//!
//! Each block is chained with both the previous ciphertext and the previous
//! plaintext block:
//!
//! ```text
//! c_i = E(p_i ^ c_{i-1}) ^ p_{i-1}
//! ```
//!
//! The 32-byte IV holds `c_0` in its first half and `p_0` in its second.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

fn xor_block(dst: &mut [u8; 16], src: &[u8; 16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

fn split_iv(iv: &[u8; 32]) -> ([u8; 16], [u8; 16]) {
    let mut prev_cipher = [0u8; 16];
    let mut prev_plain = [0u8; 16];
    prev_cipher.copy_from_slice(&iv[..16]);
    prev_plain.copy_from_slice(&iv[16..]);
    (prev_cipher, prev_plain)
}

/// Encrypt `buffer` in place.
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16. Callers pad before encrypting.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0, "IGE input must be block aligned");

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(16) {
        let mut plain = [0u8; 16];
        plain.copy_from_slice(chunk);

        let mut block = plain;
        xor_block(&mut block, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        xor_block(&mut block, &prev_plain);

        chunk.copy_from_slice(&block);
        prev_cipher = block;
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place.
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16. Callers check lengths of
/// untrusted input before decrypting.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0, "IGE input must be block aligned");

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(16) {
        let mut encrypted = [0u8; 16];
        encrypted.copy_from_slice(chunk);

        let mut block = encrypted;
        xor_block(&mut block, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(&mut block));
        xor_block(&mut block, &prev_cipher);

        chunk.copy_from_slice(&block);
        prev_cipher = encrypted;
        prev_plain = block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting<const N: usize>() -> [u8; N] {
        core::array::from_fn(|i| i as u8)
    }

    #[test]
    fn known_vector() {
        let key = counting::<32>();
        let iv = counting::<32>();
        let mut data = [0u8; 32];
        ige_encrypt(&mut data, &key, &iv);
        assert_eq!(
            data,
            [
                0x4a, 0x7f, 0x16, 0x44, 0x1c, 0xee, 0x67, 0x81, 0xe8, 0x37, 0x4f, 0x26, 0x1e, 0xde,
                0xb8, 0x8d, 0xc7, 0x71, 0x47, 0xeb, 0xd5, 0x12, 0x1d, 0xe8, 0xd0, 0xfa, 0xe7, 0x76,
                0x24, 0x23, 0xb6, 0xbf,
            ]
        );
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let key = [0x42u8; 32];
        let iv = counting::<32>();
        for blocks in 1..=5 {
            let original: Vec<u8> = (0..blocks * 16).map(|i| (i * 7) as u8).collect();
            let mut data = original.clone();
            ige_encrypt(&mut data, &key, &iv);
            assert_ne!(data, original);
            ige_decrypt(&mut data, &key, &iv);
            assert_eq!(data, original);
        }
    }

    #[test]
    fn differs_from_cbc_chaining() {
        // Two identical plaintext blocks must not produce the pattern CBC
        // would give with an all-zero second IV half.
        let key = [1u8; 32];
        let mut iv = [0u8; 32];
        iv[16..].fill(0xaa);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        ige_encrypt(&mut a, &key, &iv);
        iv[16..].fill(0x00);
        ige_encrypt(&mut b, &key, &iv);
        assert_ne!(a[..16], b[..16]);
    }
}
