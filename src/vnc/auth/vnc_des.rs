//! VNC (DES challenge-response) authentication, security type 2.
//!
//! The server sends a 16-byte challenge. The client encrypts it using
//! DES with the password (up to 8 chars, null-padded) as the key, with
//! each key byte bit-reversed — a quirk of the original RealVNC d3des
//! implementation that every RFB server since has had to match.

use cipher::{BlockEncrypt, KeyInit};
use des::Des;

use crate::vnc::error::VncError;

/// Encrypt a 16-byte VNC auth challenge with `password`, returning the
/// 16-byte response.
pub fn respond_to_challenge(challenge: &[u8; 16], password: &str) -> Result<[u8; 16], VncError> {
    let key = make_des_key(password);
    let mut response = [0u8; 16];
    response[0..8].copy_from_slice(&des_encrypt_block(&key, &challenge[0..8]));
    response[8..16].copy_from_slice(&des_encrypt_block(&key, &challenge[8..16]));
    Ok(response)
}

/// Derive the DES key from a VNC password: truncate/null-pad to 8 bytes,
/// then bit-reverse each byte.
fn make_des_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    let bytes = password.as_bytes();
    let n = std::cmp::min(8, bytes.len());
    key[..n].copy_from_slice(&bytes[..n]);
    for b in &mut key {
        *b = reverse_bits(*b);
    }
    key
}

fn reverse_bits(mut b: u8) -> u8 {
    let mut result = 0u8;
    for _ in 0..8 {
        result = (result << 1) | (b & 1);
        b >>= 1;
    }
    result
}

fn des_encrypt_block(key: &[u8; 8], block: &[u8]) -> [u8; 8] {
    let cipher = Des::new_from_slice(key).expect("DES key must be 8 bytes");
    let mut output = cipher::generic_array::GenericArray::clone_from_slice(&block[..8]);
    cipher.encrypt_block(&mut output);
    let mut result = [0u8; 8];
    result.copy_from_slice(&output);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_bits_zero() {
        assert_eq!(reverse_bits(0), 0);
    }

    #[test]
    fn reverse_bits_one() {
        assert_eq!(reverse_bits(1), 128);
    }

    #[test]
    fn reverse_bits_0a() {
        assert_eq!(reverse_bits(0x0A), 0x50);
    }

    #[test]
    fn reverse_bits_roundtrip() {
        for b in 0..=255u8 {
            assert_eq!(reverse_bits(reverse_bits(b)), b);
        }
    }

    #[test]
    fn make_des_key_short() {
        let key = make_des_key("abc");
        assert_eq!(key[0], reverse_bits(b'a'));
        assert_eq!(key[1], reverse_bits(b'b'));
        assert_eq!(key[2], reverse_bits(b'c'));
        for i in 3..8 {
            assert_eq!(key[i], 0);
        }
    }

    #[test]
    fn make_des_key_truncated() {
        let key = make_des_key("longpassword123");
        assert_eq!(key[7], reverse_bits(b's'));
    }

    #[test]
    fn des_encrypt_block_known_vector() {
        // NIST DES test vector.
        let key = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF];
        let plaintext = [0x4E, 0x6F, 0x77, 0x20, 0x69, 0x73, 0x20, 0x74];
        let expected = [0x3F, 0xA4, 0x0E, 0x8A, 0x98, 0x4D, 0x48, 0x15];
        assert_eq!(des_encrypt_block(&key, &plaintext), expected);
    }

    #[test]
    fn des_encrypt_block_zeros() {
        let result = des_encrypt_block(&[0u8; 8], &[0u8; 8]);
        assert_eq!(result, [0x8C, 0xA6, 0x4D, 0xE9, 0xC1, 0xB1, 0x23, 0xA7]);
    }

    #[test]
    fn des_encrypt_block_all_ones() {
        let result = des_encrypt_block(&[0xFF; 8], &[0xFF; 8]);
        assert_eq!(result, [0x73, 0x59, 0xB2, 0x16, 0x3E, 0x4E, 0xDC, 0x58]);
    }

    #[test]
    fn respond_to_challenge_produces_16_bytes_deterministically() {
        let challenge = [42u8; 16];
        let r1 = respond_to_challenge(&challenge, "test").unwrap();
        let r2 = respond_to_challenge(&challenge, "test").unwrap();
        assert_eq!(r1, r2);
        assert_eq!(r1.len(), 16);
    }

    #[test]
    fn respond_to_challenge_different_passwords_differ() {
        let challenge = [42u8; 16];
        let r1 = respond_to_challenge(&challenge, "pass1").unwrap();
        let r2 = respond_to_challenge(&challenge, "pass2").unwrap();
        assert_ne!(r1, r2);
    }
}
