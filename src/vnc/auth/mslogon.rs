//! Microsoft Logon authentication (security type 0xFFFFFFFA).
//!
//! A 64-bit Diffie–Hellman exchange establishes a shared key, then the
//! client's username (zero-padded to 256 bytes) and password (zero-padded
//! to 64 bytes) are DES-CBC-XOR encrypted with it and sent as a single
//! blob — username first, then password.

use cipher::{BlockEncrypt, KeyInit};
use des::Des;
use num_bigint::BigUint;

use crate::vnc::error::VncError;

const USERNAME_FIELD_LEN: usize = 256;
const PASSWORD_FIELD_LEN: usize = 64;

/// The three 8-byte DH parameters the server sends before MSLogon auth:
/// generator, modulus, and the server's public value.
pub struct MsLoginDhParams {
    pub generator: [u8; 8],
    pub modulus: [u8; 8],
    pub server_public: [u8; 8],
}

impl MsLoginDhParams {
    pub fn parse(data: &[u8]) -> Result<Self, VncError> {
        if data.len() < 24 {
            return Err(VncError::protocol("MSLogon DH parameters truncated"));
        }
        let mut generator = [0u8; 8];
        let mut modulus = [0u8; 8];
        let mut server_public = [0u8; 8];
        generator.copy_from_slice(&data[0..8]);
        modulus.copy_from_slice(&data[8..16]);
        server_public.copy_from_slice(&data[16..24]);
        Ok(Self { generator, modulus, server_public })
    }
}

/// Result of running the client half of the DH exchange: our own public
/// value (to send back) and the derived 8-byte shared key.
pub struct MsLoginDhResult {
    pub client_public: [u8; 8],
    pub shared_key: [u8; 8],
}

/// Run the client side of MSLogon's DH exchange with a fresh random
/// private exponent.
pub fn perform_dh(params: &MsLoginDhParams) -> MsLoginDhResult {
    use rand::RngCore;
    let mut priv_bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut priv_bytes);
    perform_dh_with_private(params, &priv_bytes)
}

/// Deterministic DH step used by tests: caller supplies the private
/// exponent directly instead of drawing from the system RNG.
pub fn perform_dh_with_private(params: &MsLoginDhParams, private: &[u8; 8]) -> MsLoginDhResult {
    let g = BigUint::from_bytes_be(&params.generator);
    let m = BigUint::from_bytes_be(&params.modulus);
    let x = BigUint::from_bytes_be(private);
    let server_pub = BigUint::from_bytes_be(&params.server_public);

    let client_public = g.modpow(&x, &m);
    let shared = server_pub.modpow(&x, &m);

    MsLoginDhResult {
        client_public: to_fixed_8(&client_public),
        shared_key: to_fixed_8(&shared),
    }
}

fn to_fixed_8(v: &BigUint) -> [u8; 8] {
    let bytes = v.to_bytes_be();
    let mut out = [0u8; 8];
    let n = bytes.len().min(8);
    out[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    out
}

/// Build the encrypted username/password blob sent after the DH exchange.
pub fn build_credentials(username: &str, password: &str, shared_key: &[u8; 8]) -> Vec<u8> {
    let mut plain = vec![0u8; USERNAME_FIELD_LEN + PASSWORD_FIELD_LEN];
    let u = username.as_bytes();
    let p = password.as_bytes();
    let ulen = u.len().min(USERNAME_FIELD_LEN);
    let plen = p.len().min(PASSWORD_FIELD_LEN);
    plain[..ulen].copy_from_slice(&u[..ulen]);
    plain[USERNAME_FIELD_LEN..USERNAME_FIELD_LEN + plen].copy_from_slice(&p[..plen]);

    encrypt_bytes_2(&plain, shared_key)
}

/// gtk-vnc's `vncEncryptBytes2`: DES-CBC-XOR chaining keyed by the DH
/// shared secret, which also doubles as the initial chaining value.
fn encrypt_bytes_2(bytes: &[u8], key: &[u8; 8]) -> Vec<u8> {
    let cipher = Des::new_from_slice(key).expect("DES key must be 8 bytes");
    let mut out = vec![0u8; bytes.len()];
    let mut prev = *key;

    for chunk_start in (0..bytes.len()).step_by(8) {
        let chunk_end = (chunk_start + 8).min(bytes.len());
        let mut block = [0u8; 8];
        block[..chunk_end - chunk_start].copy_from_slice(&bytes[chunk_start..chunk_end]);

        let mut xored = [0u8; 8];
        for i in 0..8 {
            xored[i] = block[i] ^ prev[i];
        }

        let mut ga = cipher::generic_array::GenericArray::clone_from_slice(&xored);
        cipher.encrypt_block(&mut ga);
        let cipher_block: [u8; 8] = ga.into();

        out[chunk_start..chunk_end].copy_from_slice(&cipher_block[..chunk_end - chunk_start]);
        prev = cipher_block;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(g: u64, m: u64, server_pub: u64) -> MsLoginDhParams {
        MsLoginDhParams {
            generator: g.to_be_bytes(),
            modulus: m.to_be_bytes(),
            server_public: server_pub.to_be_bytes(),
        }
    }

    #[test]
    fn parse_dh_params_from_wire() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u64.to_be_bytes());
        data.extend_from_slice(&23u64.to_be_bytes());
        data.extend_from_slice(&4u64.to_be_bytes());
        let parsed = MsLoginDhParams::parse(&data).unwrap();
        assert_eq!(parsed.generator, 5u64.to_be_bytes());
        assert_eq!(parsed.modulus, 23u64.to_be_bytes());
        assert_eq!(parsed.server_public, 4u64.to_be_bytes());
    }

    #[test]
    fn parse_dh_params_too_short() {
        assert!(MsLoginDhParams::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn dh_exchange_derives_matching_shared_key() {
        // Classic textbook DH over a small modulus: g=5, m=23. Server's
        // "private" exponent is 6 (public = 5^6 mod 23 = 8).
        let p = params(5, 23, 8);
        let client_private = 15u64.to_be_bytes();
        let client = perform_dh_with_private(&p, &client_private);

        // Mirror the server side to confirm both derive the same secret.
        let g = BigUint::from(5u64);
        let m = BigUint::from(23u64);
        let server_priv = BigUint::from(6u64);
        let client_pub = BigUint::from_bytes_be(&client.client_public);
        let server_shared = client_pub.modpow(&server_priv, &m);
        let expected = to_fixed_8(&server_shared);

        assert_eq!(client.shared_key, expected);
        let _ = g;
    }

    #[test]
    fn build_credentials_has_fixed_length() {
        let key = [1u8; 8];
        let blob = build_credentials("alice", "hunter2", &key);
        assert_eq!(blob.len(), USERNAME_FIELD_LEN + PASSWORD_FIELD_LEN);
    }

    #[test]
    fn build_credentials_deterministic_for_same_key() {
        let key = [7u8; 8];
        let a = build_credentials("bob", "secret", &key);
        let b = build_credentials("bob", "secret", &key);
        assert_eq!(a, b);
    }

    #[test]
    fn build_credentials_changes_with_key() {
        let a = build_credentials("bob", "secret", &[1u8; 8]);
        let b = build_credentials("bob", "secret", &[2u8; 8]);
        assert_ne!(a, b);
    }

    #[test]
    fn encrypt_bytes_2_chains_blocks() {
        // Changing byte 0 of block 2's plaintext must not change block 1's
        // ciphertext (the chain only flows forward), but must change block 2's.
        let key = [9u8; 8];
        let mut plain_a = vec![0u8; 16];
        let mut plain_b = vec![0u8; 16];
        plain_b[8] = 0xFF;

        let ct_a = encrypt_bytes_2(&plain_a, &key);
        let ct_b = encrypt_bytes_2(&plain_b, &key);
        assert_eq!(ct_a[0..8], ct_b[0..8]);
        assert_ne!(ct_a[8..16], ct_b[8..16]);
        let _ = &mut plain_a;
    }
}
