//! Apple Remote Desktop authentication (security type 30).
//!
//! Diffie–Hellman with a server-chosen modulus size (2-byte big-endian
//! key length prefix), MD5-derived AES-128 key, and AES-128-ECB
//! encrypted, randomly padded credential halves.

use aes::Aes128;
use cipher::{BlockEncryptMut, KeyInit};
use ecb::Encryptor;
use md5::{Digest, Md5};
use num_bigint::BigUint;
use rand::RngCore;

use crate::vnc::error::VncError;

const CREDENTIAL_HALF_LEN: usize = 64;

/// The variable-length DH parameters ARD sends: 2-byte generator length
/// + generator, 2-byte key length + modulus, then the server's public
/// value (same length as the modulus).
pub struct ArdDhParams {
    pub generator: BigUint,
    pub modulus: BigUint,
    pub modulus_len: usize,
    pub server_public: BigUint,
}

impl ArdDhParams {
    pub fn parse(data: &[u8]) -> Result<Self, VncError> {
        let mut offset = 0;
        let gen_len = read_u16(data, offset)?;
        offset += 2;
        let generator = read_biguint(data, offset, gen_len)?;
        offset += gen_len;

        let mod_len = read_u16(data, offset)?;
        offset += 2;
        let modulus = read_biguint(data, offset, mod_len)?;
        offset += mod_len;

        let server_public = read_biguint(data, offset, mod_len)?;

        Ok(Self { generator, modulus, modulus_len: mod_len, server_public })
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<usize, VncError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or_else(|| VncError::protocol("ARD DH parameters truncated (length prefix)"))
}

fn read_biguint(data: &[u8], offset: usize, len: usize) -> Result<BigUint, VncError> {
    data.get(offset..offset + len)
        .map(BigUint::from_bytes_be)
        .ok_or_else(|| VncError::protocol("ARD DH parameters truncated (value)"))
}

/// Result of the client's DH step: our public value (fixed to the
/// modulus width, zero-padded) and the derived 16-byte AES key.
pub struct ArdDhResult {
    pub client_public: Vec<u8>,
    pub aes_key: [u8; 16],
}

pub fn perform_dh(params: &ArdDhParams) -> ArdDhResult {
    let mut priv_bytes = vec![0u8; params.modulus_len];
    rand::thread_rng().fill_bytes(&mut priv_bytes);
    perform_dh_with_private(params, &priv_bytes)
}

pub fn perform_dh_with_private(params: &ArdDhParams, private: &[u8]) -> ArdDhResult {
    let x = BigUint::from_bytes_be(private);
    let client_public_int = params.generator.modpow(&x, &params.modulus);
    let shared = params.server_public.modpow(&x, &params.modulus);

    let mut client_public = shared_to_fixed_width(&client_public_int, params.modulus_len);
    let shared_bytes = shared_to_fixed_width(&shared, params.modulus_len);

    let mut hasher = Md5::new();
    hasher.update(&shared_bytes);
    let digest = hasher.finalize();
    let mut aes_key = [0u8; 16];
    aes_key.copy_from_slice(&digest[..16]);

    client_public.truncate(params.modulus_len);
    ArdDhResult { client_public, aes_key }
}

fn shared_to_fixed_width(v: &BigUint, width: usize) -> Vec<u8> {
    let bytes = v.to_bytes_be();
    let mut out = vec![0u8; width];
    let n = bytes.len().min(width);
    out[width - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    out
}

/// Build the AES-128-ECB encrypted credential blob: a 128-byte plaintext
/// of `username\0<random padding>` (bytes 0..64) followed by
/// `password\0<random padding>` (bytes 64..128).
pub fn build_credentials(username: &str, password: &str, aes_key: &[u8; 16]) -> Result<Vec<u8>, VncError> {
    let mut plain = [0u8; 2 * CREDENTIAL_HALF_LEN];
    rand::thread_rng().fill_bytes(&mut plain);
    write_half(&mut plain[0..CREDENTIAL_HALF_LEN], username);
    write_half(&mut plain[CREDENTIAL_HALF_LEN..], password);

    let mut cipher = Encryptor::<Aes128>::new_from_slice(aes_key)
        .map_err(|e| VncError::decode(format!("invalid AES-128 key: {e}")))?;

    let mut buf = plain.to_vec();
    // ECB on 64-byte halves, each a whole number of 16-byte blocks; no
    // padding is added since the halves are fixed-size.
    for chunk in buf.chunks_mut(16) {
        let mut ga = cipher::generic_array::GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block_mut(&mut ga);
        chunk.copy_from_slice(&ga);
    }
    Ok(buf)
}

fn write_half(slice: &mut [u8], text: &str) {
    let bytes = text.as_bytes();
    let copy_len = bytes.len().min(slice.len() - 1);
    slice[..copy_len].copy_from_slice(&bytes[..copy_len]);
    slice[copy_len] = 0;
    // Remaining bytes keep their pre-filled random padding.
}
