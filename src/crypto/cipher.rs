//! Symmetric protection: AEAD sealing and MAC computation.
//!
//! Nonces are deterministic: four zero bytes followed by the little-endian
//! sequence number, so a (key, sequence) pair maps to exactly one nonce.
//! Handshake keys seal a single record each at sequence zero; session keys
//! advance the sequence with every protected message.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::kdf::Secret32;
use crate::error::{Error, Result};
use crate::suite::{AeadAlgorithm, MacAlgorithm};

pub(crate) const NONCE_LEN: usize = 12;
pub(crate) const TAG_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Builds the 12-byte nonce for a sequence number.
pub(crate) fn nonce_for(sequence: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[4..].copy_from_slice(&sequence.to_le_bytes());
    nonce
}

/// AEAD-seals `plaintext`. The returned buffer is the ciphertext with the
/// 16-byte tag appended.
pub(crate) fn seal(
    algorithm: AeadAlgorithm,
    key: &Secret32,
    sequence: u64,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let nonce = nonce_for(sequence);
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let sealed = match algorithm {
        AeadAlgorithm::ChaCha20Poly1305 => {
            ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_bytes()))
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload)
        }
        AeadAlgorithm::Aes256Gcm => {
            Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_bytes()))
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload)
        }
    };
    sealed.map_err(|_| Error::EncryptionFailure)
}

/// Opens an AEAD-sealed buffer.
///
/// Authentication and decryption failures are indistinguishable; callers map
/// the single error to their own taxonomy.
pub(crate) fn open(
    algorithm: AeadAlgorithm,
    key: &Secret32,
    sequence: u64,
    aad: &[u8],
    sealed: &[u8],
) -> Result<Vec<u8>> {
    let nonce = nonce_for(sequence);
    let payload = Payload { msg: sealed, aad };
    let opened = match algorithm {
        AeadAlgorithm::ChaCha20Poly1305 => {
            ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_bytes()))
                .decrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload)
        }
        AeadAlgorithm::Aes256Gcm => {
            Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_bytes()))
                .decrypt(aes_gcm::Nonce::from_slice(&nonce), payload)
        }
    };
    opened.map_err(|_| Error::DecryptionFailure)
}

/// Computes the MAC over the concatenation of `parts`.
pub(crate) fn compute_mac(
    algorithm: MacAlgorithm,
    key: &Secret32,
    parts: &[&[u8]],
) -> Result<Vec<u8>> {
    match algorithm {
        MacAlgorithm::HmacSha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
                .map_err(|_| Error::EncryptionFailure)?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// Constant-time MAC verification.
pub(crate) fn verify_mac(
    algorithm: MacAlgorithm,
    key: &Secret32,
    parts: &[&[u8]],
    tag: &[u8],
) -> Result<()> {
    match algorithm {
        MacAlgorithm::HmacSha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
                .map_err(|_| Error::InvalidMac)?;
            for part in parts {
                mac.update(part);
            }
            mac.verify_slice(tag).map_err(|_| Error::InvalidMac)
        }
    }
}
