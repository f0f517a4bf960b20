//! Long-term identity keys and signature verification.
//!
//! The protocol never holds a private identity key: producing a signature is
//! delegated to an injected callback, and only verification happens here.

use ed25519_dalek::Verifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::suite::SignatureScheme;

/// A long-term public key tagged with its signature scheme.
///
/// Trusted-key lists are made of these; carrying the scheme with the key means
/// a key can never be verified under the wrong algorithm.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    /// 32-byte Ed25519 public key.
    Ed25519 { public_key: Vec<u8> },
    /// SEC1-encoded P-256 public key.
    EcdsaP256 { public_key: Vec<u8> },
}

impl IdentityKey {
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            IdentityKey::Ed25519 { .. } => SignatureScheme::Ed25519,
            IdentityKey::EcdsaP256 { .. } => SignatureScheme::EcdsaP256Sha256,
        }
    }

    /// The raw public key bytes, exactly as they appear in a certificate's
    /// subject public key info.
    pub fn key_bytes(&self) -> &[u8] {
        match self {
            IdentityKey::Ed25519 { public_key } | IdentityKey::EcdsaP256 { public_key } => {
                public_key
            }
        }
    }

    /// SHA-256 over the scheme tag and the key bytes. Used in logs, where the
    /// key itself would be noise.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        match self {
            IdentityKey::Ed25519 { public_key } => {
                hasher.update(b"ed25519");
                hasher.update(public_key);
            }
            IdentityKey::EcdsaP256 { public_key } => {
                hasher.update(b"ecdsa-p256");
                hasher.update(public_key);
            }
        }
        hasher.finalize().into()
    }

    /// Verifies `signature` over `message`.
    ///
    /// Ed25519 signatures are the standard 64 bytes; ECDSA P-256 signatures
    /// are fixed-size `r || s`. Any parse or verification failure collapses
    /// into [`Error::InvalidSignature`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            IdentityKey::Ed25519 { public_key } => {
                let bytes: [u8; 32] = public_key
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidSignature)?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map_err(|_| Error::InvalidSignature)?;
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| Error::InvalidSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
            IdentityKey::EcdsaP256 { public_key } => {
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                    .map_err(|_| Error::InvalidSignature)?;
                let signature = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| Error::InvalidSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Signer as _;
    use rand_core::OsRng;

    #[test]
    fn ed25519_verify_accepts_and_rejects() -> Result<()> {
        let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let identity = IdentityKey::Ed25519 {
            public_key: signing.verifying_key().to_bytes().to_vec(),
        };
        let signature = signing.sign(b"a message").to_bytes().to_vec();
        identity.verify(b"a message", &signature)?;
        assert!(matches!(
            identity.verify(b"another message", &signature),
            Err(Error::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn p256_verify_accepts_and_rejects() -> Result<()> {
        let signing = p256::ecdsa::SigningKey::random(&mut OsRng);
        let identity = IdentityKey::EcdsaP256 {
            public_key: signing
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        };
        let signature: p256::ecdsa::Signature = signing.sign(b"a message");
        let signature = signature.to_bytes().to_vec();
        identity.verify(b"a message", &signature)?;
        assert!(identity.verify(b"another message", &signature).is_err());
        Ok(())
    }

    #[test]
    fn schemes_do_not_cross_verify() {
        let ed = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let identity = IdentityKey::Ed25519 {
            public_key: ed.verifying_key().to_bytes().to_vec(),
        };
        let p256_key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let signature: p256::ecdsa::Signature = p256_key.sign(b"a message");
        assert!(
            identity
                .verify(b"a message", &signature.to_bytes().to_vec())
                .is_err()
        );
    }

    #[test]
    fn fingerprints_separate_keys_and_schemes() {
        let a = IdentityKey::Ed25519 {
            public_key: vec![1u8; 32],
        };
        let b = IdentityKey::Ed25519 {
            public_key: vec![2u8; 32],
        };
        let c = IdentityKey::EcdsaP256 {
            public_key: vec![1u8; 32],
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
