//! Ephemeral key agreement.
//!
//! One fresh pair per protocol instance; the private scalar never leaves the
//! instance except inside a snapshot record. Peer public keys are validated
//! eagerly when the hello is received, so the later agreement step can only
//! fail on a degenerate shared secret.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::suite::KeyAgreementGroup;

const X25519_PUBLIC_KEY_LEN: usize = 32;

enum PrivateKey {
    X25519(x25519_dalek::StaticSecret),
    P256(p256::SecretKey),
}

/// An ephemeral key-agreement pair bound to the suite's group.
pub(crate) struct EphemeralKeyPair {
    private: PrivateKey,
    public: Vec<u8>,
}

impl EphemeralKeyPair {
    /// Generates a fresh pair for `group`.
    pub fn generate(group: KeyAgreementGroup) -> Self {
        match group {
            KeyAgreementGroup::X25519 => {
                let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec();
                Self {
                    private: PrivateKey::X25519(secret),
                    public,
                }
            }
            KeyAgreementGroup::P256 => {
                let secret = p256::SecretKey::random(&mut OsRng);
                let public = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Self {
                    private: PrivateKey::P256(secret),
                    public,
                }
            }
        }
    }

    /// The encoding sent in the hello: raw 32 bytes for X25519, uncompressed
    /// SEC1 for P-256.
    pub fn public_bytes(&self) -> &[u8] {
        &self.public
    }

    /// Checks that `bytes` is a well-formed public key for `group`.
    pub fn validate_public_bytes(group: KeyAgreementGroup, bytes: &[u8]) -> Result<()> {
        match group {
            KeyAgreementGroup::X25519 => {
                if bytes.len() != X25519_PUBLIC_KEY_LEN {
                    return Err(Error::MalformedHandshakeMessage(
                        "ephemeral public key length",
                    ));
                }
            }
            KeyAgreementGroup::P256 => {
                p256::PublicKey::from_sec1_bytes(bytes).map_err(|_| {
                    Error::MalformedHandshakeMessage("ephemeral public key encoding")
                })?;
            }
        }
        Ok(())
    }

    /// Runs the agreement against a peer public key.
    ///
    /// An x25519 result is rejected when the peer key was of low order and
    /// contributed nothing to the shared secret.
    pub fn agree(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match &self.private {
            PrivateKey::X25519(secret) => {
                let bytes: [u8; 32] = peer_public.try_into().map_err(|_| {
                    Error::MalformedHandshakeMessage("ephemeral public key length")
                })?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(bytes));
                if !shared.was_contributory() {
                    return Err(Error::SharedSecretNotContributory);
                }
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            PrivateKey::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|_| {
                    Error::MalformedHandshakeMessage("ephemeral public key encoding")
                })?;
                let shared =
                    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    }

    /// The private scalar, for snapshot records.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        match &self.private {
            PrivateKey::X25519(secret) => Zeroizing::new(secret.to_bytes()),
            PrivateKey::P256(secret) => Zeroizing::new(secret.to_bytes().into()),
        }
    }

    /// Rebuilds a pair from a snapshot record.
    pub fn from_private_bytes(group: KeyAgreementGroup, bytes: &[u8; 32]) -> Result<Self> {
        match group {
            KeyAgreementGroup::X25519 => {
                let secret = x25519_dalek::StaticSecret::from(*bytes);
                let public = x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec();
                Ok(Self {
                    private: PrivateKey::X25519(secret),
                    public,
                })
            }
            KeyAgreementGroup::P256 => {
                let secret = p256::SecretKey::from_slice(bytes)
                    .map_err(|_| Error::MalformedSnapshot("ephemeral private scalar"))?;
                let public = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Ok(Self {
                    private: PrivateKey::P256(secret),
                    public,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_agreement_is_symmetric() -> Result<()> {
        let a = EphemeralKeyPair::generate(KeyAgreementGroup::X25519);
        let b = EphemeralKeyPair::generate(KeyAgreementGroup::X25519);
        assert_eq!(*a.agree(b.public_bytes())?, *b.agree(a.public_bytes())?);
        Ok(())
    }

    #[test]
    fn p256_agreement_is_symmetric() -> Result<()> {
        let a = EphemeralKeyPair::generate(KeyAgreementGroup::P256);
        let b = EphemeralKeyPair::generate(KeyAgreementGroup::P256);
        assert_eq!(*a.agree(b.public_bytes())?, *b.agree(a.public_bytes())?);
        Ok(())
    }

    #[test]
    fn x25519_rejects_low_order_peer_key() {
        let a = EphemeralKeyPair::generate(KeyAgreementGroup::X25519);
        let result = a.agree(&[0u8; 32]);
        assert!(matches!(result, Err(Error::SharedSecretNotContributory)));
    }

    #[test]
    fn p256_rejects_garbage_peer_key() {
        let a = EphemeralKeyPair::generate(KeyAgreementGroup::P256);
        assert!(a.agree(&[0xffu8; 65]).is_err());
    }

    #[test]
    fn validation_rejects_bad_encodings() {
        assert!(
            EphemeralKeyPair::validate_public_bytes(KeyAgreementGroup::X25519, &[0u8; 31]).is_err()
        );
        assert!(
            EphemeralKeyPair::validate_public_bytes(KeyAgreementGroup::P256, &[0u8; 65]).is_err()
        );
        let p256 = EphemeralKeyPair::generate(KeyAgreementGroup::P256);
        assert!(
            EphemeralKeyPair::validate_public_bytes(KeyAgreementGroup::P256, p256.public_bytes())
                .is_ok()
        );
    }

    #[test]
    fn private_bytes_round_trip() -> Result<()> {
        for group in [KeyAgreementGroup::X25519, KeyAgreementGroup::P256] {
            let pair = EphemeralKeyPair::generate(group);
            let restored = EphemeralKeyPair::from_private_bytes(group, &pair.private_bytes())?;
            assert_eq!(pair.public_bytes(), restored.public_bytes());
        }
        Ok(())
    }
}
