//! Named cryptographic parameters for a protocol instance.
//!
//! Every algorithm the handshake and the derived sessions use is an explicit,
//! named parameter supplied at construction time, so algorithms can be swapped
//! without touching the protocol itself. Both parties must be configured with
//! the same suite; nothing about it is negotiated on the wire.

use serde::{Deserialize, Serialize};

/// Protection level negotiated for an established session.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum ProtocolMode {
    /// Integrity only: application payloads travel in the clear with a MAC.
    AuthenticationOnly,
    /// Confidentiality and integrity via AEAD.
    AuthenticatedEncryption,
}

/// Elliptic-curve group used for the per-session ephemeral key agreement.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum KeyAgreementGroup {
    X25519,
    P256,
}

/// Signature scheme of the long-term identity keys.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum SignatureScheme {
    Ed25519,
    /// ECDSA over P-256 with SHA-256, fixed-size `r || s` signatures.
    EcdsaP256Sha256,
}

/// AEAD algorithm protecting handshake payloads and encrypted sessions.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum AeadAlgorithm {
    ChaCha20Poly1305,
    Aes256Gcm,
}

/// MAC algorithm for authentication-only sessions.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum MacAlgorithm {
    HmacSha256,
}

/// The complete set of named algorithms for one protocol instance.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct ProtocolSuite {
    pub key_agreement: KeyAgreementGroup,
    pub signature: SignatureScheme,
    pub aead: AeadAlgorithm,
    pub mac: MacAlgorithm,
}

impl Default for ProtocolSuite {
    fn default() -> Self {
        Self {
            key_agreement: KeyAgreementGroup::X25519,
            signature: SignatureScheme::Ed25519,
            aead: AeadAlgorithm::ChaCha20Poly1305,
            mac: MacAlgorithm::HmacSha256,
        }
    }
}

impl ProtocolSuite {
    /// Starts building a new ProtocolSuite.
    pub fn builder() -> ProtocolSuiteBuilder {
        ProtocolSuiteBuilder::new()
    }
}

/// A builder for [`ProtocolSuite`].
///
/// Every field carries a default, so only the algorithms that differ from the
/// default suite need to be named.
#[derive(Default)]
pub struct ProtocolSuiteBuilder {
    suite: ProtocolSuite,
}

impl ProtocolSuiteBuilder {
    pub fn new() -> Self {
        Self {
            suite: ProtocolSuite::default(),
        }
    }

    /// Sets the key agreement group for the ephemeral exchange.
    pub fn with_key_agreement(mut self, group: KeyAgreementGroup) -> Self {
        self.suite.key_agreement = group;
        self
    }

    /// Sets the signature scheme the identity keys use.
    pub fn with_signature(mut self, scheme: SignatureScheme) -> Self {
        self.suite.signature = scheme;
        self
    }

    /// Sets the AEAD algorithm for handshake payloads and encrypted sessions.
    pub fn with_aead(mut self, aead: AeadAlgorithm) -> Self {
        self.suite.aead = aead;
        self
    }

    /// Sets the MAC algorithm for authentication-only sessions.
    pub fn with_mac(mut self, mac: MacAlgorithm) -> Self {
        self.suite.mac = mac;
        self
    }

    pub fn build(self) -> ProtocolSuite {
        self.suite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default_suite() {
        assert_eq!(ProtocolSuite::builder().build(), ProtocolSuite::default());
    }

    #[test]
    fn builder_overrides_stick() {
        let suite = ProtocolSuite::builder()
            .with_key_agreement(KeyAgreementGroup::P256)
            .with_signature(SignatureScheme::EcdsaP256Sha256)
            .with_aead(AeadAlgorithm::Aes256Gcm)
            .build();
        assert_eq!(suite.key_agreement, KeyAgreementGroup::P256);
        assert_eq!(suite.signature, SignatureScheme::EcdsaP256Sha256);
        assert_eq!(suite.aead, AeadAlgorithm::Aes256Gcm);
        assert_eq!(suite.mac, MacAlgorithm::HmacSha256);
    }
}
