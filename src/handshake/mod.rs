//! The two handshake state machines.
//!
//! Both roles advance through a fixed forward-only sequence of steps; calling
//! a method out of order is a caller defect and fails with a state error
//! without touching the instance. Every mutating method computes its full
//! result first and commits fields only once nothing more can fail, so a
//! failed call leaves the machine exactly as it was.
//!
//! The flow mirrors a trimmed TLS 1.3 exchange: hellos carry fresh ephemeral
//! keys, a running transcript binds every later signature to the exact bytes
//! exchanged, handshake payloads travel sealed under keys derived from the
//! ephemeral ECDH secret, and the final session keys additionally absorb the
//! complete transcript.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::PROTOCOL_VERSION;
use crate::suite::ProtocolMode;

mod initiator;
mod responder;

pub use initiator::{AuthenticationProtocolInitiator, AuthenticationProtocolInitiatorBuilder};
pub use responder::{AuthenticationProtocolResponder, AuthenticationProtocolResponderBuilder};

/// Smallest max-message-size a party may declare. Anything lower could not
/// even carry a handshake message.
pub const MIN_MAX_MESSAGE_SIZE: u32 = 512;

/// What a signing callback returns. The callback is backed by the node's key
/// management service; the protocol never holds the long-term private key.
pub type SignatureResult = std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;

/// Where an initiator currently stands. Strictly forward, no step repeats.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum InitiatorStep {
    Init,
    SentHello,
    ReceivedPeerHello,
    SecretsGenerated,
    SentHandshake,
    PeerHandshakeValidated,
}

impl fmt::Display for InitiatorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitiatorStep::Init => "INIT",
            InitiatorStep::SentHello => "SENT_HELLO",
            InitiatorStep::ReceivedPeerHello => "RECEIVED_PEER_HELLO",
            InitiatorStep::SecretsGenerated => "SECRETS_GENERATED",
            InitiatorStep::SentHandshake => "SENT_HANDSHAKE",
            InitiatorStep::PeerHandshakeValidated => "PEER_HANDSHAKE_VALIDATED",
        })
    }
}

/// Where a responder currently stands.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum ResponderStep {
    Init,
    ReceivedHello,
    SentHello,
    SecretsGenerated,
    PeerHandshakeValidated,
    SentHandshake,
}

impl fmt::Display for ResponderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponderStep::Init => "INIT",
            ResponderStep::ReceivedHello => "RECEIVED_HELLO",
            ResponderStep::SentHello => "SENT_HELLO",
            ResponderStep::SecretsGenerated => "SECRETS_GENERATED",
            ResponderStep::PeerHandshakeValidated => "PEER_HANDSHAKE_VALIDATED",
            ResponderStep::SentHandshake => "SENT_HANDSHAKE",
        })
    }
}

pub(crate) const INITIATOR_SIGNATURE_LABEL: &[u8] = b"link-session initiator handshake signature";
pub(crate) const RESPONDER_SIGNATURE_LABEL: &[u8] = b"link-session responder handshake signature";

/// The bytes a party signs: a role label, the transcript hash at the point of
/// signing, and a digest of the handshake content carried alongside the
/// signature. The label keeps the two directions from ever signing the same
/// bytes; the transcript hash pins the signature to this exact exchange.
pub(crate) fn signature_input(
    label: &[u8],
    transcript_hash: &[u8; 32],
    encoded_content: &[u8],
) -> Vec<u8> {
    let content_digest: [u8; 32] = Sha256::digest(encoded_content).into();
    let mut input = Vec::with_capacity(label.len() + 64);
    input.extend_from_slice(label);
    input.extend_from_slice(transcript_hash);
    input.extend_from_slice(&content_digest);
    input
}

pub(crate) fn check_protocol_version(version: u16) -> Result<()> {
    if version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedProtocolVersion { version });
    }
    Ok(())
}

pub(crate) fn check_session_id(expected: &str, actual: &str) -> Result<()> {
    if expected != actual {
        return Err(Error::SessionIdMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn check_declared_max_size(size: u32) -> Result<()> {
    if size < MIN_MAX_MESSAGE_SIZE {
        return Err(Error::MalformedHandshakeMessage(
            "declared max message size below the protocol minimum",
        ));
    }
    Ok(())
}

/// The confirmed mode is the first of the initiator's offered modes that the
/// responder also supports; the initiator's preference order wins.
pub(crate) fn negotiate_mode(
    offered: &[ProtocolMode],
    supported: &[ProtocolMode],
) -> Result<ProtocolMode> {
    offered
        .iter()
        .copied()
        .find(|mode| supported.contains(mode))
        .ok_or_else(|| Error::ModeNegotiationFailure {
            offered: offered.to_vec(),
            supported: supported.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_follows_the_offer_order() {
        let offered = [
            ProtocolMode::AuthenticatedEncryption,
            ProtocolMode::AuthenticationOnly,
        ];
        let supported = [
            ProtocolMode::AuthenticationOnly,
            ProtocolMode::AuthenticatedEncryption,
        ];
        assert_eq!(
            negotiate_mode(&offered, &supported).unwrap(),
            ProtocolMode::AuthenticatedEncryption
        );
    }

    #[test]
    fn negotiation_fails_on_an_empty_intersection() {
        let offered = [ProtocolMode::AuthenticationOnly];
        let supported = [ProtocolMode::AuthenticatedEncryption];
        assert!(matches!(
            negotiate_mode(&offered, &supported),
            Err(Error::ModeNegotiationFailure { .. })
        ));
    }

    #[test]
    fn signature_inputs_differ_by_role() {
        let hash = [7u8; 32];
        let initiator = signature_input(INITIATOR_SIGNATURE_LABEL, &hash, b"content");
        let responder = signature_input(RESPONDER_SIGNATURE_LABEL, &hash, b"content");
        assert_ne!(initiator, responder);
    }
}
