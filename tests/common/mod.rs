//! Shared helpers for the integration tests.
#![allow(dead_code)]

use ed25519_dalek::Signer as _;
use rand_core::OsRng;

use link_session::handshake::{
    AuthenticationProtocolInitiator, AuthenticationProtocolResponder,
};
use link_session::{
    AuthenticatedEncryptionSession, AuthenticatedSession, CertificateCheckMode, IdentityKey,
    ProtocolMode, Result, Session, SignatureResult,
};

/// A handshake participant: an Ed25519 identity key pair plus the signing
/// callback the protocol expects.
pub struct Party {
    signing: ed25519_dalek::SigningKey,
    pub identity: IdentityKey,
}

impl Party {
    pub fn generate() -> Party {
        let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let identity = IdentityKey::Ed25519 {
            public_key: signing.verifying_key().to_bytes().to_vec(),
        };
        Party { signing, identity }
    }

    pub fn sign(&self) -> impl FnOnce(&[u8]) -> SignatureResult + '_ {
        |input| Ok(self.signing.sign(input).to_bytes().to_vec())
    }
}

pub fn new_initiator(session_id: &str, modes: &[ProtocolMode]) -> AuthenticationProtocolInitiator {
    AuthenticationProtocolInitiator::builder()
        .session_id(session_id)
        .supported_modes(modes)
        .max_message_size(1 << 20)
        .group_id("consensus-group-7")
        .build()
        .unwrap()
}

pub fn new_responder(session_id: &str) -> AuthenticationProtocolResponder {
    AuthenticationProtocolResponder::builder()
        .session_id(session_id)
        .max_message_size(1 << 16)
        .build()
        .unwrap()
}

/// Drives both parties through a complete handshake without certificates.
pub fn run_handshake(
    initiator: &mut AuthenticationProtocolInitiator,
    responder: &mut AuthenticationProtocolResponder,
    initiator_party: &Party,
    responder_party: &Party,
    responder_supported: &[ProtocolMode],
) -> Result<()> {
    let initiator_hello = initiator.generate_initiator_hello()?;
    responder.receive_initiator_hello(&initiator_hello)?;
    let responder_hello = responder.generate_responder_hello()?;
    initiator.receive_responder_hello(&responder_hello)?;

    initiator.generate_handshake_secrets()?;
    responder.generate_handshake_secrets()?;

    let initiator_handshake = initiator.generate_our_handshake_message(
        &initiator_party.identity,
        None,
        initiator_party.sign(),
    )?;
    responder
        .validate_peer_handshake_message(&initiator_handshake, &[initiator_party.identity.clone()])?;
    responder.validate_encrypted_extensions(
        &CertificateCheckMode::NoCertificate,
        responder_supported,
        None,
    )?;
    let responder_handshake = responder.generate_our_handshake_message(
        &responder_party.identity,
        None,
        responder_party.sign(),
    )?;
    initiator.validate_peer_handshake_message(
        &responder_handshake,
        None,
        &[responder_party.identity.clone()],
    )?;
    Ok(())
}

pub fn as_authentication(session: Session) -> AuthenticatedSession {
    match session {
        Session::Authentication(inner) => inner,
        Session::AuthenticatedEncryption(_) => panic!("expected an authentication-only session"),
    }
}

pub fn as_encryption(session: Session) -> AuthenticatedEncryptionSession {
    match session {
        Session::AuthenticatedEncryption(inner) => inner,
        Session::Authentication(_) => panic!("expected an authenticated encryption session"),
    }
}
