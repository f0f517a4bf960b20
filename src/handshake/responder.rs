//! The responding side of the authentication protocol.

use log::debug;

use crate::cert::{CertificateCheckMode, CertificateError, CertificateValidator, X500Name};
use crate::crypto::agreement::EphemeralKeyPair;
use crate::crypto::cipher;
use crate::crypto::kdf::{self, HandshakeKeys, Secret32, SessionKeys};
use crate::crypto::signing::IdentityKey;
use crate::error::{Error, Result};
use crate::protocol::message::{
    self, InitiatorHandshake, InitiatorHandshakePayload, InitiatorHello, ResponderHandshake,
    ResponderHandshakeContent, ResponderHandshakePayload, ResponderHello,
};
use crate::protocol::snapshot::{
    self, EphemeralKeyRecord, ResponderSnapshot, SnapshotRecord, SNAPSHOT_VERSION,
};
use crate::protocol::transcript::Transcript;
use crate::protocol::PROTOCOL_VERSION;
use crate::session::Session;
use crate::suite::{ProtocolMode, ProtocolSuite};

use super::{
    check_declared_max_size, check_protocol_version, check_session_id, negotiate_mode,
    signature_input, ResponderStep, SignatureResult, INITIATOR_SIGNATURE_LABEL,
    MIN_MAX_MESSAGE_SIZE, RESPONDER_SIGNATURE_LABEL,
};

/// Drives the responding party through the handshake.
///
/// The mirror image of the initiator, with one extra step: after the peer's
/// handshake message has been validated cryptographically, the decrypted
/// extensions still have to be checked against local policy (certificate
/// rules and mode negotiation) via
/// [`AuthenticationProtocolResponder::validate_encrypted_extensions`] before
/// this party's own handshake message can go out.
pub struct AuthenticationProtocolResponder {
    step: ResponderStep,
    session_id: String,
    our_max_message_size: u32,
    suite: ProtocolSuite,
    transcript: Transcript,
    our_ephemeral: Option<EphemeralKeyPair>,
    peer_ephemeral_public: Option<Vec<u8>>,
    initiator_modes: Option<Vec<ProtocolMode>>,
    initiator_group_id: Option<String>,
    negotiated_max_message_size: Option<u32>,
    handshake_keys: Option<HandshakeKeys>,
    initiator_identity: Option<IdentityKey>,
    initiator_certificate_chain: Option<Vec<String>>,
    confirmed_mode: Option<ProtocolMode>,
    session_keys: Option<SessionKeys>,
}

/// Builder for [`AuthenticationProtocolResponder`].
#[derive(Default)]
pub struct AuthenticationProtocolResponderBuilder {
    session_id: Option<String>,
    max_message_size: Option<u32>,
    suite: Option<ProtocolSuite>,
}

impl AuthenticationProtocolResponderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session id the transport routed to this instance; the initiator's
    /// hello must carry the same one.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Overrides the default algorithm suite.
    pub fn suite(mut self, suite: ProtocolSuite) -> Self {
        self.suite = Some(suite);
        self
    }

    pub fn build(self) -> Result<AuthenticationProtocolResponder> {
        let session_id = self
            .session_id
            .ok_or(Error::BuilderMissingField("session_id"))?;
        let max_message_size = self
            .max_message_size
            .ok_or(Error::BuilderMissingField("max_message_size"))?;
        if max_message_size < MIN_MAX_MESSAGE_SIZE {
            return Err(Error::InvalidConfiguration(
                "max_message_size below the protocol minimum",
            ));
        }
        Ok(AuthenticationProtocolResponder {
            step: ResponderStep::Init,
            session_id,
            our_max_message_size: max_message_size,
            suite: self.suite.unwrap_or_default(),
            transcript: Transcript::new(),
            our_ephemeral: None,
            peer_ephemeral_public: None,
            initiator_modes: None,
            initiator_group_id: None,
            negotiated_max_message_size: None,
            handshake_keys: None,
            initiator_identity: None,
            initiator_certificate_chain: None,
            confirmed_mode: None,
            session_keys: None,
        })
    }
}

impl AuthenticationProtocolResponder {
    pub fn builder() -> AuthenticationProtocolResponderBuilder {
        AuthenticationProtocolResponderBuilder::new()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn step(&self) -> ResponderStep {
        self.step
    }

    /// The group id the initiator's hello declared, once received.
    pub fn initiator_group_id(&self) -> Option<&str> {
        self.initiator_group_id.as_deref()
    }

    fn require_step(&self, expected: ResponderStep, method: &'static str) -> Result<()> {
        if self.step != expected {
            return Err(Error::InvalidResponderState {
                method,
                state: self.step,
            });
        }
        Ok(())
    }

    /// Takes in the initiator's hello: checks version and session id, vets
    /// the ephemeral key, and records the offered modes, group id and size
    /// declaration.
    pub fn receive_initiator_hello(&mut self, hello: &InitiatorHello) -> Result<()> {
        self.require_step(ResponderStep::Init, "receive_initiator_hello")?;
        check_protocol_version(hello.version)?;
        check_session_id(&self.session_id, &hello.session_id)?;
        if hello.supported_modes.is_empty() {
            return Err(Error::MalformedHandshakeMessage("no offered modes"));
        }
        check_declared_max_size(hello.max_message_size)?;
        EphemeralKeyPair::validate_public_bytes(
            self.suite.key_agreement,
            &hello.ephemeral_public_key,
        )?;
        let mut transcript = self.transcript.clone();
        transcript.append_record(hello)?;

        self.transcript = transcript;
        self.peer_ephemeral_public = Some(hello.ephemeral_public_key.clone());
        self.initiator_modes = Some(hello.supported_modes.clone());
        self.initiator_group_id = Some(hello.group_id.clone());
        self.negotiated_max_message_size =
            Some(self.our_max_message_size.min(hello.max_message_size));
        self.step = ResponderStep::ReceivedHello;
        Ok(())
    }

    /// Generates a fresh ephemeral key pair and emits this party's hello.
    pub fn generate_responder_hello(&mut self) -> Result<ResponderHello> {
        self.require_step(ResponderStep::ReceivedHello, "generate_responder_hello")?;
        let ephemeral = EphemeralKeyPair::generate(self.suite.key_agreement);
        let hello = ResponderHello {
            version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            ephemeral_public_key: ephemeral.public_bytes().to_vec(),
            max_message_size: self.our_max_message_size,
        };
        let mut transcript = self.transcript.clone();
        transcript.append_record(&hello)?;

        self.transcript = transcript;
        self.our_ephemeral = Some(ephemeral);
        self.step = ResponderStep::SentHello;
        Ok(hello)
    }

    /// Runs the ephemeral key agreement and derives the handshake keys,
    /// identically to the initiator.
    pub fn generate_handshake_secrets(&mut self) -> Result<()> {
        self.require_step(ResponderStep::SentHello, "generate_handshake_secrets")?;
        let ephemeral = self
            .our_ephemeral
            .as_ref()
            .ok_or(Error::ComponentMissing("ephemeral key pair"))?;
        let peer_public = self
            .peer_ephemeral_public
            .as_deref()
            .ok_or(Error::ComponentMissing("peer ephemeral public key"))?;
        let shared_secret = ephemeral.agree(peer_public)?;
        let keys = kdf::derive_handshake_keys(&shared_secret, &self.transcript.current_hash())?;

        self.handshake_keys = Some(keys);
        // The ephemeral private key is not needed beyond this point.
        self.our_ephemeral = None;
        self.step = ResponderStep::SecretsGenerated;
        Ok(())
    }

    /// Validates the initiator's handshake message cryptographically: opens
    /// it under the handshake keys, verifies the embedded signature against
    /// the trusted identity keys, and cross-checks the echoed mode offer
    /// against the hello. Policy checks on the decrypted extensions follow in
    /// [`AuthenticationProtocolResponder::validate_encrypted_extensions`].
    pub fn validate_peer_handshake_message(
        &mut self,
        handshake: &InitiatorHandshake,
        trusted_identity_keys: &[IdentityKey],
    ) -> Result<()> {
        self.require_step(ResponderStep::SecretsGenerated, "validate_peer_handshake_message")?;
        check_protocol_version(handshake.version)?;
        check_session_id(&self.session_id, &handshake.session_id)?;
        let keys = self
            .handshake_keys
            .as_ref()
            .ok_or(Error::ComponentMissing("handshake keys"))?;
        let offered = self
            .initiator_modes
            .as_deref()
            .ok_or(Error::ComponentMissing("initiator modes"))?;

        let transcript_hash = self.transcript.current_hash();
        let opened = cipher::open(
            self.suite.aead,
            &keys.initiator_to_responder,
            0,
            &transcript_hash,
            &handshake.encrypted_payload,
        )
        .map_err(|_| Error::InvalidHandshakeMessage)?;
        let payload: InitiatorHandshakePayload = message::decode(&opened)?;

        // The sealed offer must be the one the cleartext hello carried.
        if payload.content.offered_modes.as_slice() != offered {
            return Err(Error::MalformedHandshakeMessage(
                "offered modes differ from the hello",
            ));
        }

        let identity = &payload.content.identity_key;
        if identity.scheme() != self.suite.signature {
            return Err(Error::MalformedHandshakeMessage(
                "identity key scheme does not match the suite",
            ));
        }
        if !trusted_identity_keys.contains(identity) {
            return Err(Error::InvalidSignature);
        }
        let input = signature_input(
            INITIATOR_SIGNATURE_LABEL,
            &transcript_hash,
            &message::encode(&payload.content)?,
        );
        identity.verify(&input, &payload.signature)?;
        let peer_fingerprint = identity.fingerprint();

        let mut transcript = self.transcript.clone();
        transcript.append_record(handshake)?;

        self.transcript = transcript;
        self.initiator_identity = Some(payload.content.identity_key);
        self.initiator_certificate_chain = payload.content.certificate_chain;
        self.step = ResponderStep::PeerHandshakeValidated;
        debug!(
            "responder session `{}`: initiator identity {} verified",
            self.session_id,
            hex::encode(peer_fingerprint)
        );
        Ok(())
    }

    /// Applies local policy to the decrypted extensions: certificate
    /// validation under `certificate_check_mode`, and mode negotiation
    /// between the initiator's offer and `supported_modes`. A distinct step
    /// because the extensions are only readable once secrets exist, yet what
    /// they claim still has to be acceptable to this node.
    pub fn validate_encrypted_extensions(
        &mut self,
        certificate_check_mode: &CertificateCheckMode,
        supported_modes: &[ProtocolMode],
        expected_peer_name: Option<&X500Name>,
    ) -> Result<()> {
        if self.step != ResponderStep::PeerHandshakeValidated || self.confirmed_mode.is_some() {
            return Err(Error::InvalidResponderState {
                method: "validate_encrypted_extensions",
                state: self.step,
            });
        }
        if supported_modes.is_empty() {
            return Err(Error::EmptyModeSet);
        }
        let offered = self
            .initiator_modes
            .as_deref()
            .ok_or(Error::ComponentMissing("initiator modes"))?;
        let confirmed = negotiate_mode(offered, supported_modes)?;

        if let Some(validator) = CertificateValidator::from_check_mode(certificate_check_mode)? {
            let expected = expected_peer_name.ok_or(Error::MissingExpectedPeerName)?;
            let identity = self
                .initiator_identity
                .as_ref()
                .ok_or(Error::ComponentMissing("initiator identity key"))?;
            let chain = self.initiator_certificate_chain.as_deref().ok_or_else(|| {
                Error::InvalidPeerCertificate {
                    identity: expected.to_string(),
                    reason: CertificateError::EmptyChain,
                }
            })?;
            validator.validate(chain, expected, identity)?;
        }

        self.confirmed_mode = Some(confirmed);
        Ok(())
    }

    /// Produces this party's handshake message, embedding the confirmed mode
    /// so the initiator can cross-check it, and derives the session keys over
    /// the complete transcript.
    pub fn generate_our_handshake_message(
        &mut self,
        identity_key: &IdentityKey,
        certificate_chain: Option<Vec<String>>,
        sign: impl FnOnce(&[u8]) -> SignatureResult,
    ) -> Result<ResponderHandshake> {
        self.require_step(ResponderStep::PeerHandshakeValidated, "generate_our_handshake_message")?;
        let confirmed = self.confirmed_mode.ok_or(Error::InvalidResponderState {
            method: "generate_our_handshake_message",
            state: self.step,
        })?;
        if identity_key.scheme() != self.suite.signature {
            return Err(Error::InvalidConfiguration(
                "identity key scheme does not match the suite",
            ));
        }
        let keys = self
            .handshake_keys
            .as_ref()
            .ok_or(Error::ComponentMissing("handshake keys"))?;

        let content = ResponderHandshakeContent {
            identity_key: identity_key.clone(),
            confirmed_mode: confirmed,
            certificate_chain,
        };
        let encoded_content = message::encode(&content)?;
        let transcript_hash = self.transcript.current_hash();
        let input = signature_input(RESPONDER_SIGNATURE_LABEL, &transcript_hash, &encoded_content);
        let signature = sign(&input).map_err(|e| Error::Signing(e.to_string()))?;

        let payload = ResponderHandshakePayload { content, signature };
        let sealed = cipher::seal(
            self.suite.aead,
            &keys.responder_to_initiator,
            0,
            &transcript_hash,
            &message::encode(&payload)?,
        )?;
        let handshake = ResponderHandshake {
            version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            encrypted_payload: sealed,
        };
        let mut transcript = self.transcript.clone();
        transcript.append_record(&handshake)?;
        let session_keys =
            kdf::derive_session_keys(&keys.master, &transcript.current_hash(), confirmed, false)?;

        self.transcript = transcript;
        self.session_keys = Some(session_keys);
        self.handshake_keys = None;
        self.step = ResponderStep::SentHandshake;
        debug!(
            "responder session `{}`: handshake complete, mode {confirmed:?}",
            self.session_id
        );
        Ok(handshake)
    }

    /// Hands out the established session; a second call fails with
    /// [`Error::SessionAlreadyTaken`].
    pub fn get_session(&mut self) -> Result<Session> {
        self.require_step(ResponderStep::SentHandshake, "get_session")?;
        let mode = self
            .confirmed_mode
            .ok_or(Error::ComponentMissing("confirmed mode"))?;
        let max_message_size = self
            .negotiated_max_message_size
            .ok_or(Error::ComponentMissing("negotiated max message size"))?;
        let keys = self.session_keys.take().ok_or(Error::SessionAlreadyTaken)?;
        Ok(Session::new(
            self.session_id.clone(),
            max_message_size,
            mode,
            &self.suite,
            keys,
        ))
    }

    /// Captures the instance as a versioned record.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let record = ResponderSnapshot {
            version: SNAPSHOT_VERSION,
            step: self.step,
            session_id: self.session_id.clone(),
            our_max_message_size: self.our_max_message_size,
            suite: self.suite,
            transcript: self.transcript.clone(),
            our_ephemeral: self.our_ephemeral.as_ref().map(|pair| EphemeralKeyRecord {
                private: Secret32::from(*pair.private_bytes()),
                public: pair.public_bytes().to_vec(),
            }),
            peer_ephemeral_public: self.peer_ephemeral_public.clone(),
            initiator_modes: self.initiator_modes.clone(),
            initiator_group_id: self.initiator_group_id.clone(),
            negotiated_max_message_size: self.negotiated_max_message_size,
            handshake_keys: self.handshake_keys.clone(),
            initiator_identity: self.initiator_identity.clone(),
            initiator_certificate_chain: self.initiator_certificate_chain.clone(),
            confirmed_mode: self.confirmed_mode,
            session_keys: self.session_keys.clone(),
        };
        snapshot::encode(&SnapshotRecord::Responder(record))
    }

    /// Reconstructs a responder from
    /// [`AuthenticationProtocolResponder::snapshot`] bytes.
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let SnapshotRecord::Responder(record) = snapshot::decode(bytes)? else {
            return Err(Error::MalformedSnapshot("not a responder record"));
        };
        snapshot::check_version(record.version)?;
        if !record_is_consistent(&record) {
            return Err(Error::MalformedSnapshot(
                "populated fields do not match the recorded step",
            ));
        }
        let our_ephemeral = match &record.our_ephemeral {
            Some(stored) => {
                let pair = EphemeralKeyPair::from_private_bytes(
                    record.suite.key_agreement,
                    stored.private.as_bytes(),
                )?;
                if pair.public_bytes() != stored.public.as_slice() {
                    return Err(Error::MalformedSnapshot(
                        "ephemeral public key does not match the private key",
                    ));
                }
                Some(pair)
            }
            None => None,
        };
        Ok(AuthenticationProtocolResponder {
            step: record.step,
            session_id: record.session_id,
            our_max_message_size: record.our_max_message_size,
            suite: record.suite,
            transcript: record.transcript,
            our_ephemeral,
            peer_ephemeral_public: record.peer_ephemeral_public,
            initiator_modes: record.initiator_modes,
            initiator_group_id: record.initiator_group_id,
            negotiated_max_message_size: record.negotiated_max_message_size,
            handshake_keys: record.handshake_keys,
            initiator_identity: record.initiator_identity,
            initiator_certificate_chain: record.initiator_certificate_chain,
            confirmed_mode: record.confirmed_mode,
            session_keys: record.session_keys,
        })
    }
}

fn record_is_consistent(record: &ResponderSnapshot) -> bool {
    use ResponderStep::*;
    let ephemeral = record.our_ephemeral.is_some();
    let peer = record.peer_ephemeral_public.is_some();
    let hello_state = record.initiator_modes.is_some()
        && record.initiator_group_id.is_some()
        && record.negotiated_max_message_size.is_some();
    let handshake_keys = record.handshake_keys.is_some();
    let identity = record.initiator_identity.is_some();
    let confirmed = record.confirmed_mode.is_some();
    let session_keys = record.session_keys.is_some();
    match record.step {
        Init => {
            !ephemeral
                && !peer
                && !hello_state
                && !handshake_keys
                && !identity
                && !confirmed
                && !session_keys
        }
        ReceivedHello => {
            !ephemeral
                && peer
                && hello_state
                && !handshake_keys
                && !identity
                && !confirmed
                && !session_keys
        }
        SentHello => {
            ephemeral
                && peer
                && hello_state
                && !handshake_keys
                && !identity
                && !confirmed
                && !session_keys
        }
        SecretsGenerated => {
            !ephemeral
                && peer
                && hello_state
                && handshake_keys
                && !identity
                && !confirmed
                && !session_keys
        }
        // The extensions may or may not have been validated yet, so the
        // confirmed mode can be either.
        PeerHandshakeValidated => {
            !ephemeral && peer && hello_state && handshake_keys && identity && !session_keys
        }
        // Session keys may or may not have been handed out already.
        SentHandshake => {
            !ephemeral && peer && hello_state && !handshake_keys && identity && confirmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::AuthenticationProtocolInitiator;

    fn initiator_hello() -> InitiatorHello {
        let mut initiator = AuthenticationProtocolInitiator::builder()
            .session_id("session-1")
            .supported_modes(&[ProtocolMode::AuthenticatedEncryption])
            .max_message_size(1 << 20)
            .group_id("group-1")
            .build()
            .unwrap();
        initiator.generate_initiator_hello().unwrap()
    }

    fn responder() -> AuthenticationProtocolResponder {
        AuthenticationProtocolResponder::builder()
            .session_id("session-1")
            .max_message_size(1 << 16)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_every_mandatory_field() {
        let result = AuthenticationProtocolResponder::builder().build();
        assert!(matches!(result, Err(Error::BuilderMissingField(_))));
    }

    #[test]
    fn accepts_a_well_formed_initiator_hello() {
        let mut responder = responder();
        responder.receive_initiator_hello(&initiator_hello()).unwrap();
        assert_eq!(responder.step(), ResponderStep::ReceivedHello);
        assert_eq!(responder.initiator_group_id(), Some("group-1"));
        // The smaller of the two declared maxima wins.
        assert_eq!(responder.negotiated_max_message_size, Some(1 << 16));
    }

    #[test]
    fn rejects_hellos_from_other_sessions_or_versions() {
        let mut responder = responder();
        let mut foreign = initiator_hello();
        foreign.session_id = "someone-else".into();
        assert!(matches!(
            responder.receive_initiator_hello(&foreign),
            Err(Error::SessionIdMismatch { .. })
        ));

        let mut future = initiator_hello();
        future.version = 9;
        assert!(matches!(
            responder.receive_initiator_hello(&future),
            Err(Error::UnsupportedProtocolVersion { version: 9 })
        ));
        assert_eq!(responder.step(), ResponderStep::Init);
    }

    #[test]
    fn rejects_hellos_with_no_offered_modes() {
        let mut responder = responder();
        let mut hello = initiator_hello();
        hello.supported_modes.clear();
        assert!(matches!(
            responder.receive_initiator_hello(&hello),
            Err(Error::MalformedHandshakeMessage("no offered modes"))
        ));
    }

    #[test]
    fn methods_refuse_to_run_out_of_order() {
        let mut responder = responder();
        assert!(matches!(
            responder.generate_responder_hello(),
            Err(Error::InvalidResponderState {
                method: "generate_responder_hello",
                state: ResponderStep::Init,
            })
        ));
        assert!(matches!(
            responder.get_session(),
            Err(Error::InvalidResponderState { .. })
        ));
        assert_eq!(responder.step(), ResponderStep::Init);
    }

    #[test]
    fn snapshots_round_trip_mid_hello_exchange() {
        let mut responder = responder();
        responder.receive_initiator_hello(&initiator_hello()).unwrap();
        responder.generate_responder_hello().unwrap();
        let restored =
            AuthenticationProtocolResponder::restore(&responder.snapshot().unwrap()).unwrap();
        assert_eq!(restored.step(), ResponderStep::SentHello);
        assert_eq!(restored.session_id(), "session-1");
        assert_eq!(restored.initiator_group_id(), Some("group-1"));
    }

    #[test]
    fn restore_rejects_a_mode_confirmed_before_extension_validation() {
        let mut responder = responder();
        responder.receive_initiator_hello(&initiator_hello()).unwrap();
        responder.generate_responder_hello().unwrap();
        responder.generate_handshake_secrets().unwrap();

        // Only validate_encrypted_extensions confirms a mode, two steps
        // later. A record carrying one at SecretsGenerated would let the
        // restored instance skip mode negotiation and certificate policy
        // outright, so it must not restore.
        let decoded = snapshot::decode(&responder.snapshot().unwrap()).unwrap();
        let SnapshotRecord::Responder(mut record) = decoded else {
            panic!("expected a responder record");
        };
        record.confirmed_mode = Some(ProtocolMode::AuthenticatedEncryption);
        let forged = snapshot::encode(&SnapshotRecord::Responder(record)).unwrap();

        assert!(matches!(
            AuthenticationProtocolResponder::restore(&forged),
            Err(Error::MalformedSnapshot(
                "populated fields do not match the recorded step"
            ))
        ));
    }

    #[test]
    fn initiator_snapshots_do_not_restore_as_responders() {
        let mut initiator = AuthenticationProtocolInitiator::builder()
            .session_id("session-1")
            .supported_modes(&[ProtocolMode::AuthenticationOnly])
            .max_message_size(1 << 16)
            .group_id("group-1")
            .build()
            .unwrap();
        initiator.generate_initiator_hello().unwrap();
        let bytes = initiator.snapshot().unwrap();
        assert!(matches!(
            AuthenticationProtocolResponder::restore(&bytes),
            Err(Error::MalformedSnapshot("not a responder record"))
        ));
    }
}
