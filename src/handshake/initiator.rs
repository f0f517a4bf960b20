//! The initiating side of the authentication protocol.

use log::debug;

use crate::cert::{CertificateCheckMode, CertificateError, CertificateValidator, X500Name};
use crate::crypto::agreement::EphemeralKeyPair;
use crate::crypto::cipher;
use crate::crypto::kdf::{self, HandshakeKeys, Secret32, SessionKeys};
use crate::crypto::signing::IdentityKey;
use crate::error::{Error, Result};
use crate::protocol::message::{
    self, InitiatorHandshake, InitiatorHandshakeContent, InitiatorHandshakePayload, InitiatorHello,
    ResponderHandshake, ResponderHandshakePayload, ResponderHello,
};
use crate::protocol::snapshot::{
    self, EphemeralKeyRecord, InitiatorSnapshot, SnapshotRecord, SNAPSHOT_VERSION,
};
use crate::protocol::transcript::Transcript;
use crate::protocol::PROTOCOL_VERSION;
use crate::session::Session;
use crate::suite::{ProtocolMode, ProtocolSuite};

use super::{
    check_declared_max_size, check_protocol_version, check_session_id, signature_input,
    InitiatorStep, SignatureResult, INITIATOR_SIGNATURE_LABEL, MIN_MAX_MESSAGE_SIZE,
    RESPONDER_SIGNATURE_LABEL,
};

/// Drives the initiating party through the handshake.
///
/// One instance per session id; exactly one logical owner calls into it. The
/// steps must be invoked in declaration order, each exactly once; the module
/// docs describe the full exchange.
pub struct AuthenticationProtocolInitiator {
    step: InitiatorStep,
    session_id: String,
    supported_modes: Vec<ProtocolMode>,
    our_max_message_size: u32,
    group_id: String,
    suite: ProtocolSuite,
    certificate_check_mode: CertificateCheckMode,
    transcript: Transcript,
    our_ephemeral: Option<EphemeralKeyPair>,
    peer_ephemeral_public: Option<Vec<u8>>,
    negotiated_max_message_size: Option<u32>,
    handshake_keys: Option<HandshakeKeys>,
    confirmed_mode: Option<ProtocolMode>,
    session_keys: Option<SessionKeys>,
}

/// Builder for [`AuthenticationProtocolInitiator`]. Fails on `build` if a
/// required field is missing.
#[derive(Default)]
pub struct AuthenticationProtocolInitiatorBuilder {
    session_id: Option<String>,
    supported_modes: Option<Vec<ProtocolMode>>,
    max_message_size: Option<u32>,
    group_id: Option<String>,
    suite: Option<ProtocolSuite>,
    certificate_check_mode: Option<CertificateCheckMode>,
}

impl AuthenticationProtocolInitiatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// The modes this party is willing to run the session in, in preference
    /// order. The responder confirms the first one it also supports.
    pub fn supported_modes(mut self, modes: &[ProtocolMode]) -> Self {
        self.supported_modes = Some(modes.to_vec());
        self
    }

    /// The largest application payload this party will send or accept. The
    /// session limit becomes the smaller of both parties' declarations.
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = Some(size);
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Overrides the default algorithm suite.
    pub fn suite(mut self, suite: ProtocolSuite) -> Self {
        self.suite = Some(suite);
        self
    }

    /// How the responder's identity will be checked. Defaults to
    /// [`CertificateCheckMode::NoCertificate`].
    pub fn certificate_check_mode(mut self, mode: CertificateCheckMode) -> Self {
        self.certificate_check_mode = Some(mode);
        self
    }

    pub fn build(self) -> Result<AuthenticationProtocolInitiator> {
        let session_id = self
            .session_id
            .ok_or(Error::BuilderMissingField("session_id"))?;
        let supported_modes = self
            .supported_modes
            .ok_or(Error::BuilderMissingField("supported_modes"))?;
        if supported_modes.is_empty() {
            return Err(Error::EmptyModeSet);
        }
        let max_message_size = self
            .max_message_size
            .ok_or(Error::BuilderMissingField("max_message_size"))?;
        if max_message_size < MIN_MAX_MESSAGE_SIZE {
            return Err(Error::InvalidConfiguration(
                "max_message_size below the protocol minimum",
            ));
        }
        let group_id = self.group_id.ok_or(Error::BuilderMissingField("group_id"))?;
        let certificate_check_mode = self
            .certificate_check_mode
            .unwrap_or(CertificateCheckMode::NoCertificate);
        // Trust store defects surface here, not mid-handshake.
        CertificateValidator::from_check_mode(&certificate_check_mode)?;

        Ok(AuthenticationProtocolInitiator {
            step: InitiatorStep::Init,
            session_id,
            supported_modes,
            our_max_message_size: max_message_size,
            group_id,
            suite: self.suite.unwrap_or_default(),
            certificate_check_mode,
            transcript: Transcript::new(),
            our_ephemeral: None,
            peer_ephemeral_public: None,
            negotiated_max_message_size: None,
            handshake_keys: None,
            confirmed_mode: None,
            session_keys: None,
        })
    }
}

impl AuthenticationProtocolInitiator {
    pub fn builder() -> AuthenticationProtocolInitiatorBuilder {
        AuthenticationProtocolInitiatorBuilder::new()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn step(&self) -> InitiatorStep {
        self.step
    }

    fn require_step(&self, expected: InitiatorStep, method: &'static str) -> Result<()> {
        if self.step != expected {
            return Err(Error::InvalidInitiatorState {
                method,
                state: self.step,
            });
        }
        Ok(())
    }

    /// Opens the exchange: generates a fresh ephemeral key pair and emits the
    /// hello carrying it, the offered modes, the declared size limit and the
    /// group id.
    pub fn generate_initiator_hello(&mut self) -> Result<InitiatorHello> {
        self.require_step(InitiatorStep::Init, "generate_initiator_hello")?;
        let ephemeral = EphemeralKeyPair::generate(self.suite.key_agreement);
        let hello = InitiatorHello {
            version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            supported_modes: self.supported_modes.clone(),
            max_message_size: self.our_max_message_size,
            ephemeral_public_key: ephemeral.public_bytes().to_vec(),
            group_id: self.group_id.clone(),
        };
        let mut transcript = self.transcript.clone();
        transcript.append_record(&hello)?;

        self.transcript = transcript;
        self.our_ephemeral = Some(ephemeral);
        self.step = InitiatorStep::SentHello;
        Ok(hello)
    }

    /// Takes in the responder's hello: checks version and session id, vets
    /// the ephemeral key, and fixes the session size limit to the smaller of
    /// the two declarations.
    pub fn receive_responder_hello(&mut self, hello: &ResponderHello) -> Result<()> {
        self.require_step(InitiatorStep::SentHello, "receive_responder_hello")?;
        check_protocol_version(hello.version)?;
        check_session_id(&self.session_id, &hello.session_id)?;
        check_declared_max_size(hello.max_message_size)?;
        EphemeralKeyPair::validate_public_bytes(
            self.suite.key_agreement,
            &hello.ephemeral_public_key,
        )?;
        let mut transcript = self.transcript.clone();
        transcript.append_record(hello)?;

        self.transcript = transcript;
        self.peer_ephemeral_public = Some(hello.ephemeral_public_key.clone());
        self.negotiated_max_message_size =
            Some(self.our_max_message_size.min(hello.max_message_size));
        self.step = InitiatorStep::ReceivedPeerHello;
        Ok(())
    }

    /// Runs the ephemeral key agreement and derives the handshake keys from
    /// the shared secret and the hash of the two hellos.
    pub fn generate_handshake_secrets(&mut self) -> Result<()> {
        self.require_step(InitiatorStep::ReceivedPeerHello, "generate_handshake_secrets")?;
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
        self.step = InitiatorStep::SecretsGenerated;
        Ok(())
    }

    /// Produces this party's handshake message. `identity_key` is the
    /// long-term public key belonging to `sign`, which is invoked once with
    /// the bytes to sign and is expected to delegate to the node's key
    /// management. The optional certificate chain binds that key to an X.500
    /// name for peers that validate certificates.
    pub fn generate_our_handshake_message(
        &mut self,
        identity_key: &IdentityKey,
        certificate_chain: Option<Vec<String>>,
        sign: impl FnOnce(&[u8]) -> SignatureResult,
    ) -> Result<InitiatorHandshake> {
        self.require_step(InitiatorStep::SecretsGenerated, "generate_our_handshake_message")?;
        if identity_key.scheme() != self.suite.signature {
            return Err(Error::InvalidConfiguration(
                "identity key scheme does not match the suite",
            ));
        }
        let keys = self
            .handshake_keys
            .as_ref()
            .ok_or(Error::ComponentMissing("handshake keys"))?;

        let content = InitiatorHandshakeContent {
            identity_key: identity_key.clone(),
            offered_modes: self.supported_modes.clone(),
            certificate_chain,
        };
        let encoded_content = message::encode(&content)?;
        let transcript_hash = self.transcript.current_hash();
        let input = signature_input(INITIATOR_SIGNATURE_LABEL, &transcript_hash, &encoded_content);
        let signature = sign(&input).map_err(|e| Error::Signing(e.to_string()))?;

        let payload = InitiatorHandshakePayload { content, signature };
        let sealed = cipher::seal(
            self.suite.aead,
            &keys.initiator_to_responder,
            0,
            &transcript_hash,
            &message::encode(&payload)?,
        )?;
        let handshake = InitiatorHandshake {
            version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            encrypted_payload: sealed,
        };
        let mut transcript = self.transcript.clone();
        transcript.append_record(&handshake)?;

        self.transcript = transcript;
        self.step = InitiatorStep::SentHandshake;
        Ok(handshake)
    }

    /// Validates the responder's handshake message: opens it under the
    /// handshake keys, verifies the embedded signature against the trusted
    /// identity keys, cross-checks the confirmed mode against what was
    /// offered, applies the certificate policy, and finally derives the
    /// session keys over the complete transcript.
    pub fn validate_peer_handshake_message(
        &mut self,
        handshake: &ResponderHandshake,
        expected_peer_name: Option<&X500Name>,
        trusted_identity_keys: &[IdentityKey],
    ) -> Result<()> {
        self.require_step(InitiatorStep::SentHandshake, "validate_peer_handshake_message")?;
        check_protocol_version(handshake.version)?;
        check_session_id(&self.session_id, &handshake.session_id)?;
        let keys = self
            .handshake_keys
            .as_ref()
            .ok_or(Error::ComponentMissing("handshake keys"))?;

        let transcript_hash = self.transcript.current_hash();
        let opened = cipher::open(
            self.suite.aead,
            &keys.responder_to_initiator,
            0,
            &transcript_hash,
            &handshake.encrypted_payload,
        )
        .map_err(|_| Error::InvalidHandshakeMessage)?;
        let payload: ResponderHandshakePayload = message::decode(&opened)?;

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
            RESPONDER_SIGNATURE_LABEL,
            &transcript_hash,
            &message::encode(&payload.content)?,
        );
        identity.verify(&input, &payload.signature)?;

        let confirmed = payload.content.confirmed_mode;
        if !self.supported_modes.contains(&confirmed) {
            return Err(Error::ConfirmedModeNotOffered { confirmed });
        }

        if let Some(validator) = CertificateValidator::from_check_mode(&self.certificate_check_mode)? {
            let expected = expected_peer_name.ok_or(Error::MissingExpectedPeerName)?;
            let chain = payload.content.certificate_chain.as_deref().ok_or_else(|| {
                Error::InvalidPeerCertificate {
                    identity: expected.to_string(),
                    reason: CertificateError::EmptyChain,
                }
            })?;
            validator.validate(chain, expected, identity)?;
        }

        let mut transcript = self.transcript.clone();
        transcript.append_record(handshake)?;
        let session_keys =
            kdf::derive_session_keys(&keys.master, &transcript.current_hash(), confirmed, true)?;

        self.transcript = transcript;
        self.confirmed_mode = Some(confirmed);
        self.session_keys = Some(session_keys);
        self.handshake_keys = None;
        self.step = InitiatorStep::PeerHandshakeValidated;
        debug!(
            "initiator session `{}`: handshake complete, mode {confirmed:?}, peer identity {}",
            self.session_id,
            hex::encode(identity.fingerprint())
        );
        Ok(())
    }

    /// Hands out the established session. The keys move out of the protocol
    /// instance; a second call fails with [`Error::SessionAlreadyTaken`].
    pub fn get_session(&mut self) -> Result<Session> {
        self.require_step(InitiatorStep::PeerHandshakeValidated, "get_session")?;
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

    /// Captures the instance as a versioned record. The bytes contain live
    /// key material; storing them encrypted is the caller's concern.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let record = InitiatorSnapshot {
            version: SNAPSHOT_VERSION,
            step: self.step,
            session_id: self.session_id.clone(),
            supported_modes: self.supported_modes.clone(),
            our_max_message_size: self.our_max_message_size,
            group_id: self.group_id.clone(),
            suite: self.suite,
            certificate_check_mode: self.certificate_check_mode.clone(),
            transcript: self.transcript.clone(),
            our_ephemeral: self.our_ephemeral.as_ref().map(|pair| EphemeralKeyRecord {
                private: Secret32::from(*pair.private_bytes()),
                public: pair.public_bytes().to_vec(),
            }),
            peer_ephemeral_public: self.peer_ephemeral_public.clone(),
            negotiated_max_message_size: self.negotiated_max_message_size,
            handshake_keys: self.handshake_keys.clone(),
            confirmed_mode: self.confirmed_mode,
            session_keys: self.session_keys.clone(),
        };
        snapshot::encode(&SnapshotRecord::Initiator(record))
    }

    /// Reconstructs an initiator from [`AuthenticationProtocolInitiator::snapshot`]
    /// bytes. The restored instance behaves exactly like the captured one,
    /// including refusing a second `get_session` when the keys were already
    /// handed out before the capture.
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let SnapshotRecord::Initiator(record) = snapshot::decode(bytes)? else {
            return Err(Error::MalformedSnapshot("not an initiator record"));
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
        Ok(AuthenticationProtocolInitiator {
            step: record.step,
            session_id: record.session_id,
            supported_modes: record.supported_modes,
            our_max_message_size: record.our_max_message_size,
            group_id: record.group_id,
            suite: record.suite,
            certificate_check_mode: record.certificate_check_mode,
            transcript: record.transcript,
            our_ephemeral,
            peer_ephemeral_public: record.peer_ephemeral_public,
            negotiated_max_message_size: record.negotiated_max_message_size,
            handshake_keys: record.handshake_keys,
            confirmed_mode: record.confirmed_mode,
            session_keys: record.session_keys,
        })
    }
}

fn record_is_consistent(record: &InitiatorSnapshot) -> bool {
    use InitiatorStep::*;
    let ephemeral = record.our_ephemeral.is_some();
    let peer = record.peer_ephemeral_public.is_some();
    let negotiated = record.negotiated_max_message_size.is_some();
    let handshake_keys = record.handshake_keys.is_some();
    let confirmed = record.confirmed_mode.is_some();
    let session_keys = record.session_keys.is_some();
    match record.step {
        Init => {
            !ephemeral && !peer && !negotiated && !handshake_keys && !confirmed && !session_keys
        }
        SentHello => {
            ephemeral && !peer && !negotiated && !handshake_keys && !confirmed && !session_keys
        }
        ReceivedPeerHello => {
            ephemeral && peer && negotiated && !handshake_keys && !confirmed && !session_keys
        }
        SecretsGenerated | SentHandshake => {
            !ephemeral && peer && negotiated && handshake_keys && !confirmed && !session_keys
        }
        // Session keys may or may not have been handed out already.
        PeerHandshakeValidated => !ephemeral && peer && negotiated && !handshake_keys && confirmed,
    }
}
