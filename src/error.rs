use thiserror::Error;

use crate::cert::CertificateError;
use crate::handshake::{InitiatorStep, ResponderStep};
use crate::suite::ProtocolMode;

/// An error related to `bincode` serialization or deserialization.
///
/// This is a wrapper around `bincode`'s own error types to provide a more
/// consistent error handling experience within this crate.
#[derive(Error, Debug)]
pub enum BincodeError {
    /// An error occurred during serialization (encoding).
    #[error("Encode error: {0}")]
    Enc(#[source] Box<bincode::error::EncodeError>),
    /// An error occurred during deserialization (decoding).
    #[error("Decode error: {0}")]
    Dec(#[source] Box<bincode::error::DecodeError>),
}

impl From<bincode::error::EncodeError> for BincodeError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BincodeError::Enc(Box::from(err))
    }
}

impl From<bincode::error::DecodeError> for BincodeError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BincodeError::Dec(Box::from(err))
    }
}

/// Every failure the protocol, the sessions or the certificate validator can
/// surface.
///
/// Variants are deliberately fine-grained: the caller decides whether to tear
/// the connection down, alert, or start a fresh handshake under a new session
/// id, and needs to tell a configuration mismatch apart from an active attack.
/// Nothing in this crate retries; a failed call leaves the instance exactly as
/// it was before the call.
#[derive(Debug, Error)]
pub enum Error {
    // State machine errors (caller defects, never retryable)
    #[error("initiator method `{method}` invoked in state {state}")]
    InvalidInitiatorState {
        method: &'static str,
        state: InitiatorStep,
    },

    #[error("responder method `{method}` invoked in state {state}")]
    InvalidResponderState {
        method: &'static str,
        state: ResponderStep,
    },

    #[error("the session keys were already handed out for this instance")]
    SessionAlreadyTaken,

    #[error("a required protocol component was missing: {0}")]
    ComponentMissing(&'static str),

    // Handshake message errors
    #[error("unsupported protocol version {version}")]
    UnsupportedProtocolVersion { version: u16 },

    #[error("session id mismatch: expected `{expected}`, got `{actual}`")]
    SessionIdMismatch { expected: String, actual: String },

    /// The handshake payload failed AEAD authentication. No further detail is
    /// carried: the session must be abandoned and the ephemeral keys never
    /// reused.
    #[error("handshake payload could not be authenticated")]
    InvalidHandshakeMessage,

    #[error("malformed handshake message: {0}")]
    MalformedHandshakeMessage(&'static str),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("signing callback failed: {0}")]
    Signing(String),

    #[error("key agreement produced a non-contributory shared secret")]
    SharedSecretNotContributory,

    #[error("key derivation failed")]
    KeyDerivationFailure,

    // Certificate errors
    #[error("invalid peer certificate for `{identity}`: {reason}")]
    InvalidPeerCertificate {
        identity: String,
        reason: CertificateError,
    },

    #[error("invalid X.500 name `{name}`: {reason}")]
    InvalidX500Name { name: String, reason: &'static str },

    #[error("an expected peer name is required when certificate validation is enabled")]
    MissingExpectedPeerName,

    #[error("trust store certificate {index} could not be parsed: {reason}")]
    InvalidTrustStore { index: usize, reason: String },

    #[error("certificate revocation list {index} could not be parsed: {reason}")]
    InvalidRevocationList { index: usize, reason: String },

    // Mode negotiation (a configuration mismatch, not an attack)
    #[error("no common protocol mode: offered {offered:?}, supported {supported:?}")]
    ModeNegotiationFailure {
        offered: Vec<ProtocolMode>,
        supported: Vec<ProtocolMode>,
    },

    #[error("peer confirmed mode {confirmed:?} which was not offered")]
    ConfirmedModeNotOffered { confirmed: ProtocolMode },

    #[error("at least one protocol mode must be offered")]
    EmptyModeSet,

    // Session traffic errors (per message; the session itself survives)
    #[error("message authentication failed")]
    InvalidMac,

    #[error("decryption failed")]
    DecryptionFailure,

    #[error("encryption failed")]
    EncryptionFailure,

    #[error("message of {size} bytes exceeds the session limit of {limit}")]
    MessageTooLarge { size: usize, limit: u32 },

    #[error("outbound sequence space exhausted")]
    SequenceExhausted,

    // Snapshot errors
    #[error("unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedSnapshotVersion { found: u16, supported: u16 },

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(&'static str),

    // Construction errors
    #[error("missing required builder field: {0}")]
    BuilderMissingField(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("serialization or deserialization failed: {0}")]
    Serialization(#[from] BincodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
