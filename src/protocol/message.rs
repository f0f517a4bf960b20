//! Wire records exchanged during the handshake and over established sessions.
//!
//! The two handshake directions use two distinct record types with no shared
//! mutable shape, so a field can never leak across directions. Every record
//! carries the protocol version and is bincode-encoded with the standard
//! configuration; the transcript absorbs exactly these encodings, which keeps
//! both parties' transcripts in agreement.

use serde::{Deserialize, Serialize};

use crate::crypto::signing::IdentityKey;
use crate::error::{BincodeError, Error, Result};
use crate::suite::ProtocolMode;

/// Encodes a record with the crate-wide bincode configuration.
pub(crate) fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::encode_to_vec(value, bincode::config::standard()).map_err(BincodeError::from)?)
}

/// Decodes a record, rejecting trailing bytes.
pub(crate) fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (value, consumed) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(BincodeError::from)?;
    if consumed != bytes.len() {
        return Err(Error::MalformedHandshakeMessage("trailing bytes"));
    }
    Ok(value)
}

/// First record on the wire, initiator to responder.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct InitiatorHello {
    pub version: u16,
    pub session_id: String,
    /// Acceptable modes in preference order.
    pub supported_modes: Vec<ProtocolMode>,
    /// Largest data message this party is prepared to receive.
    pub max_message_size: u32,
    pub ephemeral_public_key: Vec<u8>,
    /// Membership group the initiator claims to belong to. Carried opaquely;
    /// the node's membership layer checks it.
    pub group_id: String,
}

/// Second record, responder to initiator.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct ResponderHello {
    pub version: u16,
    pub session_id: String,
    pub ephemeral_public_key: Vec<u8>,
    pub max_message_size: u32,
}

/// Third record: the initiator's authenticated handshake message. The payload
/// is an AEAD-sealed [`InitiatorHandshakePayload`] under the
/// initiator-to-responder handshake key.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct InitiatorHandshake {
    pub version: u16,
    pub session_id: String,
    pub encrypted_payload: Vec<u8>,
}

/// Fourth record: the responder's counterpart, sealing a
/// [`ResponderHandshakePayload`] under the responder-to-initiator key.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct ResponderHandshake {
    pub version: u16,
    pub session_id: String,
    pub encrypted_payload: Vec<u8>,
}

/// Cleartext of the initiator's sealed payload.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub(crate) struct InitiatorHandshakePayload {
    pub content: InitiatorHandshakeContent,
    /// Signature over the domain-separated transcript digest, produced by the
    /// injected signing callback.
    pub signature: Vec<u8>,
}

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub(crate) struct InitiatorHandshakeContent {
    /// The long-term public key this handshake claims to be signed with.
    pub identity_key: IdentityKey,
    /// Echo of the hello's offered modes; the responder cross-checks the two,
    /// since only this copy is authenticated.
    pub offered_modes: Vec<ProtocolMode>,
    /// PEM chain binding `identity_key` to an X.500 name, leaf first.
    pub certificate_chain: Option<Vec<String>>,
}

/// Cleartext of the responder's sealed payload.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub(crate) struct ResponderHandshakePayload {
    pub content: ResponderHandshakeContent,
    pub signature: Vec<u8>,
}

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub(crate) struct ResponderHandshakeContent {
    pub identity_key: IdentityKey,
    /// The mode this session will run in; the initiator cross-checks it
    /// against what it offered.
    pub confirmed_mode: ProtocolMode,
    pub certificate_chain: Option<Vec<String>>,
}

/// Header travelling with every data message; authenticated as MAC input or
/// AEAD associated data together with the payload.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub version: u16,
    pub session_id: String,
    pub sequence: u64,
}

/// Application data protected by an `AuthenticatedSession`.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct AuthenticatedDataMessage {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
    pub mac: Vec<u8>,
}

/// Application data protected by an `AuthenticatedEncryptionSession`.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct AuthenticatedEncryptedDataMessage {
    pub header: MessageHeader,
    pub encrypted_payload: Vec<u8>,
    pub auth_tag: Vec<u8>,
}
