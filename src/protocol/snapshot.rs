//! Versioned snapshot records.
//!
//! A snapshot is the explicit, audited list of fields that make up protocol
//! state, never a dump of whatever the in-memory object happens to contain.
//! Records are bincode-encoded and stamped with [`SNAPSHOT_VERSION`]; restore
//! rejects other versions and records whose populated fields do not match the
//! recorded state. Snapshot bytes carry live key material; storing them
//! encrypted is the caller's concern.

use serde::{Deserialize, Serialize};

use crate::cert::CertificateCheckMode;
use crate::crypto::kdf::{HandshakeKeys, Secret32, SessionKeys};
use crate::crypto::signing::IdentityKey;
use crate::error::{BincodeError, Error, Result};
use crate::handshake::{InitiatorStep, ResponderStep};
use crate::protocol::transcript::Transcript;
use crate::suite::{AeadAlgorithm, MacAlgorithm, ProtocolMode, ProtocolSuite};

pub(crate) const SNAPSHOT_VERSION: u16 = 1;

/// Outermost discriminator. Initiator, responder and session records share
/// one envelope so that bytes restored into the wrong type are rejected
/// instead of decoding by coincidence.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) enum SnapshotRecord {
    Initiator(InitiatorSnapshot),
    Responder(ResponderSnapshot),
    Session(SessionSnapshot),
}

/// Encodes a snapshot record.
pub(crate) fn encode<T: bincode::Encode>(record: &T) -> Result<Vec<u8>> {
    Ok(bincode::encode_to_vec(record, bincode::config::standard()).map_err(BincodeError::from)?)
}

/// Decodes a snapshot record, rejecting trailing bytes.
pub(crate) fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (record, consumed) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(BincodeError::from)?;
    if consumed != bytes.len() {
        return Err(Error::MalformedSnapshot("trailing bytes"));
    }
    Ok(record)
}

pub(crate) fn check_version(found: u16) -> Result<()> {
    if found != SNAPSHOT_VERSION {
        return Err(Error::UnsupportedSnapshotVersion {
            found,
            supported: SNAPSHOT_VERSION,
        });
    }
    Ok(())
}

/// The ephemeral pair as stored in a snapshot.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) struct EphemeralKeyRecord {
    pub private: Secret32,
    pub public: Vec<u8>,
}

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) struct InitiatorSnapshot {
    pub version: u16,
    pub step: InitiatorStep,
    pub session_id: String,
    pub supported_modes: Vec<ProtocolMode>,
    pub our_max_message_size: u32,
    pub group_id: String,
    pub suite: ProtocolSuite,
    pub certificate_check_mode: CertificateCheckMode,
    pub transcript: Transcript,
    pub our_ephemeral: Option<EphemeralKeyRecord>,
    pub peer_ephemeral_public: Option<Vec<u8>>,
    pub negotiated_max_message_size: Option<u32>,
    pub handshake_keys: Option<HandshakeKeys>,
    pub confirmed_mode: Option<ProtocolMode>,
    pub session_keys: Option<SessionKeys>,
}

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) struct ResponderSnapshot {
    pub version: u16,
    pub step: ResponderStep,
    pub session_id: String,
    pub our_max_message_size: u32,
    pub suite: ProtocolSuite,
    pub transcript: Transcript,
    pub our_ephemeral: Option<EphemeralKeyRecord>,
    pub peer_ephemeral_public: Option<Vec<u8>>,
    pub initiator_modes: Option<Vec<ProtocolMode>>,
    pub initiator_group_id: Option<String>,
    pub negotiated_max_message_size: Option<u32>,
    pub handshake_keys: Option<HandshakeKeys>,
    pub initiator_identity: Option<IdentityKey>,
    pub initiator_certificate_chain: Option<Vec<String>>,
    pub confirmed_mode: Option<ProtocolMode>,
    pub session_keys: Option<SessionKeys>,
}

/// Mode-specific half of a session snapshot.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) enum SessionSnapshotBody {
    Authentication {
        mac: MacAlgorithm,
        keys: SessionKeys,
        outbound_sequence: u64,
    },
    AuthenticatedEncryption {
        aead: AeadAlgorithm,
        keys: SessionKeys,
        outbound_sequence: u64,
    },
}

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) struct SessionSnapshot {
    pub version: u16,
    pub session_id: String,
    pub max_message_size: u32,
    pub body: SessionSnapshotBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: "session-1".into(),
            max_message_size: 4096,
            body: SessionSnapshotBody::Authentication {
                mac: MacAlgorithm::HmacSha256,
                keys: SessionKeys {
                    outbound: Secret32::from([1u8; 32]),
                    inbound: Secret32::from([2u8; 32]),
                },
                outbound_sequence: 7,
            },
        }
    }

    #[test]
    fn round_trip() {
        let bytes = encode(&SnapshotRecord::Session(sample())).unwrap();
        let SnapshotRecord::Session(restored) = decode(&bytes).unwrap() else {
            panic!("wrong record variant");
        };
        assert_eq!(restored.session_id, "session-1");
        assert_eq!(restored.max_message_size, 4096);
        match restored.body {
            SessionSnapshotBody::Authentication {
                outbound_sequence, ..
            } => assert_eq!(outbound_sequence, 7),
            _ => panic!("wrong body variant"),
        }
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode(&SnapshotRecord::Session(sample())).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode::<SnapshotRecord>(&bytes),
            Err(Error::MalformedSnapshot("trailing bytes"))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        assert!(check_version(SNAPSHOT_VERSION).is_ok());
        assert!(matches!(
            check_version(2),
            Err(Error::UnsupportedSnapshotVersion {
                found: 2,
                supported: SNAPSHOT_VERSION,
            })
        ));
    }
}
