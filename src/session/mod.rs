//! Post-handshake secure channels.
//!
//! A [`Session`] exists only after both parties have validated each other's
//! handshake message; it holds the derived directional keys, the negotiated
//! message size limit and an outbound sequence counter, and nothing of the
//! handshake that produced it. The keys never change for the life of the
//! session; only the counter mutates.
//!
//! Inbound validation is stateless: the header's claimed sequence number is
//! used for MAC/nonce computation, but ordering and replay suppression are
//! the transport's concern, since delivery order is not guaranteed.

use crate::crypto::cipher;
use crate::crypto::kdf::SessionKeys;
use crate::error::{Error, Result};
use crate::protocol::message::{
    self, AuthenticatedDataMessage, AuthenticatedEncryptedDataMessage, MessageHeader,
};
use crate::protocol::snapshot::{
    self, SessionSnapshot, SessionSnapshotBody, SnapshotRecord, SNAPSHOT_VERSION,
};
use crate::protocol::PROTOCOL_VERSION;
use crate::suite::{AeadAlgorithm, MacAlgorithm, ProtocolMode, ProtocolSuite};

/// An established secure channel, in whichever mode the handshake confirmed.
///
/// The enum is decided once, at handshake completion; a session never changes
/// mode. Not internally synchronized: one logical owner drives it, or the
/// caller wraps it in a lock.
#[derive(Debug)]
pub enum Session {
    Authentication(AuthenticatedSession),
    AuthenticatedEncryption(AuthenticatedEncryptionSession),
}

impl Session {
    pub(crate) fn new(
        session_id: String,
        max_message_size: u32,
        mode: ProtocolMode,
        suite: &ProtocolSuite,
        keys: SessionKeys,
    ) -> Session {
        match mode {
            ProtocolMode::AuthenticationOnly => Session::Authentication(AuthenticatedSession {
                session_id,
                max_message_size,
                mac: suite.mac,
                keys,
                outbound_sequence: 0,
            }),
            ProtocolMode::AuthenticatedEncryption => {
                Session::AuthenticatedEncryption(AuthenticatedEncryptionSession {
                    session_id,
                    max_message_size,
                    aead: suite.aead,
                    keys,
                    outbound_sequence: 0,
                })
            }
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Session::Authentication(session) => &session.session_id,
            Session::AuthenticatedEncryption(session) => &session.session_id,
        }
    }

    pub fn mode(&self) -> ProtocolMode {
        match self {
            Session::Authentication(_) => ProtocolMode::AuthenticationOnly,
            Session::AuthenticatedEncryption(_) => ProtocolMode::AuthenticatedEncryption,
        }
    }

    /// Captures the session as a versioned record. The bytes contain live
    /// key material; storing them encrypted is the caller's concern.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let record = match self {
            Session::Authentication(session) => SessionSnapshot {
                version: SNAPSHOT_VERSION,
                session_id: session.session_id.clone(),
                max_message_size: session.max_message_size,
                body: SessionSnapshotBody::Authentication {
                    mac: session.mac,
                    keys: session.keys.clone(),
                    outbound_sequence: session.outbound_sequence,
                },
            },
            Session::AuthenticatedEncryption(session) => SessionSnapshot {
                version: SNAPSHOT_VERSION,
                session_id: session.session_id.clone(),
                max_message_size: session.max_message_size,
                body: SessionSnapshotBody::AuthenticatedEncryption {
                    aead: session.aead,
                    keys: session.keys.clone(),
                    outbound_sequence: session.outbound_sequence,
                },
            },
        };
        snapshot::encode(&SnapshotRecord::Session(record))
    }

    /// Reconstructs a session from [`Session::snapshot`] bytes. The restored
    /// session continues exactly where the captured one stopped, sequence
    /// counter included.
    pub fn restore(bytes: &[u8]) -> Result<Session> {
        let SnapshotRecord::Session(record) = snapshot::decode(bytes)? else {
            return Err(Error::MalformedSnapshot("not a session record"));
        };
        snapshot::check_version(record.version)?;
        Ok(match record.body {
            SessionSnapshotBody::Authentication {
                mac,
                keys,
                outbound_sequence,
            } => Session::Authentication(AuthenticatedSession {
                session_id: record.session_id,
                max_message_size: record.max_message_size,
                mac,
                keys,
                outbound_sequence,
            }),
            SessionSnapshotBody::AuthenticatedEncryption {
                aead,
                keys,
                outbound_sequence,
            } => Session::AuthenticatedEncryption(AuthenticatedEncryptionSession {
                session_id: record.session_id,
                max_message_size: record.max_message_size,
                aead,
                keys,
                outbound_sequence,
            }),
        })
    }
}

/// Integrity-only channel: payloads travel in the clear, protected by an
/// HMAC over the header and payload.
#[derive(Debug)]
pub struct AuthenticatedSession {
    session_id: String,
    max_message_size: u32,
    mac: MacAlgorithm,
    keys: SessionKeys,
    outbound_sequence: u64,
}

impl AuthenticatedSession {
    /// Authenticates `payload` under the outbound key and advances the
    /// sequence counter. Fails without advancing anything.
    pub fn create_mac(&mut self, payload: &[u8]) -> Result<AuthenticatedDataMessage> {
        check_size(payload.len(), self.max_message_size)?;
        let next = self
            .outbound_sequence
            .checked_add(1)
            .ok_or(Error::SequenceExhausted)?;
        let header = MessageHeader {
            version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            sequence: self.outbound_sequence,
        };
        let header_bytes = message::encode(&header)?;
        let mac = cipher::compute_mac(self.mac, &self.keys.outbound, &[&header_bytes, payload])?;
        self.outbound_sequence = next;
        Ok(AuthenticatedDataMessage {
            header,
            payload: payload.to_vec(),
            mac,
        })
    }

    /// Recomputes the MAC under the inbound key and the header's claimed
    /// sequence number, comparing in constant time.
    pub fn validate_mac(&self, message: &AuthenticatedDataMessage) -> Result<()> {
        check_inbound_header(&self.session_id, &message.header)?;
        check_size(message.payload.len(), self.max_message_size)?;
        let header_bytes = message::encode(&message.header)?;
        cipher::verify_mac(
            self.mac,
            &self.keys.inbound,
            &[&header_bytes, &message.payload],
            &message.mac,
        )
    }
}

/// Confidentiality and integrity channel: payloads are AEAD sealed with a
/// nonce derived deterministically from the sequence number.
#[derive(Debug)]
pub struct AuthenticatedEncryptionSession {
    session_id: String,
    max_message_size: u32,
    aead: AeadAlgorithm,
    keys: SessionKeys,
    outbound_sequence: u64,
}

impl AuthenticatedEncryptionSession {
    /// Seals `payload` under the outbound key, binding the header as
    /// associated data, and advances the sequence counter.
    pub fn encrypt_data(&mut self, payload: &[u8]) -> Result<AuthenticatedEncryptedDataMessage> {
        check_size(payload.len(), self.max_message_size)?;
        let next = self
            .outbound_sequence
            .checked_add(1)
            .ok_or(Error::SequenceExhausted)?;
        let header = MessageHeader {
            version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            sequence: self.outbound_sequence,
        };
        let header_bytes = message::encode(&header)?;
        let mut sealed = cipher::seal(
            self.aead,
            &self.keys.outbound,
            self.outbound_sequence,
            &header_bytes,
            payload,
        )?;
        let auth_tag = sealed.split_off(sealed.len() - cipher::TAG_LEN);
        self.outbound_sequence = next;
        Ok(AuthenticatedEncryptedDataMessage {
            header,
            encrypted_payload: sealed,
            auth_tag,
        })
    }

    /// Opens a sealed message with the inbound key and the nonce implied by
    /// the header. Tag mismatch and malformed ciphertext are indistinguishable
    /// by design; both surface as [`Error::DecryptionFailure`].
    pub fn decrypt_data(&self, message: &AuthenticatedEncryptedDataMessage) -> Result<Vec<u8>> {
        check_inbound_header(&self.session_id, &message.header)?;
        check_size(message.encrypted_payload.len(), self.max_message_size)?;
        if message.auth_tag.len() != cipher::TAG_LEN {
            return Err(Error::DecryptionFailure);
        }
        let header_bytes = message::encode(&message.header)?;
        let mut sealed =
            Vec::with_capacity(message.encrypted_payload.len() + message.auth_tag.len());
        sealed.extend_from_slice(&message.encrypted_payload);
        sealed.extend_from_slice(&message.auth_tag);
        cipher::open(
            self.aead,
            &self.keys.inbound,
            message.header.sequence,
            &header_bytes,
            &sealed,
        )
    }
}

fn check_inbound_header(session_id: &str, header: &MessageHeader) -> Result<()> {
    if header.version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedProtocolVersion {
            version: header.version,
        });
    }
    if header.session_id != session_id {
        return Err(Error::SessionIdMismatch {
            expected: session_id.to_string(),
            actual: header.session_id.clone(),
        });
    }
    Ok(())
}

// Applied to outbound plaintext and inbound payloads alike; the negotiated
// limit is the smaller of the two maxima declared in the hellos.
fn check_size(size: usize, limit: u32) -> Result<()> {
    if size > limit as usize {
        return Err(Error::MessageTooLarge { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::Secret32;

    const LIMIT: u32 = 1024;

    fn keys(outbound: u8, inbound: u8) -> SessionKeys {
        SessionKeys {
            outbound: Secret32::from([outbound; 32]),
            inbound: Secret32::from([inbound; 32]),
        }
    }

    fn mac_pair() -> (Session, Session) {
        let suite = ProtocolSuite::default();
        let a = Session::new(
            "s".into(),
            LIMIT,
            ProtocolMode::AuthenticationOnly,
            &suite,
            keys(1, 2),
        );
        let b = Session::new(
            "s".into(),
            LIMIT,
            ProtocolMode::AuthenticationOnly,
            &suite,
            keys(2, 1),
        );
        (a, b)
    }

    fn aead_pair() -> (Session, Session) {
        let suite = ProtocolSuite::default();
        let a = Session::new(
            "s".into(),
            LIMIT,
            ProtocolMode::AuthenticatedEncryption,
            &suite,
            keys(1, 2),
        );
        let b = Session::new(
            "s".into(),
            LIMIT,
            ProtocolMode::AuthenticatedEncryption,
            &suite,
            keys(2, 1),
        );
        (a, b)
    }

    fn as_mac(session: Session) -> AuthenticatedSession {
        match session {
            Session::Authentication(inner) => inner,
            _ => panic!("expected an authentication session"),
        }
    }

    fn as_aead(session: Session) -> AuthenticatedEncryptionSession {
        match session {
            Session::AuthenticatedEncryption(inner) => inner,
            _ => panic!("expected an authenticated encryption session"),
        }
    }

    #[test]
    fn mac_messages_validate_in_both_directions() {
        let (a, b) = mac_pair();
        let (mut a, b) = (as_mac(a), as_mac(b));
        let message = a.create_mac(b"ledger update").unwrap();
        b.validate_mac(&message).unwrap();
        assert_eq!(message.header.sequence, 0);
        let second = a.create_mac(b"another update").unwrap();
        assert_eq!(second.header.sequence, 1);
        b.validate_mac(&second).unwrap();
    }

    #[test]
    fn tampering_with_mac_or_payload_is_detected() {
        let (a, b) = mac_pair();
        let (mut a, b) = (as_mac(a), as_mac(b));
        let message = a.create_mac(b"payload").unwrap();

        let mut tampered = message.clone();
        tampered.mac[0] ^= 1;
        assert!(matches!(b.validate_mac(&tampered), Err(Error::InvalidMac)));

        let mut tampered = message.clone();
        tampered.payload[0] ^= 1;
        assert!(matches!(b.validate_mac(&tampered), Err(Error::InvalidMac)));

        let mut tampered = message;
        tampered.header.sequence += 1;
        assert!(matches!(b.validate_mac(&tampered), Err(Error::InvalidMac)));
    }

    #[test]
    fn encrypted_messages_round_trip_in_both_directions() {
        let (a, b) = aead_pair();
        let (mut a, mut b) = (as_aead(a), as_aead(b));
        let message = a.encrypt_data(b"confidential").unwrap();
        assert_ne!(message.encrypted_payload, b"confidential");
        assert_eq!(b.decrypt_data(&message).unwrap(), b"confidential");
        let reply = b.encrypt_data(b"ack").unwrap();
        assert_eq!(a.decrypt_data(&reply).unwrap(), b"ack");
    }

    #[test]
    fn tampering_with_ciphertext_tag_or_header_is_detected() {
        let (a, b) = aead_pair();
        let (mut a, b) = (as_aead(a), as_aead(b));
        let message = a.encrypt_data(b"confidential").unwrap();

        let mut tampered = message.clone();
        tampered.encrypted_payload[0] ^= 1;
        assert!(matches!(
            b.decrypt_data(&tampered),
            Err(Error::DecryptionFailure)
        ));

        let mut tampered = message.clone();
        tampered.auth_tag[0] ^= 1;
        assert!(matches!(
            b.decrypt_data(&tampered),
            Err(Error::DecryptionFailure)
        ));

        let mut tampered = message;
        tampered.header.sequence += 1;
        assert!(matches!(
            b.decrypt_data(&tampered),
            Err(Error::DecryptionFailure)
        ));
    }

    #[test]
    fn wrong_session_id_and_version_are_rejected_before_crypto() {
        let (a, b) = aead_pair();
        let (mut a, b) = (as_aead(a), as_aead(b));
        let message = a.encrypt_data(b"confidential").unwrap();

        let mut foreign = message.clone();
        foreign.header.session_id = "other".into();
        assert!(matches!(
            b.decrypt_data(&foreign),
            Err(Error::SessionIdMismatch { .. })
        ));

        let mut future = message;
        future.header.version = 9;
        assert!(matches!(
            b.decrypt_data(&future),
            Err(Error::UnsupportedProtocolVersion { version: 9 })
        ));
    }

    #[test]
    fn oversized_payloads_are_refused() {
        let (a, _) = mac_pair();
        let mut a = as_mac(a);
        let oversized = vec![0u8; LIMIT as usize + 1];
        assert!(matches!(
            a.create_mac(&oversized),
            Err(Error::MessageTooLarge { .. })
        ));
        // The failed call must not have consumed a sequence number.
        assert_eq!(a.create_mac(b"small").unwrap().header.sequence, 0);
    }

    #[test]
    fn sequence_space_never_wraps() {
        let (a, _) = mac_pair();
        let mut a = as_mac(a);
        a.outbound_sequence = u64::MAX;
        assert!(matches!(
            a.create_mac(b"last"),
            Err(Error::SequenceExhausted)
        ));

        let (a, _) = aead_pair();
        let mut a = as_aead(a);
        a.outbound_sequence = u64::MAX;
        assert!(matches!(
            a.encrypt_data(b"last"),
            Err(Error::SequenceExhausted)
        ));
    }

    #[test]
    fn snapshot_preserves_the_sequence_counter() {
        let (a, b) = aead_pair();
        let (mut a, b) = (as_aead(a), as_aead(b));
        let first = a.encrypt_data(b"one").unwrap();

        let restored = Session::restore(&Session::AuthenticatedEncryption(a).snapshot().unwrap())
            .unwrap();
        let mut a = as_aead(restored);

        let second = a.encrypt_data(b"two").unwrap();
        assert_eq!(first.header.sequence, 0);
        assert_eq!(second.header.sequence, 1);
        assert_eq!(b.decrypt_data(&first).unwrap(), b"one");
        assert_eq!(b.decrypt_data(&second).unwrap(), b"two");
    }

    #[test]
    fn snapshot_restore_keeps_both_directions_working() {
        let (a, b) = mac_pair();
        let restored_a = as_mac(Session::restore(&a.snapshot().unwrap()).unwrap());
        let restored_b = as_mac(Session::restore(&b.snapshot().unwrap()).unwrap());
        let (mut restored_a, mut restored_b) = (restored_a, restored_b);
        let to_b = restored_a.create_mac(b"ping").unwrap();
        restored_b.validate_mac(&to_b).unwrap();
        let to_a = restored_b.create_mac(b"pong").unwrap();
        restored_a.validate_mac(&to_a).unwrap();
    }
}
