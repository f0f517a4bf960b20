//! Key schedule for handshake and session secrets.
//!
//! All keys flow from HKDF-SHA256. The salt commits to a protocol prefix and
//! the transcript hash at the derivation point, the input key material is the
//! ECDH shared secret (handshake phase) or the master secret (session phase),
//! and every key gets its own info string, so no two keys in a run can
//! coincide and keys derived for different modes or directions never overlap.

use std::fmt;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::suite::ProtocolMode;

const KDF_PREFIX: &[u8] = b"link-session/kdf/v1";

const HANDSHAKE_CONTEXT: &[u8] = b"handshake";
const SESSION_CONTEXT: &[u8] = b"session";

const INFO_HANDSHAKE_I2R: &[u8] = b"handshake key initiator to responder";
const INFO_HANDSHAKE_R2I: &[u8] = b"handshake key responder to initiator";
const INFO_MASTER: &[u8] = b"master secret";

const INFO_SESSION_MAC_I2R: &[u8] = b"session mac key initiator to responder";
const INFO_SESSION_MAC_R2I: &[u8] = b"session mac key responder to initiator";
const INFO_SESSION_AEAD_I2R: &[u8] = b"session aead key initiator to responder";
const INFO_SESSION_AEAD_R2I: &[u8] = b"session aead key responder to initiator";

/// 256-bit secret key material.
///
/// Zeroized on drop and serializable, so snapshot records can carry it. The
/// `Debug` output is redacted.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Secret32([u8; 32]);

impl Secret32 {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; 32] {
        &mut self.0
    }
}

impl From<[u8; 32]> for Secret32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Secret32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret32(..)")
    }
}

/// Directional secrets protecting the two handshake records, plus the master
/// secret that session keys are later expanded from.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) struct HandshakeKeys {
    pub initiator_to_responder: Secret32,
    pub responder_to_initiator: Secret32,
    pub master: Secret32,
}

/// Directional session secrets, already assigned to this party's role.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub(crate) struct SessionKeys {
    pub outbound: Secret32,
    pub inbound: Secret32,
}

/// Expands `N` keys from `ikm`, salted with the prefix, a phase context and
/// the transcript hash at the derivation point.
fn derive<const N: usize>(
    ikm: &[u8],
    context: &[u8],
    transcript_hash: &[u8; 32],
    infos: [&[u8]; N],
) -> Result<[Secret32; N]> {
    let mut hasher = Sha256::new();
    hasher.update(KDF_PREFIX);
    hasher.update(context);
    hasher.update(transcript_hash);
    let salt = hasher.finalize();

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), ikm);
    let mut keys: [Secret32; N] = std::array::from_fn(|_| Secret32::default());
    for (key, info) in keys.iter_mut().zip(infos) {
        hkdf.expand(info, key.as_mut_bytes())
            .map_err(|_| Error::KeyDerivationFailure)?;
    }
    Ok(keys)
}

/// Derives the handshake keys from the ECDH shared secret and the hash of the
/// two hello records.
pub(crate) fn derive_handshake_keys(
    shared_secret: &[u8],
    hello_transcript_hash: &[u8; 32],
) -> Result<HandshakeKeys> {
    let [initiator_to_responder, responder_to_initiator, master] = derive(
        shared_secret,
        HANDSHAKE_CONTEXT,
        hello_transcript_hash,
        [INFO_HANDSHAKE_I2R, INFO_HANDSHAKE_R2I, INFO_MASTER],
    )?;
    Ok(HandshakeKeys {
        initiator_to_responder,
        responder_to_initiator,
        master,
    })
}

/// Expands the directional session keys for the confirmed mode and assigns
/// them to this party's role.
pub(crate) fn derive_session_keys(
    master: &Secret32,
    full_transcript_hash: &[u8; 32],
    mode: ProtocolMode,
    is_initiator: bool,
) -> Result<SessionKeys> {
    let infos = match mode {
        ProtocolMode::AuthenticationOnly => [INFO_SESSION_MAC_I2R, INFO_SESSION_MAC_R2I],
        ProtocolMode::AuthenticatedEncryption => [INFO_SESSION_AEAD_I2R, INFO_SESSION_AEAD_R2I],
    };
    let [initiator_to_responder, responder_to_initiator] = derive(
        master.as_bytes(),
        SESSION_CONTEXT,
        full_transcript_hash,
        infos,
    )?;

    // Assign encryption/decryption keys based on the role.
    if is_initiator {
        Ok(SessionKeys {
            outbound: initiator_to_responder,
            inbound: responder_to_initiator,
        })
    } else {
        Ok(SessionKeys {
            outbound: responder_to_initiator,
            inbound: initiator_to_responder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARED: &[u8] = b"0123456789abcdef0123456789abcdef";
    const HASH_A: [u8; 32] = [7u8; 32];
    const HASH_B: [u8; 32] = [8u8; 32];

    #[test]
    fn handshake_keys_are_deterministic() -> Result<()> {
        let first = derive_handshake_keys(SHARED, &HASH_A)?;
        let second = derive_handshake_keys(SHARED, &HASH_A)?;
        assert_eq!(
            first.initiator_to_responder.as_bytes(),
            second.initiator_to_responder.as_bytes()
        );
        assert_eq!(first.master.as_bytes(), second.master.as_bytes());
        Ok(())
    }

    #[test]
    fn directions_and_master_are_distinct() -> Result<()> {
        let keys = derive_handshake_keys(SHARED, &HASH_A)?;
        assert_ne!(
            keys.initiator_to_responder.as_bytes(),
            keys.responder_to_initiator.as_bytes()
        );
        assert_ne!(keys.initiator_to_responder.as_bytes(), keys.master.as_bytes());
        assert_ne!(keys.responder_to_initiator.as_bytes(), keys.master.as_bytes());
        Ok(())
    }

    #[test]
    fn transcript_hash_separates_keys() -> Result<()> {
        let first = derive_handshake_keys(SHARED, &HASH_A)?;
        let second = derive_handshake_keys(SHARED, &HASH_B)?;
        assert_ne!(
            first.initiator_to_responder.as_bytes(),
            second.initiator_to_responder.as_bytes()
        );
        Ok(())
    }

    #[test]
    fn session_keys_cross_over_between_roles() -> Result<()> {
        let master = Secret32::from([3u8; 32]);
        let initiator = derive_session_keys(&master, &HASH_A, ProtocolMode::AuthenticatedEncryption, true)?;
        let responder = derive_session_keys(&master, &HASH_A, ProtocolMode::AuthenticatedEncryption, false)?;
        assert_eq!(initiator.outbound.as_bytes(), responder.inbound.as_bytes());
        assert_eq!(initiator.inbound.as_bytes(), responder.outbound.as_bytes());
        assert_ne!(initiator.outbound.as_bytes(), initiator.inbound.as_bytes());
        Ok(())
    }

    #[test]
    fn modes_use_unrelated_keys() -> Result<()> {
        let master = Secret32::from([3u8; 32]);
        let mac = derive_session_keys(&master, &HASH_A, ProtocolMode::AuthenticationOnly, true)?;
        let aead = derive_session_keys(&master, &HASH_A, ProtocolMode::AuthenticatedEncryption, true)?;
        assert_ne!(mac.outbound.as_bytes(), aead.outbound.as_bytes());
        Ok(())
    }
}
