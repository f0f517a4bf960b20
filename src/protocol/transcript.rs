//! The running handshake transcript.
//!
//! Centralizes how records are absorbed and hashed, ensuring consistency
//! between initiator and responder. Each record is length-framed before being
//! appended, so the digest commits to record boundaries as well as content.
//! The raw byte sequence is kept rather than a digest state: instances must
//! be able to snapshot after any step, and a digest state does not serialize.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::protocol::message;

#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Default, PartialEq,
)]
pub(crate) struct Transcript {
    buffer: Vec<u8>,
}

impl Transcript {
    /// Creates a new, empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record's encoded bytes, length-framed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer
            .extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.buffer.extend_from_slice(bytes);
    }

    /// Serializes `record` and appends it.
    pub fn append_record<T: bincode::Encode>(&mut self, record: &T) -> Result<()> {
        let bytes = message::encode(record)?;
        self.append(&bytes);
        Ok(())
    }

    /// Returns the hash over everything absorbed so far, for operations like
    /// signing, without consuming the transcript.
    pub fn current_hash(&self) -> [u8; 32] {
        Sha256::digest(&self.buffer).into()
    }
}
