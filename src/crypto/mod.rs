//! Cryptographic primitives backing the handshake and the sessions.

pub mod agreement;
pub mod cipher;
pub mod kdf;
pub mod signing;
