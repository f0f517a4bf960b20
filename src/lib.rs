pub mod cert;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod session;
pub mod suite;

pub use cert::{CertificateCheckMode, CertificateValidator, RevocationCheckMode, X500Name};
pub use crypto::signing::IdentityKey;
pub use error::{Error, Result};
pub use handshake::{
    AuthenticationProtocolInitiator, AuthenticationProtocolResponder, SignatureResult,
};
pub use session::{AuthenticatedEncryptionSession, AuthenticatedSession, Session};
pub use suite::{ProtocolMode, ProtocolSuite};
