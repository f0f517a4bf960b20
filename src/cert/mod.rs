//! Certificate chain validation.
//!
//! A peer that presents a certificate chain is validated in five steps: parse
//! every PEM entry, walk the chain leaf-first verifying each signature and CA
//! bit, anchor the top of the chain in the configured trust roots, compare
//! the leaf subject against the expected X.500 name, and bind the leaf key to
//! the identity key the peer authenticated the handshake with. Revocation is
//! applied on top according to [`RevocationCheckMode`].
//!
//! All failures surface as [`Error::InvalidPeerCertificate`] carrying the
//! expected identity and a [`CertificateError`] reason.

use std::time::SystemTime;

use ed25519_dalek::Verifier;
use log::warn;
use serde::{Deserialize, Serialize};
use x509_cert::crl::CertificateList;
use x509_cert::der::asn1::BitString;
use x509_cert::der::oid::{AssociatedOid, ObjectIdentifier};
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::Certificate;

use crate::crypto::signing::IdentityKey;
use crate::error::{Error, Result};

mod name;
mod revocation;

pub use name::X500Name;
pub use revocation::RevocationCheckMode;

use revocation::RevocationStatus;

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// Peer authentication policy.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub enum CertificateCheckMode {
    /// The peer presents no chain; it is authenticated purely by an identity
    /// key pinned out of band.
    NoCertificate,
    /// The peer must present a chain anchored in `trusted_certificates`.
    Validate {
        /// PEM encoded trust roots.
        trusted_certificates: Vec<String>,
        revocation_mode: RevocationCheckMode,
        /// PEM encoded CRLs consulted during revocation checking.
        revocation_lists: Vec<String>,
    },
}

/// The reason a peer certificate chain was rejected.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("certificate chain is empty")]
    EmptyChain,

    #[error("certificate {index} could not be parsed: {reason}")]
    Parse { index: usize, reason: String },

    #[error("certificate {index} is not signed by the next certificate in the chain")]
    BrokenChain { index: usize },

    #[error("certificate {index} is not a certificate authority")]
    NotACertificateAuthority { index: usize },

    #[error("chain does not terminate at a configured trust root")]
    UntrustedAnchor,

    #[error("leaf subject is not a usable X.500 name: {0}")]
    MalformedSubject(&'static str),

    #[error("subject mismatch: expected `{expected}`, certificate carries `{actual}`")]
    NameMismatch { expected: String, actual: String },

    #[error("certificate {index} is outside its validity period")]
    OutsideValidity { index: usize },

    #[error("certificate {index} is revoked")]
    Revoked { index: usize },

    #[error("revocation status of certificate {index} could not be determined")]
    RevocationUndetermined { index: usize },

    #[error("leaf certificate key does not match the peer's identity key")]
    KeyMismatch,

    #[error("certificate {index} uses an unsupported signature algorithm")]
    UnsupportedAlgorithm { index: usize },
}

/// Validates peer certificate chains against a trust store and a revocation
/// policy. Read-only once constructed, so one validator can serve any number
/// of concurrent validations.
pub struct CertificateValidator {
    revocation_mode: RevocationCheckMode,
    trust_roots: Vec<Certificate>,
    revocation_lists: Vec<CertificateList>,
}

impl CertificateValidator {
    /// Parses the trust store and CRLs eagerly, so configuration defects
    /// surface at construction instead of mid-handshake.
    pub fn new(
        revocation_mode: RevocationCheckMode,
        trusted_certificates: &[String],
        revocation_lists: &[String],
    ) -> Result<Self> {
        let mut trust_roots = Vec::with_capacity(trusted_certificates.len());
        for (index, pem) in trusted_certificates.iter().enumerate() {
            let certificate = Certificate::from_pem(pem).map_err(|e| Error::InvalidTrustStore {
                index,
                reason: e.to_string(),
            })?;
            trust_roots.push(certificate);
        }
        let mut lists = Vec::with_capacity(revocation_lists.len());
        for (index, pem) in revocation_lists.iter().enumerate() {
            let list = revocation::parse_revocation_list(pem)
                .map_err(|reason| Error::InvalidRevocationList { index, reason })?;
            lists.push(list);
        }
        Ok(CertificateValidator {
            revocation_mode,
            trust_roots,
            revocation_lists: lists,
        })
    }

    /// Builds a validator from a [`CertificateCheckMode`], or `None` when the
    /// mode does not call for certificate validation.
    pub(crate) fn from_check_mode(mode: &CertificateCheckMode) -> Result<Option<Self>> {
        match mode {
            CertificateCheckMode::NoCertificate => Ok(None),
            CertificateCheckMode::Validate {
                trusted_certificates,
                revocation_mode,
                revocation_lists,
            } => Ok(Some(CertificateValidator::new(
                *revocation_mode,
                trusted_certificates,
                revocation_lists,
            )?)),
        }
    }

    /// Validates a leaf-first PEM chain: the leaf must be issued (directly or
    /// transitively) by a configured trust root, carry `expected_name` as its
    /// subject and `expected_key` as its public key, and no certificate may
    /// be revoked under the configured policy.
    pub fn validate(
        &self,
        chain_pem: &[String],
        expected_name: &X500Name,
        expected_key: &IdentityKey,
    ) -> Result<()> {
        self.check(chain_pem, expected_name, expected_key)
            .map_err(|reason| Error::InvalidPeerCertificate {
                identity: expected_name.to_string(),
                reason,
            })
    }

    fn check(
        &self,
        chain_pem: &[String],
        expected_name: &X500Name,
        expected_key: &IdentityKey,
    ) -> std::result::Result<(), CertificateError> {
        if chain_pem.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        let mut chain = Vec::with_capacity(chain_pem.len());
        for (index, pem) in chain_pem.iter().enumerate() {
            let certificate = Certificate::from_pem(pem).map_err(|e| CertificateError::Parse {
                index,
                reason: e.to_string(),
            })?;
            chain.push(certificate);
        }

        let now = SystemTime::now();
        for (index, certificate) in chain.iter().enumerate() {
            let validity = &certificate.tbs_certificate.validity;
            if validity.not_before.to_system_time() > now
                || validity.not_after.to_system_time() < now
            {
                return Err(CertificateError::OutsideValidity { index });
            }
        }

        // Leaf first: every certificate must be signed by the next one.
        for index in 0..chain.len() - 1 {
            let issuer = &chain[index + 1];
            if !is_certificate_authority(issuer) {
                return Err(CertificateError::NotACertificateAuthority { index: index + 1 });
            }
            if chain[index].tbs_certificate.issuer != issuer.tbs_certificate.subject {
                return Err(CertificateError::BrokenChain { index });
            }
            verify_link(&chain[index], issuer, index)?;
        }

        let top = chain.last().ok_or(CertificateError::EmptyChain)?;
        let anchor = self
            .trust_roots
            .iter()
            .find(|&root| {
                root == top
                    || (root.tbs_certificate.subject == top.tbs_certificate.issuer
                        && verify_link(top, root, chain.len() - 1).is_ok())
            })
            .ok_or(CertificateError::UntrustedAnchor)?;

        let leaf = &chain[0];
        let subject = X500Name::from_der_name(&leaf.tbs_certificate.subject)
            .map_err(CertificateError::MalformedSubject)?;
        if !subject.matches(expected_name) {
            return Err(CertificateError::NameMismatch {
                expected: expected_name.to_string(),
                actual: subject.to_string(),
            });
        }

        if !spki_matches_identity(&leaf.tbs_certificate.subject_public_key_info, expected_key) {
            return Err(CertificateError::KeyMismatch);
        }

        if self.revocation_mode != RevocationCheckMode::Off {
            for (index, certificate) in chain.iter().enumerate() {
                // Configured anchors are never themselves checked.
                if self.trust_roots.iter().any(|root| root == certificate) {
                    continue;
                }
                let issuer = chain.get(index + 1).unwrap_or(anchor);
                match revocation::status(certificate, issuer, &self.revocation_lists, now) {
                    RevocationStatus::Good => {}
                    RevocationStatus::Revoked => {
                        return Err(CertificateError::Revoked { index });
                    }
                    RevocationStatus::Undetermined => match self.revocation_mode {
                        RevocationCheckMode::HardFail => {
                            return Err(CertificateError::RevocationUndetermined { index });
                        }
                        RevocationCheckMode::SoftFail => {
                            warn!(
                                "revocation status of certificate {index} for `{expected_name}` \
                                 is undetermined, tolerated by soft-fail policy"
                            );
                        }
                        RevocationCheckMode::Off => {}
                    },
                }
            }
        }

        Ok(())
    }
}

pub(crate) enum VerifyFailure {
    Unsupported,
    Invalid,
}

/// Verifies an X.509 style signature (certificate or CRL) against the signer
/// key found in `signer`.
pub(crate) fn verify_signed(
    message: &[u8],
    algorithm: &AlgorithmIdentifierOwned,
    signature: &BitString,
    signer: &SubjectPublicKeyInfoOwned,
) -> std::result::Result<(), VerifyFailure> {
    let signature = signature.as_bytes().ok_or(VerifyFailure::Invalid)?;
    let key = signer.subject_public_key.as_bytes().ok_or(VerifyFailure::Invalid)?;
    if algorithm.oid == ECDSA_WITH_SHA256 {
        let verifying_key =
            p256::ecdsa::VerifyingKey::from_sec1_bytes(key).map_err(|_| VerifyFailure::Invalid)?;
        let signature =
            p256::ecdsa::Signature::from_der(signature).map_err(|_| VerifyFailure::Invalid)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| VerifyFailure::Invalid)
    } else if algorithm.oid == ID_ED25519 {
        let key: [u8; 32] = key.try_into().map_err(|_| VerifyFailure::Invalid)?;
        let verifying_key =
            ed25519_dalek::VerifyingKey::from_bytes(&key).map_err(|_| VerifyFailure::Invalid)?;
        let signature =
            ed25519_dalek::Signature::from_slice(signature).map_err(|_| VerifyFailure::Invalid)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| VerifyFailure::Invalid)
    } else {
        Err(VerifyFailure::Unsupported)
    }
}

fn verify_link(
    certificate: &Certificate,
    issuer: &Certificate,
    index: usize,
) -> std::result::Result<(), CertificateError> {
    let tbs = certificate
        .tbs_certificate
        .to_der()
        .map_err(|e| CertificateError::Parse {
            index,
            reason: e.to_string(),
        })?;
    verify_signed(
        &tbs,
        &certificate.signature_algorithm,
        &certificate.signature,
        &issuer.tbs_certificate.subject_public_key_info,
    )
    .map_err(|failure| match failure {
        VerifyFailure::Unsupported => CertificateError::UnsupportedAlgorithm { index },
        VerifyFailure::Invalid => CertificateError::BrokenChain { index },
    })
}

fn is_certificate_authority(certificate: &Certificate) -> bool {
    let Some(extensions) = certificate.tbs_certificate.extensions.as_ref() else {
        return false;
    };
    extensions.iter().any(|extension| {
        extension.extn_id == BasicConstraints::OID
            && BasicConstraints::from_der(extension.extn_value.as_bytes())
                .is_ok_and(|constraints| constraints.ca)
    })
}

/// Whether the leaf's subject public key info carries exactly the identity
/// key the peer authenticated with.
fn spki_matches_identity(spki: &SubjectPublicKeyInfoOwned, identity: &IdentityKey) -> bool {
    let Some(key) = spki.subject_public_key.as_bytes() else {
        return false;
    };
    match identity {
        IdentityKey::Ed25519 { public_key } => {
            spki.algorithm.oid == ID_ED25519 && key == public_key.as_slice()
        }
        IdentityKey::EcdsaP256 { public_key } => {
            let curve_ok = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|parameters| parameters.decode_as::<ObjectIdentifier>().ok())
                .is_some_and(|oid| oid == SECP256R1);
            spki.algorithm.oid == ID_EC_PUBLIC_KEY && curve_ok && key == public_key.as_slice()
        }
    }
}
