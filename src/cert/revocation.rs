//! Revocation status from locally supplied CRLs.
//!
//! The protocol performs no I/O, so revocation sources are handed in as PEM
//! encoded CRLs next to the trust roots. A CRL only counts for a certificate
//! when it names the certificate's issuer, carries a valid signature from
//! that issuer, and is current. Everything else leaves the status
//! undetermined, and the configured [`RevocationCheckMode`] decides whether
//! undetermined is tolerable.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use x509_cert::crl::CertificateList;
use x509_cert::der::{Decode, Document, Encode};
use x509_cert::Certificate;

use super::verify_signed;

/// Policy for certificates whose revocation status is positive or unknown.
#[derive(
    Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum RevocationCheckMode {
    /// Revoked and undetermined statuses are both fatal.
    HardFail,
    /// Revoked is fatal; undetermined is tolerated.
    SoftFail,
    /// No revocation checking at all.
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevocationStatus {
    Good,
    Revoked,
    Undetermined,
}

/// Parses a PEM encoded CRL.
pub(crate) fn parse_revocation_list(
    pem: &str,
) -> std::result::Result<CertificateList, String> {
    let (label, document) = Document::from_pem(pem).map_err(|e| e.to_string())?;
    if label != "X509 CRL" {
        return Err(format!("unexpected PEM label `{label}`"));
    }
    CertificateList::from_der(document.as_bytes()).map_err(|e| e.to_string())
}

/// Determines the revocation status of `certificate` against the CRLs its
/// `issuer` has signed.
pub(crate) fn status(
    certificate: &Certificate,
    issuer: &Certificate,
    revocation_lists: &[CertificateList],
    now: SystemTime,
) -> RevocationStatus {
    for crl in revocation_lists {
        if crl.tbs_cert_list.issuer != issuer.tbs_certificate.subject {
            continue;
        }
        if !crl_is_usable(crl, issuer, now) {
            continue;
        }
        let serial = &certificate.tbs_certificate.serial_number;
        let revoked = crl
            .tbs_cert_list
            .revoked_certificates
            .as_ref()
            .is_some_and(|entries| entries.iter().any(|entry| entry.serial_number == *serial));
        return if revoked {
            RevocationStatus::Revoked
        } else {
            RevocationStatus::Good
        };
    }
    RevocationStatus::Undetermined
}

/// A CRL is usable when its signature checks out against the issuer key and
/// its validity window covers `now`.
fn crl_is_usable(crl: &CertificateList, issuer: &Certificate, now: SystemTime) -> bool {
    let Ok(tbs) = crl.tbs_cert_list.to_der() else {
        return false;
    };
    if verify_signed(
        &tbs,
        &crl.signature_algorithm,
        &crl.signature,
        &issuer.tbs_certificate.subject_public_key_info,
    )
    .is_err()
    {
        return false;
    }
    if crl.tbs_cert_list.this_update.to_system_time() > now {
        return false;
    }
    if let Some(next_update) = crl.tbs_cert_list.next_update {
        if next_update.to_system_time() < now {
            return false;
        }
    }
    true
}
