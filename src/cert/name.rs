//! X.500 distinguished names.
//!
//! Peers are identified by a small, fixed set of attribute types (CN, OU, O,
//! L, ST, C). Names compare as unordered multisets with case-insensitive
//! values, so `CN=node-1, O=Acme` and `o=acme, cn=NODE-1` identify the same
//! party. Anything outside the supported attribute set is rejected rather
//! than silently ignored.

use std::fmt;
use std::str::FromStr;

use x509_cert::der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
use x509_cert::der::oid::ObjectIdentifier;
use x509_cert::der::{Tag, Tagged};
use x509_cert::name::Name;

use crate::error::{Error, Result};

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const OID_LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const OID_STATE_OR_PROVINCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const OID_ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const OID_ORGANIZATIONAL_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AttributeKind {
    CommonName,
    OrganizationalUnit,
    Organization,
    Locality,
    StateOrProvince,
    Country,
}

impl AttributeKind {
    fn label(self) -> &'static str {
        match self {
            AttributeKind::CommonName => "CN",
            AttributeKind::OrganizationalUnit => "OU",
            AttributeKind::Organization => "O",
            AttributeKind::Locality => "L",
            AttributeKind::StateOrProvince => "ST",
            AttributeKind::Country => "C",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        let kind = match label.to_ascii_uppercase().as_str() {
            "CN" => AttributeKind::CommonName,
            "OU" => AttributeKind::OrganizationalUnit,
            "O" => AttributeKind::Organization,
            "L" => AttributeKind::Locality,
            "ST" => AttributeKind::StateOrProvince,
            "C" => AttributeKind::Country,
            _ => return None,
        };
        Some(kind)
    }

    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == OID_COMMON_NAME {
            Some(AttributeKind::CommonName)
        } else if *oid == OID_ORGANIZATIONAL_UNIT {
            Some(AttributeKind::OrganizationalUnit)
        } else if *oid == OID_ORGANIZATION {
            Some(AttributeKind::Organization)
        } else if *oid == OID_LOCALITY {
            Some(AttributeKind::Locality)
        } else if *oid == OID_STATE_OR_PROVINCE {
            Some(AttributeKind::StateOrProvince)
        } else if *oid == OID_COUNTRY {
            Some(AttributeKind::Country)
        } else {
            None
        }
    }
}

/// A parsed X.500 name, e.g. `CN=node-1, O=Acme Ledger, C=DE`.
#[derive(Debug, Clone)]
pub struct X500Name {
    attributes: Vec<(AttributeKind, String)>,
}

impl X500Name {
    /// Parses an RFC 4514 style string. Values may escape `,` and `\` with a
    /// backslash; other escapes and attribute types outside the supported set
    /// are rejected.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |reason: &'static str| Error::InvalidX500Name {
            name: name.to_string(),
            reason,
        };

        let mut attributes = Vec::new();
        for part in split_unescaped(name).map_err(invalid)? {
            let (label, value) = part
                .split_once('=')
                .ok_or_else(|| invalid("missing `=` separator"))?;
            let kind = AttributeKind::from_label(label.trim())
                .ok_or_else(|| invalid("unsupported attribute type"))?;
            let value = value.trim();
            if value.is_empty() {
                return Err(invalid("empty attribute value"));
            }
            attributes.push((kind, value.to_string()));
        }
        if attributes.is_empty() {
            return Err(invalid("empty name"));
        }
        Ok(X500Name { attributes })
    }

    /// Converts a certificate subject into an [`X500Name`], so it can be
    /// compared against the name the caller expects.
    pub(crate) fn from_der_name(name: &Name) -> std::result::Result<Self, &'static str> {
        let mut attributes = Vec::new();
        for rdn in &name.0 {
            if rdn.0.len() != 1 {
                return Err("multi-valued attributes are not supported");
            }
            for attribute in rdn.0.iter() {
                let kind = AttributeKind::from_oid(&attribute.oid)
                    .ok_or("unsupported attribute type")?;
                let value = match attribute.value.tag() {
                    Tag::PrintableString => PrintableStringRef::try_from(&attribute.value)
                        .ok()
                        .map(|s| s.as_str().to_string()),
                    Tag::Utf8String => Utf8StringRef::try_from(&attribute.value)
                        .ok()
                        .map(|s| s.as_str().to_string()),
                    Tag::Ia5String => Ia5StringRef::try_from(&attribute.value)
                        .ok()
                        .map(|s| s.as_str().to_string()),
                    _ => None,
                };
                let value = value.ok_or("unsupported attribute value encoding")?;
                attributes.push((kind, value));
            }
        }
        if attributes.is_empty() {
            return Err("empty name");
        }
        Ok(X500Name { attributes })
    }

    /// Whether two names identify the same party. Attribute order is
    /// irrelevant and values compare case-insensitively.
    pub fn matches(&self, other: &X500Name) -> bool {
        self.normalized() == other.normalized()
    }

    fn normalized(&self) -> Vec<(AttributeKind, String)> {
        let mut normalized: Vec<_> = self
            .attributes
            .iter()
            .map(|(kind, value)| (*kind, value.trim().to_lowercase()))
            .collect();
        normalized.sort();
        normalized
    }
}

impl PartialEq for X500Name {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for X500Name {}

impl fmt::Display for X500Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, (kind, value)) in self.attributes.iter().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            let escaped = value.replace('\\', "\\\\").replace(',', "\\,");
            write!(f, "{}={}", kind.label(), escaped)?;
        }
        Ok(())
    }
}

impl FromStr for X500Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        X500Name::parse(s)
    }
}

/// Splits on commas that are not preceded by a backslash, resolving `\,` and
/// `\\` escapes in the process.
fn split_unescaped(input: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ (',' | '\\')) => current.push(escaped),
                _ => return Err("unsupported escape sequence"),
            },
            ',' => {
                parts.push(std::mem::take(&mut current));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts.retain(|part| !part.trim().is_empty());
    Ok(parts)
}
