//! Decoded attribute values.
//!
//! Every variant is immutable once constructed. Equality is structural,
//! with one deliberate exception: an absent second restricted identifier and
//! an empty one compare equal, since the card encodes "not present" both
//! ways.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value decoded from the card for one [`AttributeKey`].
///
/// [`AttributeKey`]: super::attribute::AttributeKey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Simple UTF-8 field content.
    Text(String),
    /// Raw binary field content (portrait, written signature, optional data).
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Result of an on-card verification.
    Flag(bool),
    /// Free-text place of birth or residence.
    FreeTextPlace(String),
    /// "No place" marker text, also used for inflated long-text fields.
    NumericPlace(String),
    /// Fully structured address.
    StructuredPlace(StructuredPlace),
    /// Sector-specific identifier pair.
    RestrictedId(RestrictedId),
    /// Pseudonymous signature with its verification context.
    PseudonymousSignature(PseudonymousSignature),
    /// The card does not carry this data group.
    NotOnChip,
    /// Requested but removed from the effective rights by the card holder.
    Deselected,
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Bytes(b) => write!(f, "{} bytes", b.len()),
            AttributeValue::Flag(v) => write!(f, "{v}"),
            AttributeValue::FreeTextPlace(s) => f.write_str(s),
            AttributeValue::NumericPlace(s) => f.write_str(s),
            AttributeValue::StructuredPlace(p) => write!(f, "{p}"),
            AttributeValue::RestrictedId(r) => write!(f, "{r}"),
            AttributeValue::PseudonymousSignature(p) => write!(f, "{p}"),
            AttributeValue::NotOnChip => f.write_str("not on chip"),
            AttributeValue::Deselected => f.write_str("deselected"),
        }
    }
}

/// Street-level address as stored in a structured general place.
///
/// Street and state are optional on any card; city, country and zip may only
/// be missing in a place of birth (the decoder enforces this).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredPlace {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
}

impl fmt::Display for StructuredPlace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |v: &Option<String>| v.clone().unwrap_or_default();
        write!(
            f,
            "{};{};{};{};{}",
            part(&self.country),
            part(&self.state),
            part(&self.zip_code),
            part(&self.city),
            part(&self.street)
        )
    }
}

/// Sector-specific identifier pair returned by restricted identification.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct RestrictedId {
    #[serde(with = "serde_bytes")]
    pub id1: Vec<u8>,
    #[serde(default)]
    pub id2: Option<serde_bytes::ByteBuf>,
}

impl RestrictedId {
    pub fn new(id1: Vec<u8>, id2: Option<Vec<u8>>) -> Self {
        Self {
            id1,
            id2: id2.map(serde_bytes::ByteBuf::from),
        }
    }

    fn id2_bytes(&self) -> &[u8] {
        self.id2.as_deref().map_or(&[][..], |v| v.as_slice())
    }
}

impl PartialEq for RestrictedId {
    fn eq(&self, other: &Self) -> bool {
        // absent and empty second identifiers are the same thing on the card
        self.id1 == other.id1 && self.id2_bytes() == other.id2_bytes()
    }
}

impl fmt::Display for RestrictedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id1: {}", hex_of(&self.id1))?;
        if let Some(id2) = &self.id2 {
            write!(f, ", id2: {}", hex_of(id2))?;
        }
        Ok(())
    }
}

/// Pseudonymous signature result together with the public material needed to
/// check it again later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudonymousSignature {
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(default)]
    pub message: Option<serde_bytes::ByteBuf>,
    #[serde(with = "serde_bytes")]
    pub domain_parameters: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub pk_m: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub pk_icc: Vec<u8>,
    #[serde(default)]
    pub pk_sector: Option<serde_bytes::ByteBuf>,
    #[serde(with = "serde_bytes")]
    pub protocol_id: Vec<u8>,
    /// `None` when the signature kind cannot be checked server-side.
    pub verified: Option<bool>,
}

impl fmt::Display for PseudonymousSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "signature: {}, verified: {}",
            hex_of(&self.signature),
            match self.verified {
                Some(v) => v.to_string(),
                None => "unchecked".to_string(),
            }
        )
    }
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
