//! Defect list handling.
//!
//! A defect list flags known-bad issuance batches. Entries identify the
//! affected document signer by the SHA-256 digest of its certificate and
//! carry one defect-type OID per known problem (ICAO defect OID arc
//! 2.23.136.1.1.5.<category>.<type>).

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::definitions::helpers::tlv::{self, Tlv};
use crate::definitions::outcome::{Outcome, ResultMinor};

const TAG_SEQUENCE: u32 = 0x30;
const TAG_SET: u32 = 0x31;
const TAG_OCTET_STRING: u32 = 0x04;
const TAG_OID: u32 = 0x06;

// 2.23.136.1.1.5
const OID_DEFECT_LIST: [u8; 6] = [0x67, 0x81, 0x08, 0x01, 0x01, 0x05];

/// The defect kinds this engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectType {
    /// The document signer's private key is compromised.
    CertRevoked,
    /// The document signer certificate cannot be trusted as issued.
    CertReplaced,
    /// Chip authentication private keys have been compromised.
    ChipAuthKeyRevoked,
    /// Active authentication private keys have been compromised.
    ActiveAuthKeyRevoked,
    /// Integrity of unsigned data groups is not guaranteed.
    EidIntegrity,
    /// Data groups may be incorrectly encoded.
    EidDgMalformed,
    /// EF.CardSecurity is malformed on the affected cards.
    CardSecurityMalformed,
    /// EF.ChipSecurity is malformed on the affected cards.
    ChipSecurityMalformed,
    /// Card must be powered down after a single authentication.
    PowerDownRequired,
}

impl DefectType {
    /// (category, type) below the defect-list arc.
    fn arc(&self) -> (u8, u8) {
        match self {
            DefectType::CertRevoked => (1, 1),
            DefectType::CertReplaced => (1, 2),
            DefectType::ChipAuthKeyRevoked => (1, 3),
            DefectType::ActiveAuthKeyRevoked => (1, 4),
            DefectType::EidDgMalformed => (3, 1),
            DefectType::EidIntegrity => (3, 2),
            DefectType::CardSecurityMalformed => (4, 1),
            DefectType::ChipSecurityMalformed => (4, 2),
            DefectType::PowerDownRequired => (4, 3),
        }
    }

    pub fn oid(&self) -> Vec<u8> {
        let (category, id) = self.arc();
        let mut oid = OID_DEFECT_LIST.to_vec();
        oid.push(category);
        oid.push(id);
        oid
    }

    pub fn from_oid(oid: &[u8]) -> Option<Self> {
        [
            DefectType::CertRevoked,
            DefectType::CertReplaced,
            DefectType::ChipAuthKeyRevoked,
            DefectType::ActiveAuthKeyRevoked,
            DefectType::EidDgMalformed,
            DefectType::EidIntegrity,
            DefectType::CardSecurityMalformed,
            DefectType::ChipSecurityMalformed,
            DefectType::PowerDownRequired,
        ]
        .into_iter()
        .find(|t| t.oid() == oid)
    }

    /// Outcome reported when this defect stops a session.
    pub fn outcome(&self) -> Outcome {
        match self {
            DefectType::CertRevoked | DefectType::CertReplaced => Outcome::error(
                ResultMinor::SecurityConditionNotSatisfied,
                format!("card affected by defect: {self:?}"),
            ),
            _ => Outcome::error(
                ResultMinor::InternalError,
                format!("card data blocked by defect: {self:?}"),
            ),
        }
    }
}

struct Defect {
    signer_digest: Vec<u8>,
    types: Vec<DefectType>,
}

/// Parsed defect list, queried with the document signer certificate that
/// signed the card's chip security object.
#[derive(Default)]
pub struct DefectList {
    defects: Vec<Defect>,
}

impl DefectList {
    /// Parse a defect list. Unknown defect-type OIDs are logged and skipped
    /// so one new defect category cannot invalidate the whole feed.
    pub fn parse(data: &[u8]) -> Result<Self, tlv::Error> {
        let outer = Tlv::parse(data)?;
        let mut defects = Vec::new();
        for entry in outer.children()? {
            if entry.tag != TAG_SEQUENCE {
                continue;
            }
            let signer_digest = entry.require_child(TAG_OCTET_STRING)?.value;
            let mut types = Vec::new();
            if let Some(set) = entry.child(TAG_SET)? {
                for oid in set.children()? {
                    if oid.tag != TAG_OID {
                        continue;
                    }
                    match DefectType::from_oid(&oid.value) {
                        Some(t) => types.push(t),
                        None => warn!(oid = ?oid.value, "unknown defect type, skipping"),
                    }
                }
            }
            defects.push(Defect {
                signer_digest,
                types,
            });
        }
        Ok(Self { defects })
    }

    pub fn len(&self) -> usize {
        self.defects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defects.is_empty()
    }

    /// Is the given document signer certificate affected by `defect`?
    pub fn affects(&self, signer_certificate: &[u8], defect: DefectType) -> bool {
        let digest = Sha256::digest(signer_certificate);
        self.defects
            .iter()
            .filter(|d| d.signer_digest == digest.as_slice())
            .any(|d| d.types.contains(&defect))
    }
}

/// Encode a defect list (used by tests and the trust-material tooling).
pub fn encode_defect_list(entries: &[(&[u8], &[DefectType])]) -> Vec<u8> {
    let defects: Vec<Tlv> = entries
        .iter()
        .map(|(signer_cert, types)| {
            let digest = Sha256::digest(signer_cert);
            let oids: Vec<Tlv> = types.iter().map(|t| Tlv::new(TAG_OID, t.oid())).collect();
            Tlv::constructed(
                TAG_SEQUENCE,
                &[
                    Tlv::new(TAG_OCTET_STRING, digest.to_vec()),
                    Tlv::constructed(TAG_SET, &oids),
                ],
            )
        })
        .collect();
    Tlv::constructed(TAG_SEQUENCE, &defects).encoded()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn oid_roundtrip() {
        for t in [
            DefectType::CertRevoked,
            DefectType::ChipAuthKeyRevoked,
            DefectType::EidIntegrity,
            DefectType::PowerDownRequired,
        ] {
            assert_eq!(DefectType::from_oid(&t.oid()), Some(t));
        }
        assert_eq!(DefectType::from_oid(&[0x01]), None);
    }

    #[test]
    fn lookup_by_signer() {
        let signer = b"dummy signer certificate";
        let other = b"another certificate";
        let encoded = encode_defect_list(&[(
            signer,
            &[DefectType::CertRevoked, DefectType::PowerDownRequired],
        )]);
        let list = DefectList::parse(&encoded).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.affects(signer, DefectType::CertRevoked));
        assert!(list.affects(signer, DefectType::PowerDownRequired));
        assert!(!list.affects(signer, DefectType::EidIntegrity));
        assert!(!list.affects(other, DefectType::CertRevoked));
    }

    #[test]
    fn revoked_signer_outcome_is_security_condition() {
        let outcome = DefectType::CertRevoked.outcome();
        assert_eq!(
            outcome.minor,
            Some(ResultMinor::SecurityConditionNotSatisfied)
        );
        let outcome = DefectType::EidIntegrity.outcome();
        assert_eq!(outcome.minor, Some(ResultMinor::InternalError));
    }
}
