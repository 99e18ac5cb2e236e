//! The closed set of identity attributes a card can expose.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Card file coordinates of a data group: the file identifier used with an
/// explicit select, and the short file identifier usable directly in a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGroup {
    pub fid: u16,
    pub sfid: u8,
}

impl DataGroup {
    const fn new(fid: u16, sfid: u8) -> Self {
        Self { fid, sfid }
    }
}

/// Every attribute the engine can request from or derive for a card.
///
/// Stable identity used as the result-map key. Data-group keys address a
/// file on the card; the remaining keys are produced by verification
/// commands during transmit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum AttributeKey {
    DocumentType,
    IssuingState,
    DateOfExpiry,
    GivenNames,
    FamilyNames,
    NomDePlume,
    AcademicTitle,
    DateOfBirth,
    PlaceOfBirth,
    Nationality,
    Sex,
    OptionalDataR,
    BirthName,
    WrittenSignature,
    DateOfIssuance,
    PlaceOfResidence,
    MunicipalityId,
    ResidencePermitI,
    ResidencePermitII,
    PhoneNumber,
    EmailAddress,
    /// Boolean result of the on-card age comparison.
    AgeVerification,
    /// Boolean result of the on-card community-id comparison.
    MunicipalityIdVerification,
    /// Boolean result of the on-card document validity check.
    DocumentValidity,
    /// Sector-specific pseudonymous identifier pair.
    RestrictedId,
    PseudonymousSignatureAuth,
    PseudonymousSignatureCredentials,
    PseudonymousSignatureMessage,
}

impl AttributeKey {
    /// File coordinates for keys stored as a data group, `None` for keys
    /// produced by verification commands.
    pub fn data_group(&self) -> Option<DataGroup> {
        use AttributeKey::*;
        let dg = match self {
            DocumentType => DataGroup::new(0x0101, 0x01),
            IssuingState => DataGroup::new(0x0102, 0x02),
            DateOfExpiry => DataGroup::new(0x0103, 0x03),
            GivenNames => DataGroup::new(0x0104, 0x04),
            FamilyNames => DataGroup::new(0x0105, 0x05),
            NomDePlume => DataGroup::new(0x0106, 0x06),
            AcademicTitle => DataGroup::new(0x0107, 0x07),
            DateOfBirth => DataGroup::new(0x0108, 0x08),
            PlaceOfBirth => DataGroup::new(0x0109, 0x09),
            Nationality => DataGroup::new(0x010a, 0x0a),
            Sex => DataGroup::new(0x010b, 0x0b),
            OptionalDataR => DataGroup::new(0x010c, 0x0c),
            BirthName => DataGroup::new(0x010d, 0x0d),
            WrittenSignature => DataGroup::new(0x010e, 0x0e),
            DateOfIssuance => DataGroup::new(0x010f, 0x0f),
            PlaceOfResidence => DataGroup::new(0x0111, 0x11),
            MunicipalityId => DataGroup::new(0x0112, 0x12),
            ResidencePermitI => DataGroup::new(0x0113, 0x13),
            ResidencePermitII => DataGroup::new(0x0114, 0x14),
            PhoneNumber => DataGroup::new(0x0115, 0x15),
            EmailAddress => DataGroup::new(0x0116, 0x16),
            _ => return None,
        };
        Some(dg)
    }

    /// Keys answered by a card verification command rather than a file read.
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            AttributeKey::AgeVerification
                | AttributeKey::MunicipalityIdVerification
                | AttributeKey::DocumentValidity
                | AttributeKey::RestrictedId
                | AttributeKey::PseudonymousSignatureAuth
                | AttributeKey::PseudonymousSignatureCredentials
                | AttributeKey::PseudonymousSignatureMessage
        )
    }

    /// Place fields carry the address structure instead of a simple string.
    pub fn is_place(&self) -> bool {
        matches!(
            self,
            AttributeKey::PlaceOfBirth | AttributeKey::PlaceOfResidence
        )
    }

    /// Long-text fields that may arrive DEFLATE-compressed.
    pub fn is_long_text(&self) -> bool {
        matches!(
            self,
            AttributeKey::ResidencePermitI | AttributeKey::ResidencePermitII
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn data_group_coordinates_are_consistent() {
        for key in AttributeKey::iter() {
            if let Some(dg) = key.data_group() {
                // every data group FID is 0x01XX with the SFID as low byte
                assert_eq!(dg.fid >> 8, 0x01, "{key}");
                assert_eq!((dg.fid & 0xff) as u8, dg.sfid, "{key}");
            } else {
                assert!(key.is_verification(), "{key}");
            }
        }
    }

    #[test]
    fn place_and_text_classes_are_data_groups() {
        assert!(AttributeKey::PlaceOfBirth.is_place());
        assert!(AttributeKey::ResidencePermitII.is_long_text());
        assert!(!AttributeKey::GivenNames.is_place());
        assert!(AttributeKey::PlaceOfResidence.data_group().is_some());
    }
}
