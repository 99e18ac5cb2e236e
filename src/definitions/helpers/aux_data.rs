//! Authenticated auxiliary data sent with the first authenticate request.
//!
//! The card checks age, document validity and community affiliation against
//! reference values that the terminal must commit to up front. They are
//! wrapped in discretionary data templates inside an authentication object
//! (tags 0x67 / 0x73 / 0x06 / 0x53).

use sha2::{Digest, Sha256};
use time::Date;

use super::tlv::Tlv;

const TAG_AUTHENTICATION: u32 = 0x67;
const TAG_TEMPLATE: u32 = 0x73;
const TAG_OID: u32 = 0x06;
const TAG_DISCRETIONARY_DATA: u32 = 0x53;

// 0.4.0.127.0.7.3.1.4.{1,2,3,4}
const OID_AGE_VERIFICATION: [u8; 9] = [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x04, 0x01];
const OID_DOCUMENT_VALIDITY: [u8; 9] = [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x04, 0x02];
const OID_COMMUNITY_ID: [u8; 9] = [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x04, 0x03];
const OID_PS_MESSAGE: [u8; 9] = [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x04, 0x04];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("required age must be greater than zero")]
    InvalidAge,
    #[error("community id must be hex digits with an even length, got {0:?}")]
    InvalidCommunityId(String),
    #[error("no calendar date {0} years before {1}")]
    DateUnderflow(i32, Date),
}

/// Reference values for the on-card verifications of one session.
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryData {
    required_age: Option<i32>,
    community_id: Option<Vec<u8>>,
    ps_message_hash: Option<[u8; 32]>,
}

impl AuxiliaryData {
    pub fn new(
        required_age: Option<i32>,
        community_id: Option<&str>,
        ps_message: Option<&[u8]>,
    ) -> Result<Self, Error> {
        if let Some(age) = required_age {
            if age <= 0 {
                return Err(Error::InvalidAge);
            }
        }
        let community_id = community_id.map(parse_community_id).transpose()?;
        Ok(Self {
            required_age,
            community_id,
            // the signing algorithm on the card is unknown at this point, a
            // SHA-256 commitment is what every deployed generation accepts
            ps_message_hash: ps_message.map(|m| Sha256::digest(m).into()),
        })
    }

    /// Encode relative to `today`: the age reference date is `today` minus
    /// the required age in years, document validity is checked for `today`.
    pub fn encode(&self, today: Date) -> Result<Vec<u8>, Error> {
        let mut templates = Vec::new();
        if let Some(age) = self.required_age {
            let reference = birthday_reference(today, age)
                .ok_or(Error::DateUnderflow(age, today))?;
            templates.push(template(&OID_AGE_VERIFICATION, &date_digits(reference)));
        }
        templates.push(template(&OID_DOCUMENT_VALIDITY, &date_digits(today)));
        if let Some(community) = &self.community_id {
            templates.push(template(&OID_COMMUNITY_ID, community));
        }
        if let Some(hash) = &self.ps_message_hash {
            templates.push(template(&OID_PS_MESSAGE, hash));
        }
        Ok(Tlv::constructed(TAG_AUTHENTICATION, &templates).encoded())
    }
}

fn template(oid: &[u8], data: &[u8]) -> Tlv {
    Tlv::constructed(
        TAG_TEMPLATE,
        &[
            Tlv::new(TAG_OID, oid.to_vec()),
            Tlv::new(TAG_DISCRETIONARY_DATA, data.to_vec()),
        ],
    )
}

fn date_digits(date: Date) -> Vec<u8> {
    format!(
        "{:04}{:02}{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    )
    .into_bytes()
}

fn birthday_reference(today: Date, age: i32) -> Option<Date> {
    let target_year = today.year() - age;
    Date::from_calendar_date(target_year, today.month(), today.day())
        // Feb 29 with no leap-year counterpart
        .or_else(|_| Date::from_calendar_date(target_year, today.month(), today.day() - 1))
        .ok()
}

/// Community IDs arrive as hex strings like `"02 76 03 01 10 00 00"`.
fn parse_community_id(id: &str) -> Result<Vec<u8>, Error> {
    let compact: String = id.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() % 2 != 0 || compact.is_empty() {
        return Err(Error::InvalidCommunityId(id.to_string()));
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&compact[i..i + 2], 16)
                .map_err(|_| Error::InvalidCommunityId(id.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::date;

    #[test]
    fn validity_template_always_present() {
        let aux = AuxiliaryData::new(None, None, None).unwrap();
        let encoded = aux.encode(date!(2024 - 05 - 17)).unwrap();
        let auth = Tlv::parse(&encoded).unwrap();
        assert_eq!(auth.tag, 0x67);
        let templates = auth.children().unwrap();
        assert_eq!(templates.len(), 1);
        let oid = templates[0].require_child(0x06).unwrap();
        assert_eq!(oid.value, OID_DOCUMENT_VALIDITY);
        let value = templates[0].require_child(0x53).unwrap();
        assert_eq!(value.value, b"20240517");
    }

    #[test]
    fn age_reference_is_birthday_years_back() {
        let aux = AuxiliaryData::new(Some(18), None, None).unwrap();
        let encoded = aux.encode(date!(2024 - 05 - 17)).unwrap();
        let auth = Tlv::parse(&encoded).unwrap();
        let templates = auth.children().unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].require_child(0x06).unwrap().value, OID_AGE_VERIFICATION);
        assert_eq!(templates[0].require_child(0x53).unwrap().value, b"20060517");
    }

    #[test]
    fn community_id_parsed_from_hex() {
        let aux = AuxiliaryData::new(None, Some("02 76 03 01"), None).unwrap();
        let encoded = aux.encode(date!(2024 - 01 - 02)).unwrap();
        let auth = Tlv::parse(&encoded).unwrap();
        let community = auth
            .children()
            .unwrap()
            .into_iter()
            .find(|t| {
                t.require_child(0x06)
                    .map(|o| o.value == OID_COMMUNITY_ID)
                    .unwrap_or(false)
            })
            .unwrap();
        assert_eq!(
            community.require_child(0x53).unwrap().value,
            vec![0x02, 0x76, 0x03, 0x01]
        );
    }

    #[test]
    fn zero_age_rejected() {
        assert!(AuxiliaryData::new(Some(0), None, None).is_err());
        assert!(AuxiliaryData::new(None, Some("0x?!"), None).is_err());
    }
}
