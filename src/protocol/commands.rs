//! Construction and evaluation of the card commands used during transmit.
//!
//! Each helper returns the command APDUs for one logical card function; the
//! matching `evaluate_*` function interprets the response APDUs at the
//! positions the batch engine tracked for it.

use crate::definitions::helpers::tlv::Tlv;
use crate::definitions::message::InputApdu;

use super::apdu::{status, CommandApdu, ResponseApdu};

/// eID application identifier.
pub const EID_APPLICATION_AID: [u8; 9] = [0xe8, 0x07, 0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x02];

// 0.4.0.127.0.7.3.1.4.{1,2,3}
pub(crate) const OID_AGE_VERIFICATION: [u8; 9] =
    [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x04, 0x01];
pub(crate) const OID_DOCUMENT_VALIDITY: [u8; 9] =
    [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x04, 0x02];
pub(crate) const OID_COMMUNITY_ID: [u8; 9] =
    [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x04, 0x03];
// 0.4.0.127.0.7.2.2.5.2.3 (id-RI-ECDH-SHA-256)
const OID_RI_ECDH_SHA256: [u8; 10] = [0x04, 0x00, 0x7f, 0x00, 0x07, 0x02, 0x02, 0x05, 0x02, 0x03];

const TAG_DYNAMIC_AUTHENTICATION_DATA: u32 = 0x7c;
const TAG_RI_FIRST_KEY: u32 = 0xa0;
const TAG_RI_FIRST_ID: u32 = 0x81;
const TAG_RI_SECOND_ID: u32 = 0x83;

/// Maximum read length, encoded as extended Le.
const READ_ALL: u32 = 65536;

pub fn select_application(aid: &[u8]) -> InputApdu {
    InputApdu::new(
        CommandApdu::new(0x00, 0xa4, 0x04, 0x0c)
            .with_data(aid.to_vec())
            .to_bytes(),
    )
}

pub fn select_file(fid: u16) -> InputApdu {
    InputApdu::new(
        CommandApdu::new(0x00, 0xa4, 0x02, 0x0c)
            .with_data(fid.to_be_bytes().to_vec())
            .to_bytes(),
    )
}

/// Read the currently selected file from the start.
pub fn read_selected() -> InputApdu {
    InputApdu::new(
        CommandApdu::new(0x00, 0xb0, 0x00, 0x00)
            .expect(READ_ALL)
            .to_bytes(),
    )
}

/// Read a file addressed by its short file identifier.
pub fn read_short_file(sfid: u8) -> InputApdu {
    InputApdu::new(
        CommandApdu::new(0x00, 0xb0, sfid | 0x80, 0x00)
            .expect(READ_ALL)
            .to_bytes(),
    )
}

/// VERIFY against previously transmitted auxiliary data.
fn verify_auxiliary(oid: &[u8]) -> InputApdu {
    let reference = Tlv::new(0x06, oid.to_vec());
    InputApdu::new(
        CommandApdu::new(0x80, 0x20, 0x80, 0x00)
            .with_data(reference.encoded())
            .to_bytes(),
    )
}

pub fn verify_age() -> InputApdu {
    verify_auxiliary(&OID_AGE_VERIFICATION)
}

pub fn verify_document_validity() -> InputApdu {
    verify_auxiliary(&OID_DOCUMENT_VALIDITY)
}

pub fn verify_community_id() -> InputApdu {
    verify_auxiliary(&OID_COMMUNITY_ID)
}

/// Restricted identification: MSE:Set AT selecting the protocol and key,
/// then General Authenticate carrying the sector public key. Key reference
/// 1 is the unauthorized (blocking) key, 2 the authorized one.
pub fn restricted_identification(sector_public_key: &[u8], authorized_only: bool) -> Vec<InputApdu> {
    let key_reference = if authorized_only { 0x02 } else { 0x01 };
    let mut mse_data = Tlv::new(0x80, OID_RI_ECDH_SHA256.to_vec()).encoded();
    mse_data.extend_from_slice(&Tlv::new(0x84, vec![key_reference]).encoded());
    let mse = InputApdu::new(
        CommandApdu::new(0x00, 0x22, 0x41, 0xa4)
            .with_data(mse_data)
            .to_bytes(),
    );

    let ga_data = Tlv::constructed(
        TAG_DYNAMIC_AUTHENTICATION_DATA,
        &[Tlv::new(TAG_RI_FIRST_KEY, sector_public_key.to_vec())],
    );
    let ga = InputApdu::new(
        CommandApdu::new(0x00, 0x86, 0x00, 0x00)
            .with_data(ga_data.encoded())
            // SHA-256 sector identifier plus TLV framing
            .expect(0x24)
            .to_bytes(),
    );

    vec![mse, ga]
}

/// Result of a file read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Content(Vec<u8>),
    NotOnChip,
    Failed(u16),
}

pub fn evaluate_select(response: &ResponseApdu) -> bool {
    response.status() == status::OK
}

pub fn evaluate_read(response: &ResponseApdu) -> ReadOutcome {
    match response.status() {
        status::OK | status::EOF_READ => ReadOutcome::Content(response.data().to_vec()),
        status::FILE_NOT_FOUND | status::COMMAND_NOT_ALLOWED => ReadOutcome::NotOnChip,
        other => ReadOutcome::Failed(other),
    }
}

/// Result of an on-card validity verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Satisfied(bool),
    Failed(String),
}

pub fn evaluate_verify(response: &ResponseApdu) -> VerifyOutcome {
    match response.status() {
        status::OK => VerifyOutcome::Satisfied(true),
        status::REFERENCED_DATA_NOT_FOUND => {
            VerifyOutcome::Failed("referenced data not found".to_string())
        }
        status::SECURITY_STATUS_NOT_SATISFIED => {
            VerifyOutcome::Failed("terminal not authorized to perform verification".to_string())
        }
        _ => VerifyOutcome::Satisfied(false),
    }
}

/// Identifier pair from the two restricted-identification responses.
pub fn evaluate_restricted_id(
    responses: &[&ResponseApdu],
) -> Result<(Vec<u8>, Option<Vec<u8>>), String> {
    let mut first = None;
    let mut second = None;
    for response in responses {
        if !response.is_ok() {
            return Err(format!(
                "restricted identification status {:04x}",
                response.status()
            ));
        }
        if response.data().is_empty() {
            continue;
        }
        let wrapper = Tlv::parse(response.data())
            .map_err(|e| format!("restricted identification response: {e}"))?;
        if let Ok(Some(id)) = wrapper.child(TAG_RI_FIRST_ID) {
            first = Some(id.value);
        }
        if let Ok(Some(id)) = wrapper.child(TAG_RI_SECOND_ID) {
            second = Some(id.value);
        }
    }
    first
        .map(|id1| (id1, second))
        .ok_or_else(|| "result contains no identifier to use".to_string())
}
