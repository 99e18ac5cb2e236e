//! Batched card-command engine: builds the verification/read batches for one
//! session and folds the card's answers into the result container.
//!
//! The batch order is a safety property: application select always comes
//! first, the blacklist check and the document-validity check run before any
//! requested verification or field read, so a revoked or expired document
//! short-circuits the rest of the session.

use std::io::Read;

use flate2::read::DeflateDecoder;
use serde_bytes::ByteBuf;
use tracing::{debug, error, warn};

use crate::definitions::attribute::AttributeKey;
use crate::definitions::container::{ResultContainer, SessionStatus};
use crate::definitions::helpers::tlv::Tlv;
use crate::definitions::message::{InputApdu, TransmitOutput, TransmitRequest};
use crate::definitions::outcome::ResultMinor;
use crate::definitions::value::{AttributeValue, RestrictedId, StructuredPlace};
use crate::session_input::BlacklistConnector;

use super::apdu::ResponseApdu;
use super::commands::{
    self, evaluate_read, evaluate_restricted_id, evaluate_select, evaluate_verify, ReadOutcome,
    VerifyOutcome, EID_APPLICATION_AID,
};
use super::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    CommandBatch,
    DataBatch,
    Done,
}

/// Card verifications, in the order they enter the command batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verification {
    Blacklist,
    DocumentValidity,
    Age,
    RestrictedIdentification,
    CommunityId,
}

/// One planned command of the outstanding batch, used to correlate the
/// response APDUs positionally.
#[derive(Debug, Clone, Copy)]
enum Planned {
    SelectApplication,
    Verify(Verification),
    SelectFile(AttributeKey),
    ReadField(AttributeKey),
}

pub(crate) struct TransmitEngine {
    state: BatchState,
    slot_handle: Vec<u8>,
    sector_public_key: Vec<u8>,
    verifications: Vec<Verification>,
    /// Data groups still to be read, after verification keys were pulled out.
    fields: Vec<AttributeKey>,
    plan: Vec<Planned>,
}

impl TransmitEngine {
    pub fn new(
        slot_handle: Vec<u8>,
        sector_public_key: Vec<u8>,
        requested: Vec<AttributeKey>,
    ) -> Self {
        let mut verifications = vec![Verification::Blacklist, Verification::DocumentValidity];
        if requested.contains(&AttributeKey::AgeVerification) {
            verifications.push(Verification::Age);
        }
        if requested.contains(&AttributeKey::RestrictedId) {
            verifications.push(Verification::RestrictedIdentification);
        }
        if requested.contains(&AttributeKey::MunicipalityIdVerification) {
            verifications.push(Verification::CommunityId);
        }
        // verification keys must not be read again as files
        let fields = requested
            .into_iter()
            .filter(|key| key.data_group().is_some())
            .collect();
        Self {
            state: BatchState::CommandBatch,
            slot_handle,
            sector_public_key,
            verifications,
            fields,
            plan: Vec::new(),
        }
    }

    pub fn done(&self) -> bool {
        self.state == BatchState::Done
    }

    /// Build the first batch: application select, then the verifications.
    pub fn start(&mut self) -> TransmitRequest {
        let mut plan = vec![Planned::SelectApplication];
        let mut apdus = vec![commands::select_application(&EID_APPLICATION_AID)];
        for verification in &self.verifications {
            plan.push(Planned::Verify(*verification));
            match verification {
                Verification::Blacklist => {
                    apdus.extend(commands::restricted_identification(
                        &self.sector_public_key,
                        false,
                    ));
                }
                Verification::DocumentValidity => apdus.push(commands::verify_document_validity()),
                Verification::Age => apdus.push(commands::verify_age()),
                Verification::RestrictedIdentification => {
                    apdus.extend(commands::restricted_identification(
                        &self.sector_public_key,
                        true,
                    ));
                }
                Verification::CommunityId => apdus.push(commands::verify_community_id()),
            }
        }
        self.plan = plan;
        self.request(apdus)
    }

    /// Process the responses for the outstanding batch and build the next
    /// request, if any. `Ok(None)` means the engine is finished; the caller
    /// checks [`TransmitEngine::done`].
    pub fn handle(
        &mut self,
        output: &TransmitOutput,
        container: &mut ResultContainer,
        blacklist: &dyn BlacklistConnector,
    ) -> Result<Option<TransmitRequest>, ProtocolError> {
        match self.state {
            BatchState::CommandBatch => self.handle_batch(output, container, blacklist, true),
            BatchState::DataBatch => self.handle_batch(output, container, blacklist, false),
            BatchState::Done => Ok(None),
        }
    }

    fn handle_batch(
        &mut self,
        output: &TransmitOutput,
        container: &mut ResultContainer,
        blacklist: &dyn BlacklistConnector,
        command_batch: bool,
    ) -> Result<Option<TransmitRequest>, ProtocolError> {
        let responses = parse_responses(output)?;
        let mut cursor = Cursor::new(&responses);
        let plan = std::mem::take(&mut self.plan);
        let mut skip_read: Option<AttributeKey> = None;

        for entry in plan {
            match entry {
                Planned::SelectApplication => {
                    if !evaluate_select(cursor.next(entry)?) {
                        return Err(ProtocolError::new(
                            ResultMinor::FileNotFound,
                            "select application failed",
                        ));
                    }
                    debug!("application selected");
                }
                Planned::Verify(verification) => {
                    if self.evaluate_verification(
                        verification,
                        &mut cursor,
                        entry,
                        container,
                        blacklist,
                    )? {
                        // revoked or expired: drop everything else
                        self.state = BatchState::Done;
                        return Ok(None);
                    }
                }
                Planned::SelectFile(key) => {
                    if !evaluate_select(cursor.next(entry)?) {
                        container.put(key, AttributeValue::NotOnChip);
                        debug!(%key, "could not select file");
                        skip_read = Some(key);
                    }
                }
                Planned::ReadField(key) => {
                    let response = cursor.next(entry)?;
                    if skip_read.take() == Some(key) {
                        continue;
                    }
                    read_field(key, response, container);
                }
            }
        }

        if command_batch {
            self.state = BatchState::DataBatch;
            if let Some(request) = self.build_data_batch() {
                return Ok(Some(request));
            }
            debug!("no data field to be read");
        }
        self.state = BatchState::Done;
        Ok(None)
    }

    /// Returns `true` when the session must stop (revoked/expired document).
    fn evaluate_verification(
        &self,
        verification: Verification,
        cursor: &mut Cursor<'_>,
        entry: Planned,
        container: &mut ResultContainer,
        blacklist: &dyn BlacklistConnector,
    ) -> Result<bool, ProtocolError> {
        match verification {
            Verification::Blacklist => {
                let mse = cursor.next(entry)?;
                let ga = cursor.next(entry)?;
                let (id1, _) = evaluate_restricted_id(&[mse, ga]).map_err(|e| {
                    ProtocolError::internal(format!(
                        "blocking identification verification failed: {e}"
                    ))
                })?;
                match blacklist.contains(&id1) {
                    Ok(true) => {
                        debug!("document found on blacklist");
                        container.clear_attributes();
                        container.set_status(SessionStatus::Revoked);
                        return Ok(true);
                    }
                    Ok(false) => debug!("document not on blacklist"),
                    // an unavailable list must not block every card
                    Err(e) => error!("blacklist lookup failed: {e}"),
                }
            }
            Verification::DocumentValidity => {
                match evaluate_verify(cursor.next(entry)?) {
                    VerifyOutcome::Satisfied(true) => {
                        container
                            .put(AttributeKey::DocumentValidity, AttributeValue::Flag(true));
                        container.set_status(SessionStatus::Valid);
                    }
                    VerifyOutcome::Satisfied(false) => {
                        error!("document validity negative");
                        container.clear_attributes();
                        container
                            .put(AttributeKey::DocumentValidity, AttributeValue::Flag(false));
                        container.set_status(SessionStatus::Expired);
                        return Ok(true);
                    }
                    VerifyOutcome::Failed(e) => {
                        return Err(ProtocolError::internal(format!(
                            "document validity failed: {e}"
                        )));
                    }
                }
            }
            Verification::Age => match evaluate_verify(cursor.next(entry)?) {
                VerifyOutcome::Satisfied(fulfilled) => {
                    container.put(AttributeKey::AgeVerification, AttributeValue::Flag(fulfilled));
                }
                VerifyOutcome::Failed(e) => {
                    return Err(ProtocolError::new(
                        ResultMinor::AgeVerificationFailed,
                        format!("the age verification process fails: {e}"),
                    ));
                }
            },
            Verification::RestrictedIdentification => {
                let mse = cursor.next(entry)?;
                let ga = cursor.next(entry)?;
                let (id1, id2) = evaluate_restricted_id(&[mse, ga]).map_err(|e| {
                    ProtocolError::internal(format!(
                        "restricted identification verification failed: {e}"
                    ))
                })?;
                container.put(
                    AttributeKey::RestrictedId,
                    AttributeValue::RestrictedId(RestrictedId::new(id1, id2)),
                );
            }
            Verification::CommunityId => match evaluate_verify(cursor.next(entry)?) {
                VerifyOutcome::Satisfied(member) => {
                    container.put(
                        AttributeKey::MunicipalityIdVerification,
                        AttributeValue::Flag(member),
                    );
                }
                VerifyOutcome::Failed(e) => {
                    return Err(ProtocolError::new(
                        ResultMinor::CommunityVerificationFailed,
                        format!("community affiliation process fails: {e}"),
                    ));
                }
            },
        }
        Ok(false)
    }

    fn build_data_batch(&mut self) -> Option<TransmitRequest> {
        let mut plan = Vec::new();
        let mut apdus = Vec::new();
        for key in &self.fields {
            let dg = key.data_group().expect("fields hold data groups only");
            debug!(%key, "create read for field");
            if dg.sfid != 0 {
                plan.push(Planned::ReadField(*key));
                apdus.push(commands::read_short_file(dg.sfid));
            } else {
                plan.push(Planned::SelectFile(*key));
                apdus.push(commands::select_file(dg.fid));
                plan.push(Planned::ReadField(*key));
                apdus.push(commands::read_selected());
            }
        }
        if apdus.is_empty() {
            return None;
        }
        self.plan = plan;
        Some(self.request(apdus))
    }

    fn request(&self, input_apdus: Vec<InputApdu>) -> TransmitRequest {
        TransmitRequest {
            slot_handle: ByteBuf::from(self.slot_handle.clone()),
            input_apdus,
        }
    }
}

struct Cursor<'a> {
    responses: &'a [ResponseApdu],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(responses: &'a [ResponseApdu]) -> Self {
        Self {
            responses,
            position: 0,
        }
    }

    fn next(&mut self, entry: Planned) -> Result<&'a ResponseApdu, ProtocolError> {
        let response = self.responses.get(self.position).ok_or_else(|| {
            ProtocolError::internal(format!("batch response missing for {entry:?}"))
        })?;
        self.position += 1;
        Ok(response)
    }
}

fn parse_responses(output: &TransmitOutput) -> Result<Vec<ResponseApdu>, ProtocolError> {
    output
        .response_apdus
        .iter()
        .map(|bytes| {
            ResponseApdu::from_bytes(bytes)
                .map_err(|e| ProtocolError::internal(format!("malformed response APDU: {e}")))
        })
        .collect()
}

fn read_field(key: AttributeKey, response: &ResponseApdu, container: &mut ResultContainer) {
    match evaluate_read(response) {
        ReadOutcome::NotOnChip => {
            debug!(%key, "file not on chip");
            container.put(key, AttributeValue::NotOnChip);
        }
        ReadOutcome::Failed(sw) => {
            // field-level failures never fail the session
            warn!(%key, status = %format!("{sw:04x}"), "could not read file");
        }
        ReadOutcome::Content(content) => {
            if content.is_empty() || content[0] == 0x00 {
                debug!(%key, "no result for file");
                return;
            }
            match decode_field(key, &content) {
                Ok(value) => {
                    debug!(%key, "field added to result container");
                    container.put(key, value);
                }
                Err(e) => error!(%key, "cannot decode file content: {e}"),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DecodeError {
    #[error("{0}")]
    Structure(#[from] crate::definitions::helpers::tlv::Error),
    #[error("unexpected address format")]
    AddressFormat,
    #[error("address element 0x{0:02x} is not optional and must be filled")]
    MissingAddressElement(u32),
    #[error("unexpected text format")]
    TextFormat,
}

const TAG_PLACE_FREE_TEXT: u32 = 0xa1;
const TAG_PLACE_NO_PLACE: u32 = 0xa2;
const TAG_PLACE_STRUCTURED: u32 = 0x30;
const TAG_ADDRESS_STREET: u32 = 0xaa;
const TAG_ADDRESS_CITY: u32 = 0xab;
const TAG_ADDRESS_STATE: u32 = 0xac;
const TAG_ADDRESS_COUNTRY: u32 = 0xad;
const TAG_ADDRESS_ZIP: u32 = 0xae;

/// Decode one data-group record into its attribute value. Reproduces the
/// deployed decoding exactly, including the inflated long-text fields
/// landing in the no-place variant.
fn decode_field(key: AttributeKey, content: &[u8]) -> Result<AttributeValue, DecodeError> {
    let record = Tlv::parse(content)?;

    if key.is_place() {
        let is_birth_place = key == AttributeKey::PlaceOfBirth;
        let place = record.inner()?;
        return match place.tag {
            TAG_PLACE_FREE_TEXT => Ok(AttributeValue::FreeTextPlace(utf8(&place.inner()?.value))),
            TAG_PLACE_NO_PLACE => Ok(AttributeValue::NumericPlace(utf8(&place.inner()?.value))),
            TAG_PLACE_STRUCTURED => {
                let street = address_element(&place, TAG_ADDRESS_STREET, is_birth_place)?;
                let city = address_element(&place, TAG_ADDRESS_CITY, is_birth_place)?;
                let state = address_element(&place, TAG_ADDRESS_STATE, is_birth_place)?;
                let country = address_element(&place, TAG_ADDRESS_COUNTRY, is_birth_place)?;
                let zip_code = address_element(&place, TAG_ADDRESS_ZIP, is_birth_place)?;
                Ok(AttributeValue::StructuredPlace(StructuredPlace {
                    street,
                    city,
                    state,
                    country,
                    zip_code,
                }))
            }
            _ => Err(DecodeError::AddressFormat),
        };
    }

    if key.is_long_text() {
        let text = record.inner()?;
        if text.tag == TAG_PLACE_FREE_TEXT {
            return Ok(AttributeValue::Text(utf8(&text.inner()?.value)));
        }
        if text.tag == TAG_PLACE_NO_PLACE {
            let compressed = text.inner()?.value;
            let mut inflated = Vec::new();
            DeflateDecoder::new(compressed.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|_| DecodeError::TextFormat)?;
            let unpacked = Tlv::parse(&inflated)?;
            return Ok(AttributeValue::NumericPlace(utf8(&unpacked.value)));
        }
        // anything else falls through to the generic string decoding
    }

    match key {
        AttributeKey::OptionalDataR => Ok(AttributeValue::Bytes(record.value)),
        AttributeKey::WrittenSignature | AttributeKey::MunicipalityId => {
            Ok(AttributeValue::Bytes(record.inner()?.value))
        }
        _ => Ok(AttributeValue::Text(utf8(&record.inner()?.value))),
    }
}

/// One element of a structured address. Street and state may be missing on
/// any card, everything else only in a place of birth.
fn address_element(
    place: &Tlv,
    tag: u32,
    is_birth_place: bool,
) -> Result<Option<String>, DecodeError> {
    match place.child(tag)? {
        Some(element) => Ok(Some(utf8(&element.inner()?.value))),
        None => {
            if is_birth_place || tag == TAG_ADDRESS_STATE || tag == TAG_ADDRESS_STREET {
                Ok(None)
            } else {
                Err(DecodeError::MissingAddressElement(tag))
            }
        }
    }
}

fn utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
