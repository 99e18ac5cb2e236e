//! The top-level EAC session state machine.
//!
//! One [`EacSession`] owns one authentication attempt against one card. It
//! is driven exclusively by inbound response messages through
//! [`EacSession::next_request`]; every call runs to completion and returns
//! the next request for the device-communication layer, or the final
//! outcome. Whatever branch ends the session, the deregistration callback
//! fires exactly once.

use std::sync::Arc;

use serde_bytes::ByteBuf;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authorization::{
    apply_card_modification, build_template, AuthorizationError, Chat, EffectiveRights,
};
use crate::definitions::attribute::AttributeKey;
use crate::definitions::container::{ResultContainer, SessionStatus};
use crate::definitions::helpers::aux_data::{self, AuxiliaryData};
use crate::definitions::helpers::tlv;
use crate::definitions::message::{
    ConnectionHandle, Eac1Output, Eac1Request, Eac2Output, Eac2Request, Request, Response,
    ResponseBody, StartMessage, TransmitOutput,
};
use crate::definitions::outcome::{Outcome, ResultMajor, ResultMinor};
use crate::definitions::value::AttributeValue;
use crate::registry::{self, CertificateRegistry, CvCertificate};
use crate::session_input::SessionInput;
use crate::trust::defects::{DefectList, DefectType};
use crate::trust::master_list::{
    extract_signer_certificate, ChipSecurityChecker, MasterListChecker, TrustError,
};

use super::transmit::TransmitEngine;
use super::ProtocolError;

const DEFAULT_DID_NAME: &str = "PIN";

/// Called exactly once when the session finishes, successful or not.
pub type DeregisterFn = Box<dyn FnOnce(Uuid, &ResultContainer) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("terminal certificate not usable: {0}")]
    Certificate(#[from] registry::Error),
    #[error("{0}")]
    Authorization(#[from] AuthorizationError),
    #[error("auxiliary data not usable: {0}")]
    AuxiliaryData(#[from] aux_data::Error),
    #[error("defect list not usable: {0}")]
    DefectList(tlv::Error),
    #[error("master list not usable: {0}")]
    MasterList(#[from] TrustError),
    #[error("more than one connection handle is not allowed")]
    TooManyConnectionHandles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Eac1Pending,
    Eac2Pending,
    TransmitInProgress,
    Finished,
}

pub struct EacSession {
    input: SessionInput,
    registry: CertificateRegistry,
    container: ResultContainer,
    state: State,
    started: bool,
    connection_handle: Option<ConnectionHandle>,
    did_name: String,
    terminal_certificate: CvCertificate,
    required_chat: Chat,
    optional_chat: Chat,
    effective_rights: Option<EffectiveRights>,
    auxiliary_data: AuxiliaryData,
    defect_list: Option<DefectList>,
    checker: Arc<dyn ChipSecurityChecker>,
    transmit: Option<TransmitEngine>,
    deregister: Option<DeregisterFn>,
}

impl EacSession {
    /// Build a session verifying chip security against the master list from
    /// the session input.
    pub fn new(
        input: SessionInput,
        registry: CertificateRegistry,
        deregister: Option<DeregisterFn>,
    ) -> Result<Self, SetupError> {
        let checker: Arc<dyn ChipSecurityChecker> =
            Arc::new(MasterListChecker::new(&input.master_list)?);
        Self::with_checker(input, registry, deregister, checker)
    }

    /// Build a session with an alternative trust backend.
    pub fn with_checker(
        input: SessionInput,
        registry: CertificateRegistry,
        deregister: Option<DeregisterFn>,
        checker: Arc<dyn ChipSecurityChecker>,
    ) -> Result<Self, SetupError> {
        let terminal_certificate = CvCertificate::parse(&input.terminal_credential.certificate)?;
        registry.insert_terminal_certificate(&input.terminal_credential)?;
        for link in &input.cvc_chain {
            registry.insert_certificate(link)?;
        }

        let terminal_chat = Chat::from_bytes(terminal_certificate.chat_template());
        let required_chat = build_template(&input.required_fields, &terminal_chat)?;
        let optional_chat = build_template(&input.optional_fields, &terminal_chat)?;
        let auxiliary_data = AuxiliaryData::new(
            input.required_age,
            input.required_community_id.as_deref(),
            input.ps_message.as_deref(),
        )?;
        let defect_list = input
            .defect_list
            .as_deref()
            .map(DefectList::parse)
            .transpose()
            .map_err(SetupError::DefectList)?;
        if let Some(list) = &defect_list {
            debug!(prefix = %input.log_prefix, defects = list.len(), "defect list received");
        }

        Ok(Self {
            input,
            registry,
            container: ResultContainer::new(),
            state: State::Eac1Pending,
            started: false,
            connection_handle: None,
            did_name: DEFAULT_DID_NAME.to_string(),
            terminal_certificate,
            required_chat,
            optional_chat,
            effective_rights: None,
            auxiliary_data,
            defect_list,
            checker,
            transmit: None,
            deregister,
        })
    }

    /// Feed the session-start message. At most one connection handle is
    /// allowed; with more the session never starts.
    pub fn start(&mut self, start: &StartMessage) -> Result<(), SetupError> {
        if self.started {
            warn!(prefix = %self.input.log_prefix, "start message already received");
            return Ok(());
        }
        match start.connection_handles.len() {
            0 => debug!(
                prefix = %self.input.log_prefix,
                "no connection handle in start message, must be set later"
            ),
            1 => {
                self.connection_handle = Some(start.connection_handles[0].clone());
            }
            _ => return Err(SetupError::TooManyConnectionHandles),
        }
        match &start.user_agent {
            Some(agent) => info!(prefix = %self.input.log_prefix, agent = %agent, "client user agent"),
            None => info!(prefix = %self.input.log_prefix, "no user agent information received"),
        }
        self.started = true;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Everything collected so far; read it once the session is finished.
    pub fn container(&self) -> &ResultContainer {
        &self.container
    }

    /// The single dispatch point: hand in the latest response (`None` right
    /// after the start message) and receive the next request or the final
    /// outcome.
    pub fn next_request(&mut self, response: Option<Response>) -> Request {
        let request = match self.dispatch(response) {
            Ok(request) => request,
            Err(e) => {
                debug!(prefix = %self.input.log_prefix, error = %e, "session failed");
                let outcome = e.into_outcome();
                self.container.set_outcome(outcome.clone());
                Request::Done(outcome)
            }
        };
        if matches!(request, Request::Done(_)) {
            self.finish();
        }
        request
    }

    fn dispatch(&mut self, response: Option<Response>) -> Result<Request, ProtocolError> {
        if !self.started {
            return Err(ProtocolError::new(
                ResultMinor::NoPermission,
                "received no correct start message",
            ));
        }

        let Some(response) = response else {
            return match self.state {
                State::Eac1Pending => self.build_eac1_request(),
                _ => Err(self.order_violation("empty response")),
            };
        };

        if response.result.major != ResultMajor::Ok {
            let minor = response
                .result
                .minor
                .as_deref()
                .and_then(ResultMinor::from_uri)
                .unwrap_or(ResultMinor::InternalError);
            return Err(ProtocolError::new(
                minor,
                response
                    .result
                    .message
                    .unwrap_or_else(|| "no message".to_string()),
            ));
        }

        match response.body {
            ResponseBody::Eac1(output) => {
                if self.state == State::Eac1Pending {
                    self.handle_eac1(output)
                } else {
                    Err(self.order_violation("authenticate output for finished first step"))
                }
            }
            ResponseBody::Eac2(output) => {
                if self.state == State::Eac2Pending {
                    self.handle_eac2(output)
                } else {
                    Err(self.order_violation("authenticate output for finished second step"))
                }
            }
            ResponseBody::Transmit(output) => {
                if self.state == State::TransmitInProgress {
                    self.handle_transmit(output)
                } else {
                    Err(self.order_violation("transmit result without open batch"))
                }
            }
            ResponseBody::Unknown => Err(ProtocolError::internal(
                "unknown response: terminate sequence",
            )),
        }
    }

    fn order_violation(&self, what: &str) -> ProtocolError {
        ProtocolError::new(
            ResultMinor::SecurityConditionNotSatisfied,
            format!("protocol order violated in this state: {what}"),
        )
    }

    fn build_eac1_request(&mut self) -> Result<Request, ProtocolError> {
        let today = OffsetDateTime::now_utc().date();
        let auxiliary_data = self
            .auxiliary_data
            .encode(today)
            .map_err(|e| ProtocolError::internal(e.to_string()))?;

        let mut certificates: Vec<ByteBuf> = self
            .input
            .cvc_chain
            .iter()
            .map(|c| ByteBuf::from(c.clone()))
            .collect();
        certificates.push(ByteBuf::from(
            self.input.terminal_credential.certificate.clone(),
        ));

        debug!(prefix = %self.input.log_prefix, "create first authenticate request");
        Ok(Request::AuthenticateEac1(Eac1Request {
            did_name: self.did_name.clone(),
            connection_handle: self.connection_handle.clone(),
            required_chat: ByteBuf::from(self.required_chat.bytes().to_vec()),
            optional_chat: ByteBuf::from(self.optional_chat.bytes().to_vec()),
            certificate_description: ByteBuf::from(
                self.input.terminal_credential.description.clone(),
            ),
            certificates,
            auxiliary_data: ByteBuf::from(auxiliary_data),
            transaction_info: self.input.transaction_info.clone(),
        }))
    }

    fn handle_eac1(&mut self, output: Eac1Output) -> Result<Request, ProtocolError> {
        let modified = output
            .modified_chat
            .as_deref()
            .map(|bytes| {
                Chat::try_from_slice(bytes)
                    .ok_or_else(|| ProtocolError::internal("malformed rights template from card"))
            })
            .transpose()?;

        let rights = apply_card_modification(
            &self.required_chat,
            &self.optional_chat,
            modified.as_ref(),
        );
        // a required right stripped by the holder is reported, not dropped
        for key in &self.input.required_fields {
            if rights.deselected(*key) {
                self.container.put(*key, AttributeValue::Deselected);
            }
        }
        self.effective_rights = Some(rights);

        let root = output
            .certification_authority_reference
            .clone()
            .unwrap_or_default();
        let Some(chain) = self
            .registry
            .resolve_chain(&root, self.terminal_certificate.holder_reference())
        else {
            debug!(prefix = %self.input.log_prefix, root = %root, "card not valid for terminal certificate");
            self.container.set_status(SessionStatus::NotAuthentic);
            return Err(ProtocolError::new(
                ResultMinor::SecurityConditionNotSatisfied,
                "card not valid: terminal holder not available or no root found for searched issuer",
            ));
        };

        self.state = State::Eac2Pending;
        debug!(prefix = %self.input.log_prefix, "create second authenticate request");
        Ok(Request::AuthenticateEac2(Eac2Request {
            did_name: self.did_name.clone(),
            connection_handle: self.connection_handle.clone(),
            certificates: chain.into_iter().map(ByteBuf::from).collect(),
        }))
    }

    fn handle_eac2(&mut self, output: Eac2Output) -> Result<Request, ProtocolError> {
        if output.ef_card_security.is_empty() {
            return Err(ProtocolError::new(
                ResultMinor::IncorrectParameter,
                "EF.CardSecurity missing",
            ));
        }

        self.check_defects(&output.ef_card_security)?;

        // chip authentication result against the master list
        match self.checker.check(&output.ef_card_security) {
            Ok(_verified) => {}
            Err(TrustError::Malformed(e)) => {
                return Err(ProtocolError::internal(format!(
                    "chip security object not readable: {e}"
                )));
            }
            Err(e) => {
                debug!(prefix = %self.input.log_prefix, "card could not be verified, abort");
                self.container.set_status(SessionStatus::NotAuthentic);
                return Err(ProtocolError::new(
                    ResultMinor::SecurityConditionNotSatisfied,
                    e.to_string(),
                ));
            }
        }

        let rights = self
            .effective_rights
            .as_ref()
            .ok_or_else(|| ProtocolError::internal("effective rights not negotiated"))?;
        let fields: Vec<AttributeKey> = self
            .input
            .requested_fields()
            .into_iter()
            .filter(|key| rights.allows_key(*key))
            .collect();

        let slot_handle = self
            .connection_handle
            .as_ref()
            .and_then(|h| h.slot_handle.as_ref())
            .map(|s| s.to_vec())
            .unwrap_or_else(|| vec![0]);
        let mut engine = TransmitEngine::new(
            slot_handle,
            self.input.terminal_credential.sector_public_key.clone(),
            fields,
        );
        let first_batch = engine.start();
        self.transmit = Some(engine);
        self.state = State::TransmitInProgress;
        Ok(Request::Transmit(first_batch))
    }

    /// Defect checks run in fixed priority order before any further protocol
    /// progress: a known-bad card must not see another password-protected
    /// step.
    fn check_defects(&mut self, ef_card_security: &[u8]) -> Result<(), ProtocolError> {
        let Some(defects) = &self.defect_list else {
            return Ok(());
        };
        let signer = extract_signer_certificate(ef_card_security).map_err(|e| {
            ProtocolError::new(
                ResultMinor::SecurityConditionNotSatisfied,
                format!("defect checks not possible: {e}"),
            )
        })?;

        if defects.affects(&signer, DefectType::CertRevoked) {
            self.container.set_status(SessionStatus::NotAuthentic);
            return Err(ProtocolError::from_outcome(
                &DefectType::CertRevoked.outcome(),
            ));
        }
        if defects.affects(&signer, DefectType::ChipAuthKeyRevoked) {
            warn!(
                prefix = %self.input.log_prefix,
                "private keys maybe compromised: {:?}", DefectType::ChipAuthKeyRevoked
            );
        }
        if defects.affects(&signer, DefectType::EidIntegrity) {
            return Err(ProtocolError::from_outcome(
                &DefectType::EidIntegrity.outcome(),
            ));
        }
        if defects.affects(&signer, DefectType::PowerDownRequired) {
            debug!(prefix = %self.input.log_prefix, "expected defect: {:?}", DefectType::PowerDownRequired);
        }
        Ok(())
    }

    fn handle_transmit(&mut self, output: TransmitOutput) -> Result<Request, ProtocolError> {
        let blacklist = self.input.blacklist.clone();
        let engine = self
            .transmit
            .as_mut()
            .ok_or_else(|| ProtocolError::internal("transmit not initialized"))?;
        match engine.handle(&output, &mut self.container, &*blacklist)? {
            Some(request) => Ok(Request::Transmit(request)),
            None => {
                if engine.done() {
                    Ok(Request::Done(Outcome::ok()))
                } else {
                    Err(ProtocolError::internal("transmit fail to complete"))
                }
            }
        }
    }

    fn finish(&mut self) {
        self.state = State::Finished;
        if let Some(deregister) = self.deregister.take() {
            debug!(
                prefix = %self.input.log_prefix,
                session = %self.input.session_id,
                "session stopped"
            );
            deregister(self.input.session_id, &self.container);
        }
    }
}
