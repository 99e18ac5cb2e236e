//! Typed shapes of the messages exchanged with the device-communication
//! layer.
//!
//! The transport (PAOS envelope, schema binding) lives outside the engine;
//! these types carry exactly the payloads the state machine inspects. The
//! four inbound shapes are one sum type so dispatch is exhaustive.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::outcome::{Outcome, ResultMajor};

/// Device/reader coordinates from the start message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub ifd_name: Option<String>,
    pub slot_handle: Option<ByteBuf>,
}

/// Session-start message. At most one connection handle is allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartMessage {
    pub connection_handles: Vec<ConnectionHandle>,
    pub user_agent: Option<String>,
}

/// Card answer to the first authenticate request: the rights template the
/// holder actually granted (if modified) and the certification authority the
/// card trusts, naming the root for terminal authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Eac1Output {
    pub modified_chat: Option<ByteBuf>,
    pub certification_authority_reference: Option<String>,
}

/// Card answer to the second authenticate request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Eac2Output {
    /// EF.CardSecurity as read from the chip.
    pub ef_card_security: ByteBuf,
    pub authentication_token: Option<ByteBuf>,
    pub nonce: Option<ByteBuf>,
}

/// Response APDUs for a previously issued batch, in command order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransmitOutput {
    pub response_apdus: Vec<ByteBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
    Eac1(Eac1Output),
    Eac2(Eac2Output),
    Transmit(TransmitOutput),
    /// Anything the engine does not understand; always fatal.
    Unknown,
}

/// Transport-level result attached to every inbound response. The minor is
/// kept as the raw URI since clients may send codes outside our model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportResult {
    pub major: ResultMajor,
    pub minor: Option<String>,
    pub message: Option<String>,
}

impl TransportResult {
    pub fn ok() -> Self {
        Self {
            major: ResultMajor::Ok,
            minor: None,
            message: None,
        }
    }
}

/// One inbound message from the device-communication layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: TransportResult,
    pub body: ResponseBody,
}

impl Response {
    pub fn ok(body: ResponseBody) -> Self {
        Self {
            result: TransportResult::ok(),
            body,
        }
    }
}

/// First authenticate request: what the terminal asks of card and holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eac1Request {
    pub did_name: String,
    pub connection_handle: Option<ConnectionHandle>,
    /// 5-byte rights template the relying party requires.
    pub required_chat: ByteBuf,
    /// 5-byte rights template the holder may deselect from.
    pub optional_chat: ByteBuf,
    pub certificate_description: ByteBuf,
    /// Link certificates followed by the terminal certificate.
    pub certificates: Vec<ByteBuf>,
    pub auxiliary_data: ByteBuf,
    pub transaction_info: Option<String>,
}

/// Second authenticate request carrying the resolved certificate chain for
/// terminal authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eac2Request {
    pub did_name: String,
    pub connection_handle: Option<ConnectionHandle>,
    pub certificates: Vec<ByteBuf>,
}

/// One card command plus the status words the transport may accept without
/// aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputApdu {
    pub command: ByteBuf,
    pub acceptable_statuses: Vec<ByteBuf>,
}

impl InputApdu {
    pub fn new(command: Vec<u8>) -> Self {
        Self {
            command: ByteBuf::from(command),
            acceptable_statuses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmitRequest {
    pub slot_handle: ByteBuf,
    pub input_apdus: Vec<InputApdu>,
}

/// One outbound message to the device-communication layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    AuthenticateEac1(Eac1Request),
    AuthenticateEac2(Eac2Request),
    Transmit(TransmitRequest),
    /// Final message: the session outcome, successful or not.
    Done(Outcome),
}

impl Request {
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Request::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}
