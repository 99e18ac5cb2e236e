//! eID Extended Access Control (EAC) protocol engine.
//!
//! This crate drives the card side of an eID authentication: the two-phase
//! EAC handshake (terminal authentication, chip authentication), the batched
//! card-command sequences that follow it, trust checks against master list,
//! defect list and blacklist, and the decoding of identity attributes into
//! typed values.
//!
//! The entry point is [`protocol::session::EacSession`]: construct it from a
//! [`session_input::SessionInput`] and a shared [`registry::CertificateRegistry`],
//! feed it the start message, then loop `next_request` against the
//! device-communication layer until [`EacSession::is_finished`] and read the
//! [`definitions::ResultContainer`].
//!
//! [`EacSession::is_finished`]: protocol::session::EacSession::is_finished

pub mod authorization;
pub mod definitions;
pub mod protocol;
pub mod registry;
pub mod session_input;
pub mod trust;

pub use authorization::{AccessRight, Chat, EffectiveRights};
pub use definitions::{
    AttributeKey, AttributeValue, Outcome, Request, Response, ResponseBody, ResultContainer,
    ResultMajor, ResultMinor, SessionStatus, StartMessage,
};
pub use protocol::session::{DeregisterFn, EacSession, SetupError};
pub use registry::CertificateRegistry;
pub use session_input::{BlacklistConnector, SessionInput, TerminalCredential};
