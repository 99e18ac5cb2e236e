//! The EAC protocol engine: APDU building blocks, the transmit batch engine
//! and the top-level session state machine.

pub mod apdu;
pub mod commands;
pub mod session;
mod transmit;

use crate::definitions::outcome::{Outcome, ResultMinor};

/// Fatal protocol failure on its way to becoming the final outcome message.
///
/// Handlers below the state machine return this; the single normalization
/// point in [`session::EacSession::next_request`] turns it into the outcome,
/// defaulting a missing minor to internal-error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ProtocolError {
    pub minor: Option<ResultMinor>,
    pub message: String,
}

impl ProtocolError {
    pub fn new(minor: ResultMinor, message: impl Into<String>) -> Self {
        Self {
            minor: Some(minor),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ResultMinor::InternalError, message)
    }

    pub fn from_outcome(outcome: &Outcome) -> Self {
        Self {
            minor: outcome.minor,
            message: outcome
                .message
                .clone()
                .unwrap_or_else(|| "no message".to_string()),
        }
    }

    pub fn into_outcome(self) -> Outcome {
        Outcome::error(
            self.minor.unwrap_or(ResultMinor::InternalError),
            if self.message.is_empty() {
                "no message".to_string()
            } else {
                self.message
            },
        )
    }
}
