//! Result codes of the eCard result model.
//!
//! The transport protocol reports outcomes as a major/minor URI pair plus an
//! optional human-readable message. Only the minors this engine actually
//! emits are modeled; anything else coming in from the client is normalized
//! to [`ResultMinor::InternalError`].

use serde::{Deserialize, Serialize};

const MAJOR_OK: &str = "http://www.bsi.bund.de/ecard/api/1.1/resultmajor#ok";
const MAJOR_ERROR: &str = "http://www.bsi.bund.de/ecard/api/1.1/resultmajor#error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultMajor {
    Ok,
    Error,
}

impl ResultMajor {
    pub fn uri(&self) -> &'static str {
        match self {
            ResultMajor::Ok => MAJOR_OK,
            ResultMajor::Error => MAJOR_ERROR,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            MAJOR_OK => Some(ResultMajor::Ok),
            MAJOR_ERROR => Some(ResultMajor::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultMinor {
    NoPermission,
    InternalError,
    IncorrectParameter,
    SecurityConditionNotSatisfied,
    FileNotFound,
    AgeVerificationFailed,
    CommunityVerificationFailed,
}

impl ResultMinor {
    pub fn uri(&self) -> &'static str {
        match self {
            ResultMinor::NoPermission => {
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#noPermission"
            }
            ResultMinor::InternalError => {
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#internalError"
            }
            ResultMinor::IncorrectParameter => {
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#incorrectParameter"
            }
            ResultMinor::SecurityConditionNotSatisfied => {
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal#securityConditionNotSatisfied"
            }
            ResultMinor::FileNotFound => {
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal#fileNotFound"
            }
            ResultMinor::AgeVerificationFailed => {
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal/mEAC#AgeVerificationFailedWarning"
            }
            ResultMinor::CommunityVerificationFailed => {
                "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal/mEAC#CommunityVerificationFailedWarning"
            }
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            ResultMinor::NoPermission,
            ResultMinor::InternalError,
            ResultMinor::IncorrectParameter,
            ResultMinor::SecurityConditionNotSatisfied,
            ResultMinor::FileNotFound,
            ResultMinor::AgeVerificationFailed,
            ResultMinor::CommunityVerificationFailed,
        ]
        .into_iter()
        .find(|m| m.uri() == uri)
    }
}

/// Final (or client-reported) result of a session step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub major: ResultMajor,
    pub minor: Option<ResultMinor>,
    pub message: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            major: ResultMajor::Ok,
            minor: None,
            message: None,
        }
    }

    pub fn error(minor: ResultMinor, message: impl Into<String>) -> Self {
        Self {
            major: ResultMajor::Error,
            minor: Some(minor),
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.major == ResultMajor::Ok
    }
}
