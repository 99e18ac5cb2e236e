pub mod attribute;
pub mod container;
pub mod helpers;
pub mod message;
pub mod outcome;
pub mod value;

pub use attribute::{AttributeKey, DataGroup};
pub use container::{ResultContainer, SessionStatus};
pub use message::{
    ConnectionHandle, Eac1Output, Eac1Request, Eac2Output, Eac2Request, InputApdu, Request,
    Response, ResponseBody, StartMessage, TransmitOutput, TransmitRequest, TransportResult,
};
pub use outcome::{Outcome, ResultMajor, ResultMinor};
pub use value::{AttributeValue, PseudonymousSignature, RestrictedId, StructuredPlace};
