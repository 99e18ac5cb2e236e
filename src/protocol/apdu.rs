//! Command and response APDUs.
//!
//! Only the short forms the eID application uses are implemented; extended
//! length is handled through the explicit expected-length constructor.

use std::fmt;

/// Status words the engine reacts to.
pub mod status {
    pub const OK: u16 = 0x9000;
    pub const EOF_READ: u16 = 0x6282;
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    pub const COMMAND_NOT_ALLOWED: u16 = 0x6986;
    pub const FILE_NOT_FOUND: u16 = 0x6a82;
    pub const REFERENCED_DATA_NOT_FOUND: u16 = 0x6a88;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    pub le: Option<u32>,
}

impl CommandApdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn expect(mut self, le: u32) -> Self {
        self.le = Some(le);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.cla, self.ins, self.p1, self.p2];
        let extended = self.data.len() > 255 || matches!(self.le, Some(le) if le > 256);
        if !self.data.is_empty() {
            if extended {
                out.push(0x00);
                out.push((self.data.len() >> 8) as u8);
                out.push(self.data.len() as u8);
            } else {
                out.push(self.data.len() as u8);
            }
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            if extended {
                if self.data.is_empty() {
                    out.push(0x00);
                }
                out.push((le >> 8) as u8);
                out.push(le as u8);
            } else {
                // Le of 256 is encoded as 0x00
                out.push(le as u8);
            }
        }
        out
    }
}

impl fmt::Display for CommandApdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A response APDU: payload plus two status bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("response APDU shorter than two status bytes")]
pub struct TooShort;

impl ResponseApdu {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TooShort> {
        if bytes.len() < 2 {
            return Err(TooShort);
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Build a response from payload and status word (test and simulation
    /// helper).
    pub fn assemble(data: &[u8], sw: u16) -> Self {
        let mut bytes = data.to_vec();
        bytes.push((sw >> 8) as u8);
        bytes.push(sw as u8);
        Self { bytes }
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 2]
    }

    pub fn status(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_be_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    pub fn is_ok(&self) -> bool {
        self.status() == status::OK
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn select_application_encoding() {
        let aid = vec![0xe8, 0x07, 0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x02];
        let apdu = CommandApdu::new(0x00, 0xa4, 0x04, 0x0c).with_data(aid.clone());
        let mut expected = vec![0x00, 0xa4, 0x04, 0x0c, 0x09];
        expected.extend_from_slice(&aid);
        assert_eq!(apdu.to_bytes(), expected);
    }

    #[test]
    fn read_binary_with_extended_length() {
        let apdu = CommandApdu::new(0x00, 0xb0, 0x81, 0x00).expect(65536);
        assert_eq!(apdu.to_bytes(), vec![0x00, 0xb0, 0x81, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn response_splits_data_and_status() {
        let response = ResponseApdu::assemble(&[0xde, 0xad], status::OK);
        assert_eq!(response.data(), &[0xde, 0xad]);
        assert_eq!(response.status(), 0x9000);
        assert!(response.is_ok());

        let not_found = ResponseApdu::assemble(&[], status::FILE_NOT_FOUND);
        assert_eq!(not_found.status(), 0x6a82);
        assert!(!not_found.is_ok());

        assert_eq!(ResponseApdu::from_bytes(&[0x90]), Err(TooShort));
    }
}
