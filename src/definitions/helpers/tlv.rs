//! Minimal BER-TLV reader/writer for card data structures.
//!
//! Data groups, CV certificates and auxiliary data on the card use raw
//! application- and context-class tags (`0x7F21`, `0xAA`, ...) that are not
//! convenient to express through a schema-driven DER library, so this module
//! works directly on tag numbers up to three bytes.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of data while parsing tag")]
    TruncatedTag,
    #[error("unexpected end of data while parsing length")]
    TruncatedLength,
    #[error("unexpected end of data while parsing value: need {0} more bytes")]
    TruncatedValue(usize),
    #[error("unsupported length encoding: 0x{0:02x}")]
    UnsupportedLength(u8),
    #[error("tags longer than three bytes are not supported")]
    TagTooLong,
    #[error("trailing bytes after record")]
    TrailingBytes,
    #[error("required element 0x{0:02x} missing")]
    MissingElement(u32),
}

/// A single tag-length-value record.
///
/// The tag is kept as the raw big-endian byte sequence packed into a `u32`,
/// e.g. `0x7F21` for a CV certificate and `0xAA` for a structured-place
/// street element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tlv {
    pub tag: u32,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(tag: u32, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Parse exactly one record; trailing bytes are an error.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let (tlv, rest) = Self::parse_prefix(data)?;
        if !rest.is_empty() {
            return Err(Error::TrailingBytes);
        }
        Ok(tlv)
    }

    /// Parse one record from the front of `data`, returning the remainder.
    pub fn parse_prefix(data: &[u8]) -> Result<(Self, &[u8]), Error> {
        let (tag, rest) = parse_tag(data)?;
        let (len, rest) = parse_length(rest)?;
        if rest.len() < len {
            return Err(Error::TruncatedValue(len - rest.len()));
        }
        let (value, rest) = rest.split_at(len);
        Ok((
            Tlv {
                tag,
                value: value.to_vec(),
            },
            rest,
        ))
    }

    /// Parse the value as a sequence of child records.
    pub fn children(&self) -> Result<Vec<Tlv>, Error> {
        let mut out = Vec::new();
        let mut rest: &[u8] = &self.value;
        while !rest.is_empty() {
            let (child, tail) = Self::parse_prefix(rest)?;
            out.push(child);
            rest = tail;
        }
        Ok(out)
    }

    /// First child with the given tag, if any.
    pub fn child(&self, tag: u32) -> Result<Option<Tlv>, Error> {
        Ok(self.children()?.into_iter().find(|c| c.tag == tag))
    }

    /// First child with the given tag, or a missing-element error.
    pub fn require_child(&self, tag: u32) -> Result<Tlv, Error> {
        self.child(tag)?.ok_or(Error::MissingElement(tag))
    }

    /// Parse the value itself as a nested record.
    pub fn inner(&self) -> Result<Tlv, Error> {
        Tlv::parse(&self.value)
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value.len() + 6);
        write_tag(&mut out, self.tag);
        write_length(&mut out, self.value.len());
        out.extend_from_slice(&self.value);
        out
    }

    /// Encode a constructed record from child records.
    pub fn constructed(tag: u32, children: &[Tlv]) -> Self {
        let mut value = Vec::new();
        for child in children {
            value.extend_from_slice(&child.encoded());
        }
        Tlv { tag, value }
    }
}

fn parse_tag(data: &[u8]) -> Result<(u32, &[u8]), Error> {
    let first = *data.first().ok_or(Error::TruncatedTag)?;
    if first & 0x1f != 0x1f {
        return Ok((first as u32, &data[1..]));
    }
    // multi-byte tag: subsequent bytes have the top bit set on all but the last
    let mut tag = first as u32;
    for i in 1..4 {
        let byte = *data.get(i).ok_or(Error::TruncatedTag)?;
        tag = (tag << 8) | byte as u32;
        if byte & 0x80 == 0 {
            return Ok((tag, &data[i + 1..]));
        }
    }
    Err(Error::TagTooLong)
}

fn parse_length(data: &[u8]) -> Result<(usize, &[u8]), Error> {
    let first = *data.first().ok_or(Error::TruncatedLength)?;
    if first < 0x80 {
        return Ok((first as usize, &data[1..]));
    }
    let num_bytes = (first & 0x7f) as usize;
    if num_bytes == 0 || num_bytes > 3 {
        return Err(Error::UnsupportedLength(first));
    }
    if data.len() < 1 + num_bytes {
        return Err(Error::TruncatedLength);
    }
    let mut len = 0usize;
    for byte in &data[1..=num_bytes] {
        len = (len << 8) | *byte as usize;
    }
    Ok((len, &data[1 + num_bytes..]))
}

fn write_tag(out: &mut Vec<u8>, tag: u32) {
    if tag > 0xffff {
        out.push((tag >> 16) as u8);
    }
    if tag > 0xff {
        out.push((tag >> 8) as u8);
    }
    out.push(tag as u8);
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(0x81);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    } else {
        out.push(0x83);
        out.push((len >> 16) as u8);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_record_roundtrip() {
        let tlv = Tlv::new(0x0c, b"Berlin".to_vec());
        let encoded = tlv.encoded();
        assert_eq!(encoded[0], 0x0c);
        assert_eq!(encoded[1], 6);
        assert_eq!(Tlv::parse(&encoded).unwrap(), tlv);
    }

    #[test]
    fn two_byte_tag() {
        let tlv = Tlv::new(0x7f21, vec![0x01, 0x02]);
        let encoded = tlv.encoded();
        assert_eq!(&encoded[..3], &[0x7f, 0x21, 0x02]);
        assert_eq!(Tlv::parse(&encoded).unwrap(), tlv);
    }

    #[test]
    fn three_byte_tag() {
        // continuation bytes carry the top bit, the last one does not
        let tlv = Tlv::new(0x7f8101, vec![0xaa]);
        assert_eq!(Tlv::parse(&tlv.encoded()).unwrap(), tlv);
    }

    #[test]
    fn long_length() {
        let tlv = Tlv::new(0x53, vec![0xab; 300]);
        let encoded = tlv.encoded();
        assert_eq!(&encoded[1..4], &[0x82, 0x01, 0x2c]);
        assert_eq!(Tlv::parse(&encoded).unwrap().value.len(), 300);
    }

    #[test]
    fn children_in_order() {
        let seq = Tlv::constructed(
            0x30,
            &[Tlv::new(0xaa, b"a".to_vec()), Tlv::new(0xab, b"b".to_vec())],
        );
        let children = seq.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].tag, 0xaa);
        assert_eq!(children[1].value, b"b");
        assert!(seq.child(0xac).unwrap().is_none());
    }

    #[test]
    fn truncated_value_rejected() {
        assert_eq!(
            Tlv::parse(&[0x0c, 0x05, 0x41]),
            Err(Error::TruncatedValue(4))
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        assert_eq!(Tlv::parse(&[0x0c, 0x01, 0x41, 0x00]), Err(Error::TrailingBytes));
    }
}
