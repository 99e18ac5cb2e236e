//! Chip-security verification against the master list.
//!
//! EF.CardSecurity is a CMS SignedData object: the card's security infos,
//! signed by a document signer whose certificate must chain to one of the
//! trusted master-list certificates. Verification checks the message digest,
//! the signer-info signature and the document signer's issuer in that order.

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

use crate::definitions::helpers::tlv::{self, Tlv};

const TAG_BIT_STRING: u32 = 0x03;
const TAG_OCTET_STRING: u32 = 0x04;
const TAG_OID: u32 = 0x06;
const TAG_SEQUENCE: u32 = 0x30;
const TAG_SET: u32 = 0x31;
const TAG_CONTEXT_0: u32 = 0xa0;

// 1.2.840.113549.1.7.2
const OID_SIGNED_DATA: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
// 1.2.840.113549.1.9.4
const OID_MESSAGE_DIGEST: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];
// 2.16.840.1.101.3.4.2.1
const OID_SHA256: [u8; 9] = [0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
// 1.2.840.10045.4.3.2
const OID_ECDSA_SHA256: [u8; 8] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];

#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("malformed chip security object: {0}")]
    Malformed(#[from] tlv::Error),
    #[error("chip security object is not CMS signed data")]
    NotSignedData,
    #[error("no certificate in chip security object")]
    NoCertificate,
    #[error("no signature in chip security object")]
    NoSignature,
    #[error("signed content digest does not match")]
    DigestMismatch,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("document signer not issued by a master list certificate")]
    NotOnMasterList,
    #[error("master list is empty")]
    EmptyMasterList,
    #[error("cannot verify chip security object: {0}")]
    Unverifiable(String),
}

/// Proof that a chip security object was accepted, carrying what later
/// checks need from it.
#[derive(Debug, Clone)]
pub struct VerifiedChipSecurity {
    /// Document signer certificate, DER encoded.
    pub signer_certificate: Vec<u8>,
    /// The signed security infos.
    pub security_infos: Vec<u8>,
}

/// Verification seam, so deployments can plug a different trust backend.
/// The production implementation is [`MasterListChecker`].
pub trait ChipSecurityChecker: Send + Sync {
    fn check(&self, ef_card_security: &[u8]) -> Result<VerifiedChipSecurity, TrustError>;
}

/// Verifies chip security objects against a list of trusted document-signer
/// root certificates.
pub struct MasterListChecker {
    master_list: Vec<Certificate>,
}

impl MasterListChecker {
    pub fn new(master_list_der: &[Vec<u8>]) -> Result<Self, TrustError> {
        if master_list_der.is_empty() {
            return Err(TrustError::EmptyMasterList);
        }
        let master_list = master_list_der
            .iter()
            .map(|der| {
                Certificate::from_der(der)
                    .map_err(|e| TrustError::Unverifiable(format!("master list entry: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { master_list })
    }
}

impl ChipSecurityChecker for MasterListChecker {
    fn check(&self, ef_card_security: &[u8]) -> Result<VerifiedChipSecurity, TrustError> {
        let signed_data = signed_data(ef_card_security)?;
        let content = encapsulated_content(&signed_data)?;
        let signer_certificate = first_certificate(&signed_data)?;
        let signer_info = first_signer_info(&signed_data)?;

        check_message_digest(&signer_info, &content)?;
        let signer = parse_verifying_key(&signer_certificate)?;
        check_signer_signature(&signer_info, &signer)?;
        self.check_master_list(&signer_certificate)?;

        Ok(VerifiedChipSecurity {
            signer_certificate,
            security_infos: content,
        })
    }
}

impl MasterListChecker {
    fn check_master_list(&self, signer_der: &[u8]) -> Result<(), TrustError> {
        let signer = Certificate::from_der(signer_der)
            .map_err(|e| TrustError::Unverifiable(format!("document signer: {e}")))?;
        let issuer = &signer.tbs_certificate.issuer;

        let Some(root) = self
            .master_list
            .iter()
            .find(|c| &c.tbs_certificate.subject == issuer)
        else {
            debug!("no master list certificate matches the document signer issuer");
            return Err(TrustError::NotOnMasterList);
        };

        // verify the document signer certificate under the root key
        let root_der = root
            .to_der()
            .map_err(|e| TrustError::Unverifiable(format!("master list entry: {e}")))?;
        let root_key = parse_verifying_key(&root_der)?;
        let cert = Tlv::parse(signer_der)?;
        let parts = cert.children()?;
        let tbs = parts
            .first()
            .filter(|t| t.tag == TAG_SEQUENCE)
            .ok_or(TrustError::NotSignedData)?;
        let bit_string = parts
            .iter()
            .rev()
            .find(|t| t.tag == TAG_BIT_STRING)
            .ok_or(TrustError::SignatureInvalid)?;
        // first content byte of a BIT STRING is the unused-bit count
        let signature_der = bit_string
            .value
            .get(1..)
            .ok_or(TrustError::SignatureInvalid)?;
        let signature = Signature::from_der(signature_der)
            .map_err(|e| TrustError::Unverifiable(format!("signer signature: {e}")))?;
        root_key
            .verify(&tbs.encoded(), &signature)
            .map_err(|_| TrustError::SignatureInvalid)
    }
}

/// Pull the document signer certificate out of a chip security object
/// without verifying anything. Needed for the defect checks, which run
/// before the password-protected steps may proceed.
pub fn extract_signer_certificate(ef_card_security: &[u8]) -> Result<Vec<u8>, TrustError> {
    first_certificate(&signed_data(ef_card_security)?)
}

fn signed_data(ef_card_security: &[u8]) -> Result<Tlv, TrustError> {
    let content_info = Tlv::parse(ef_card_security)?;
    if content_info.tag != TAG_SEQUENCE {
        return Err(TrustError::NotSignedData);
    }
    let content_type = content_info.require_child(TAG_OID)?;
    if content_type.value != OID_SIGNED_DATA {
        return Err(TrustError::NotSignedData);
    }
    content_info
        .require_child(TAG_CONTEXT_0)?
        .inner()
        .map_err(TrustError::from)
}

fn encapsulated_content(signed_data: &Tlv) -> Result<Vec<u8>, TrustError> {
    let encap = signed_data
        .children()?
        .into_iter()
        .find(|c| c.tag == TAG_SEQUENCE)
        .ok_or(TrustError::NotSignedData)?;
    let wrapper = encap.require_child(TAG_CONTEXT_0)?;
    let octets = wrapper.inner()?;
    if octets.tag != TAG_OCTET_STRING {
        return Err(TrustError::NotSignedData);
    }
    Ok(octets.value)
}

fn first_certificate(signed_data: &Tlv) -> Result<Vec<u8>, TrustError> {
    let certificates = signed_data
        .children()?
        .into_iter()
        .find(|c| c.tag == TAG_CONTEXT_0)
        .ok_or(TrustError::NoCertificate)?;
    let first = certificates
        .children()?
        .into_iter()
        .find(|c| c.tag == TAG_SEQUENCE)
        .ok_or(TrustError::NoCertificate)?;
    Ok(first.encoded())
}

fn first_signer_info(signed_data: &Tlv) -> Result<Tlv, TrustError> {
    // the first SET holds digest algorithms, the last one the signer infos
    let sets: Vec<Tlv> = signed_data
        .children()?
        .into_iter()
        .filter(|c| c.tag == TAG_SET)
        .collect();
    if sets.len() < 2 {
        return Err(TrustError::NoSignature);
    }
    sets.last()
        .expect("len checked")
        .children()?
        .into_iter()
        .find(|c| c.tag == TAG_SEQUENCE)
        .ok_or(TrustError::NoSignature)
}

fn signed_attributes(signer_info: &Tlv) -> Result<Tlv, TrustError> {
    signer_info
        .child(TAG_CONTEXT_0)?
        .ok_or_else(|| TrustError::Unverifiable("no signed attributes".to_string()))
}

fn check_message_digest(signer_info: &Tlv, content: &[u8]) -> Result<(), TrustError> {
    // the digest algorithm is the sequence right before the signed attributes
    let children = signer_info.children()?;
    let attrs_at = children
        .iter()
        .position(|c| c.tag == TAG_CONTEXT_0)
        .ok_or_else(|| TrustError::Unverifiable("no signed attributes".to_string()))?;
    let digest_alg = attrs_at
        .checked_sub(1)
        .and_then(|i| children.get(i))
        .filter(|c| c.tag == TAG_SEQUENCE)
        .ok_or(TrustError::NoSignature)?;
    let alg_oid = digest_alg.require_child(TAG_OID)?;
    if alg_oid.value != OID_SHA256 {
        return Err(TrustError::Unverifiable(format!(
            "unsupported digest algorithm oid {:02x?}",
            alg_oid.value
        )));
    }

    let attrs = signed_attributes(signer_info)?;
    let message_digest = attrs
        .children()?
        .into_iter()
        .filter(|a| a.tag == TAG_SEQUENCE)
        .find_map(|attr| {
            let oid = attr.child(TAG_OID).ok()??;
            if oid.value != OID_MESSAGE_DIGEST {
                return None;
            }
            let values = attr.child(TAG_SET).ok()??;
            values
                .children()
                .ok()?
                .into_iter()
                .find(|v| v.tag == TAG_OCTET_STRING)
        })
        .ok_or_else(|| TrustError::Unverifiable("no message digest attribute".to_string()))?;

    if message_digest.value == Sha256::digest(content).as_slice() {
        Ok(())
    } else {
        Err(TrustError::DigestMismatch)
    }
}

fn check_signer_signature(signer_info: &Tlv, signer: &VerifyingKey) -> Result<(), TrustError> {
    // the signature algorithm is the sequence right after the signed attributes
    let children = signer_info.children()?;
    let attrs_at = children
        .iter()
        .position(|c| c.tag == TAG_CONTEXT_0)
        .ok_or_else(|| TrustError::Unverifiable("no signed attributes".to_string()))?;
    let signature_alg = children
        .get(attrs_at + 1)
        .filter(|c| c.tag == TAG_SEQUENCE)
        .ok_or(TrustError::NoSignature)?;
    let alg_oid = signature_alg.require_child(TAG_OID)?;
    if alg_oid.value != OID_ECDSA_SHA256 {
        return Err(TrustError::Unverifiable(format!(
            "unsupported signature algorithm oid {:02x?}",
            alg_oid.value
        )));
    }
    let signature_octets = children
        .iter()
        .rev()
        .find(|c| c.tag == TAG_OCTET_STRING)
        .ok_or(TrustError::NoSignature)?;
    let signature = Signature::from_der(&signature_octets.value)
        .map_err(|e| TrustError::Unverifiable(format!("signature encoding: {e}")))?;

    // per CMS the signature covers the signed attributes re-tagged as SET
    let attrs = signed_attributes(signer_info)?;
    let signed_bytes = Tlv::new(TAG_SET, attrs.value).encoded();
    signer
        .verify(&signed_bytes, &signature)
        .map_err(|_| TrustError::SignatureInvalid)
}

fn parse_verifying_key(cert_der: &[u8]) -> Result<VerifyingKey, TrustError> {
    let cert = Certificate::from_der(cert_der)
        .map_err(|e| TrustError::Unverifiable(format!("certificate: {e}")))?;
    let key_bytes = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| TrustError::Unverifiable("malformed public key".to_string()))?;
    VerifyingKey::from_sec1_bytes(key_bytes)
        .map_err(|_| TrustError::Unverifiable("public key is not on P-256".to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::trust::test_support::{
        chip_security_object, certificate_der, KeyedCertificate,
    };

    fn setup() -> (KeyedCertificate, KeyedCertificate) {
        let root = KeyedCertificate::self_signed("CSCA TEST ROOT");
        let signer = root.issue("DS TEST SIGNER");
        (root, signer)
    }

    #[test]
    fn accepts_properly_signed_object() {
        let (root, signer) = setup();
        let checker = MasterListChecker::new(&[certificate_der(&root)]).unwrap();
        let security_infos = b"security infos content".to_vec();
        let object = chip_security_object(&signer, &security_infos);

        let verified = checker.check(&object).unwrap();
        assert_eq!(verified.security_infos, security_infos);
        assert_eq!(verified.signer_certificate, certificate_der(&signer));
    }

    #[test]
    fn rejects_unknown_issuer() {
        let (_, signer) = setup();
        let unrelated = KeyedCertificate::self_signed("OTHER ROOT");
        let checker = MasterListChecker::new(&[certificate_der(&unrelated)]).unwrap();
        let object = chip_security_object(&signer, b"content");
        assert!(matches!(
            checker.check(&object),
            Err(TrustError::NotOnMasterList)
        ));
    }

    #[test]
    fn rejects_tampered_content() {
        let (root, signer) = setup();
        let checker = MasterListChecker::new(&[certificate_der(&root)]).unwrap();
        let mut object = chip_security_object(&signer, b"genuine content here");
        // flip a byte inside the encapsulated content
        let position = object.len() / 2;
        object[position] ^= 0xff;
        assert!(checker.check(&object).is_err());
    }

    #[test]
    fn empty_master_list_is_refused() {
        assert!(matches!(
            MasterListChecker::new(&[]),
            Err(TrustError::EmptyMasterList)
        ));
    }
}
