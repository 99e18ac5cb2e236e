//! Builders for the X.509 and CMS structures used in trust tests.
//!
//! Keys are derived deterministically from the certificate name so tests do
//! not depend on an entropy source.

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use sha2::{Digest, Sha256};

use crate::definitions::helpers::tlv::Tlv;

const TAG_INTEGER: u32 = 0x02;
const TAG_BIT_STRING: u32 = 0x03;
const TAG_OCTET_STRING: u32 = 0x04;
const TAG_OID: u32 = 0x06;
const TAG_PRINTABLE_STRING: u32 = 0x13;
const TAG_UTC_TIME: u32 = 0x17;
const TAG_SEQUENCE: u32 = 0x30;
const TAG_SET: u32 = 0x31;
const TAG_CONTEXT_0: u32 = 0xa0;

const OID_COMMON_NAME: [u8; 3] = [0x55, 0x04, 0x03];
const OID_EC_PUBLIC_KEY: [u8; 7] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const OID_PRIME256V1: [u8; 8] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const OID_ECDSA_SHA256: [u8; 8] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
const OID_SHA256: [u8; 9] = [0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
const OID_SIGNED_DATA: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
const OID_CONTENT_TYPE: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x03];
const OID_MESSAGE_DIGEST: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];
// 0.4.0.127.0.7.3.2.1 (id-SecurityObject)
const OID_SECURITY_OBJECT: [u8; 8] = [0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x02, 0x01];

/// An X.509 certificate together with its signing key.
pub struct KeyedCertificate {
    pub name: String,
    pub key: SigningKey,
    pub certificate: Vec<u8>,
}

impl KeyedCertificate {
    pub fn self_signed(name: &str) -> Self {
        let key = deterministic_key(name);
        let certificate = build_certificate(name, name, &key, &key);
        Self {
            name: name.to_string(),
            key,
            certificate,
        }
    }

    pub fn issue(&self, name: &str) -> KeyedCertificate {
        let key = deterministic_key(name);
        let certificate = build_certificate(name, &self.name, &key, &self.key);
        KeyedCertificate {
            name: name.to_string(),
            key,
            certificate,
        }
    }
}

pub fn certificate_der(cert: &KeyedCertificate) -> Vec<u8> {
    cert.certificate.clone()
}

fn deterministic_key(name: &str) -> SigningKey {
    let scalar: [u8; 32] = Sha256::digest(name.as_bytes()).into();
    SigningKey::from_bytes(&scalar.into()).expect("digest is a valid scalar")
}

fn rdn_name(common_name: &str) -> Tlv {
    Tlv::constructed(
        TAG_SEQUENCE,
        &[Tlv::constructed(
            TAG_SET,
            &[Tlv::constructed(
                TAG_SEQUENCE,
                &[
                    Tlv::new(TAG_OID, OID_COMMON_NAME.to_vec()),
                    Tlv::new(TAG_PRINTABLE_STRING, common_name.as_bytes().to_vec()),
                ],
            )],
        )],
    )
}

fn algorithm_ecdsa_sha256() -> Tlv {
    Tlv::constructed(
        TAG_SEQUENCE,
        &[Tlv::new(TAG_OID, OID_ECDSA_SHA256.to_vec())],
    )
}

fn subject_public_key_info(key: &SigningKey) -> Tlv {
    let point = key.verifying_key().to_encoded_point(false);
    let mut bits = vec![0u8]; // no unused bits
    bits.extend_from_slice(point.as_bytes());
    Tlv::constructed(
        TAG_SEQUENCE,
        &[
            Tlv::constructed(
                TAG_SEQUENCE,
                &[
                    Tlv::new(TAG_OID, OID_EC_PUBLIC_KEY.to_vec()),
                    Tlv::new(TAG_OID, OID_PRIME256V1.to_vec()),
                ],
            ),
            Tlv::new(TAG_BIT_STRING, bits),
        ],
    )
}

fn build_certificate(
    subject: &str,
    issuer: &str,
    subject_key: &SigningKey,
    issuer_key: &SigningKey,
) -> Vec<u8> {
    let tbs = Tlv::constructed(
        TAG_SEQUENCE,
        &[
            // [0] version v3
            Tlv::constructed(TAG_CONTEXT_0, &[Tlv::new(TAG_INTEGER, vec![0x02])]),
            Tlv::new(TAG_INTEGER, vec![0x01]),
            algorithm_ecdsa_sha256(),
            rdn_name(issuer),
            Tlv::constructed(
                TAG_SEQUENCE,
                &[
                    Tlv::new(TAG_UTC_TIME, b"250101000000Z".to_vec()),
                    Tlv::new(TAG_UTC_TIME, b"350101000000Z".to_vec()),
                ],
            ),
            rdn_name(subject),
            subject_public_key_info(subject_key),
        ],
    );

    let signature: Signature = issuer_key.sign(&tbs.encoded());
    let mut signature_bits = vec![0u8];
    signature_bits.extend_from_slice(signature.to_der().as_bytes());

    Tlv::constructed(
        TAG_SEQUENCE,
        &[
            tbs,
            algorithm_ecdsa_sha256(),
            Tlv::new(TAG_BIT_STRING, signature_bits),
        ],
    )
    .encoded()
}

fn attribute(oid: &[u8], value: Tlv) -> Tlv {
    Tlv::constructed(
        TAG_SEQUENCE,
        &[
            Tlv::new(TAG_OID, oid.to_vec()),
            Tlv::constructed(TAG_SET, &[value]),
        ],
    )
}

/// Build an EF.CardSecurity object: `content` signed by `signer`.
pub fn chip_security_object(signer: &KeyedCertificate, content: &[u8]) -> Vec<u8> {
    let content_digest = Sha256::digest(content);
    let signed_attributes = [
        attribute(
            &OID_CONTENT_TYPE,
            Tlv::new(TAG_OID, OID_SECURITY_OBJECT.to_vec()),
        ),
        attribute(
            &OID_MESSAGE_DIGEST,
            Tlv::new(TAG_OCTET_STRING, content_digest.to_vec()),
        ),
    ];
    let attrs_set = Tlv::constructed(TAG_SET, &signed_attributes);
    let signature: Signature = signer.key.sign(&attrs_set.encoded());

    // same content, tagged [0] IMPLICIT inside the signer info
    let attrs_implicit = Tlv::new(TAG_CONTEXT_0, attrs_set.value.clone());

    let sha256_alg = Tlv::constructed(TAG_SEQUENCE, &[Tlv::new(TAG_OID, OID_SHA256.to_vec())]);
    let signer_info = Tlv::constructed(
        TAG_SEQUENCE,
        &[
            Tlv::new(TAG_INTEGER, vec![0x01]),
            // issuer and serial number
            Tlv::constructed(
                TAG_SEQUENCE,
                &[rdn_name(&signer.name), Tlv::new(TAG_INTEGER, vec![0x01])],
            ),
            sha256_alg.clone(),
            attrs_implicit,
            algorithm_ecdsa_sha256(),
            Tlv::new(TAG_OCTET_STRING, signature.to_der().as_bytes().to_vec()),
        ],
    );

    let encap_content = Tlv::constructed(
        TAG_SEQUENCE,
        &[
            Tlv::new(TAG_OID, OID_SECURITY_OBJECT.to_vec()),
            Tlv::constructed(
                TAG_CONTEXT_0,
                &[Tlv::new(TAG_OCTET_STRING, content.to_vec())],
            ),
        ],
    );

    let signed_data = Tlv::constructed(
        TAG_SEQUENCE,
        &[
            Tlv::new(TAG_INTEGER, vec![0x03]),
            Tlv::constructed(TAG_SET, &[sha256_alg]),
            encap_content,
            Tlv::new(TAG_CONTEXT_0, signer.certificate.clone()),
            Tlv::constructed(TAG_SET, &[signer_info]),
        ],
    );

    Tlv::constructed(
        TAG_SEQUENCE,
        &[
            Tlv::new(TAG_OID, OID_SIGNED_DATA.to_vec()),
            Tlv::constructed(TAG_CONTEXT_0, &[signed_data]),
        ],
    )
    .encoded()
}
