//! Process-wide registry of card-verifiable certificates and terminal keys.
//!
//! Every active session inserts the certificates it was handed and resolves
//! the chain for terminal authentication against the shared state. The
//! registry is an explicit handle — clone it into each session; tests get
//! isolation by creating their own.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::definitions::helpers::tlv::{self, Tlv};
use crate::session_input::TerminalCredential;

const TAG_CV_CERTIFICATE: u32 = 0x7f21;
const TAG_CERTIFICATE_BODY: u32 = 0x7f4e;
const TAG_CA_REFERENCE: u32 = 0x42;
const TAG_HOLDER_REFERENCE: u32 = 0x5f20;
const TAG_CHAT: u32 = 0x7f4c;
const TAG_CHAT_TEMPLATE: u32 = 0x53;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed certificate structure: {0}")]
    Structure(#[from] tlv::Error),
    #[error("holder or issuer reference is not valid UTF-8")]
    ReferenceEncoding,
    #[error("authorization template must be 5 bytes, found {0}")]
    TemplateLength(usize),
}

/// A parsed card-verifiable certificate. Only the fields the engine chains
/// and negotiates on are extracted; the encoded form is kept for
/// presentation to the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvCertificate {
    holder_reference: String,
    issuer_reference: String,
    chat_template: [u8; 5],
    encoded: Vec<u8>,
}

impl CvCertificate {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let outer = Tlv::parse(data)?;
        let body = if outer.tag == TAG_CV_CERTIFICATE {
            outer.require_child(TAG_CERTIFICATE_BODY)?
        } else if outer.tag == TAG_CERTIFICATE_BODY {
            outer
        } else {
            return Err(tlv::Error::MissingElement(TAG_CERTIFICATE_BODY).into());
        };

        let issuer = reference_string(&body.require_child(TAG_CA_REFERENCE)?)?;
        let holder = reference_string(&body.require_child(TAG_HOLDER_REFERENCE)?)?;
        let chat = body.require_child(TAG_CHAT)?;
        let template = chat.require_child(TAG_CHAT_TEMPLATE)?;
        let chat_template: [u8; 5] = template
            .value
            .as_slice()
            .try_into()
            .map_err(|_| Error::TemplateLength(template.value.len()))?;

        Ok(Self {
            holder_reference: holder,
            issuer_reference: issuer,
            chat_template,
            encoded: data.to_vec(),
        })
    }

    pub fn holder_reference(&self) -> &str {
        &self.holder_reference
    }

    pub fn issuer_reference(&self) -> &str {
        &self.issuer_reference
    }

    pub fn chat_template(&self) -> [u8; 5] {
        self.chat_template
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    fn is_self_signed(&self) -> bool {
        self.holder_reference == self.issuer_reference
    }
}

fn reference_string(tlv: &Tlv) -> Result<String, Error> {
    String::from_utf8(tlv.value.clone()).map_err(|_| Error::ReferenceEncoding)
}

#[derive(Default)]
struct Store {
    certificates: HashMap<String, CvCertificate>,
    keys: HashMap<String, Vec<u8>>,
}

/// Shared certificate/key store. Cheap to clone; all clones see the same
/// state. Inserts are first-writer-wins per holder name.
#[derive(Clone, Default)]
pub struct CertificateRegistry {
    store: Arc<RwLock<Store>>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an issuer or link certificate. If the holder is already
    /// known the new bytes are discarded.
    pub fn insert_certificate(&self, data: &[u8]) -> Result<(), Error> {
        let cert = CvCertificate::parse(data)?;
        let mut store = self.store.write().expect("registry lock poisoned");
        self.insert_parsed(&mut store, cert);
        Ok(())
    }

    /// Register a terminal certificate together with its private key. The
    /// key is only stored if no key is held for that holder yet.
    pub fn insert_terminal_certificate(
        &self,
        credential: &TerminalCredential,
    ) -> Result<(), Error> {
        let cert = CvCertificate::parse(&credential.certificate)?;
        let holder = cert.holder_reference().to_string();
        let mut store = self.store.write().expect("registry lock poisoned");
        self.insert_parsed(&mut store, cert);
        if store.keys.contains_key(&holder) {
            debug!(holder = %holder, "terminal key already present");
        } else {
            store.keys.insert(holder, credential.private_key.clone());
        }
        Ok(())
    }

    fn insert_parsed(&self, store: &mut Store, cert: CvCertificate) {
        let holder = cert.holder_reference().to_string();
        if store.certificates.contains_key(&holder) {
            debug!(holder = %holder, "certificate already present, keeping first");
        } else {
            debug!(holder = %holder, issuer = cert.issuer_reference(), "certificate added");
            store.certificates.insert(holder, cert);
        }
    }

    /// Ordered chain from `terminal_holder` up to, but excluding,
    /// `root_holder`. `None` when no complete chain exists; a registry with
    /// an issuer cycle counts as no chain.
    pub fn resolve_chain(
        &self,
        root_holder: &str,
        terminal_holder: &str,
    ) -> Option<Vec<Vec<u8>>> {
        if root_holder.is_empty() || terminal_holder.is_empty() {
            return None;
        }
        let store = self.store.read().expect("registry lock poisoned");
        let mut chain: Vec<Vec<u8>> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = terminal_holder.to_string();
        loop {
            if !visited.insert(current.clone()) {
                debug!(holder = %current, "issuer cycle detected, no chain");
                return None;
            }
            let cert = match store.certificates.get(&current) {
                Some(cert) => cert,
                None => {
                    debug!(holder = %current, "holder not available, no chain");
                    return None;
                }
            };
            let issuer = cert.issuer_reference();
            if cert.is_self_signed() {
                // self-signed boundary: the chain is complete only if this
                // is the root we were asked for, and the root itself is not
                // part of the presented chain
                return (issuer == root_holder).then_some(chain);
            }
            chain.insert(0, cert.encoded().to_vec());
            if issuer == root_holder {
                return Some(chain);
            }
            current = issuer.to_string();
        }
    }

    pub fn key_for(&self, holder: &str) -> Option<Vec<u8>> {
        self.store
            .read()
            .expect("registry lock poisoned")
            .keys
            .get(holder)
            .cloned()
    }

    pub fn certificate_for(&self, holder: &str) -> Option<CvCertificate> {
        self.store
            .read()
            .expect("registry lock poisoned")
            .certificates
            .get(holder)
            .cloned()
    }
}

#[cfg(test)]
pub(crate) mod test_certificates {
    use super::*;

    /// Build an encoded CV certificate with the given holder/issuer and
    /// rights template.
    pub fn cv_certificate(holder: &str, issuer: &str, template: [u8; 5]) -> Vec<u8> {
        let chat = Tlv::constructed(
            TAG_CHAT,
            &[
                // id-AT: 0.4.0.127.0.7.3.1.2.2
                Tlv::new(0x06, vec![0x04, 0x00, 0x7f, 0x00, 0x07, 0x03, 0x01, 0x02, 0x02]),
                Tlv::new(TAG_CHAT_TEMPLATE, template.to_vec()),
            ],
        );
        let body = Tlv::constructed(
            TAG_CERTIFICATE_BODY,
            &[
                Tlv::new(0x5f29, vec![0x00]),
                Tlv::new(TAG_CA_REFERENCE, issuer.as_bytes().to_vec()),
                Tlv::new(TAG_HOLDER_REFERENCE, holder.as_bytes().to_vec()),
                chat,
                Tlv::new(0x5f25, b"250101".to_vec()),
                Tlv::new(0x5f24, b"280101".to_vec()),
            ],
        );
        Tlv::constructed(
            TAG_CV_CERTIFICATE,
            &[body, Tlv::new(0x5f37, vec![0u8; 64])],
        )
        .encoded()
    }
}
