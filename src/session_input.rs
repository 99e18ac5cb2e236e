//! Input a relying party supplies when constructing a session.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definitions::attribute::AttributeKey;

/// Blacklist lookup for sector-specific identifiers.
///
/// Implementations are expected to handle very large lists; the engine only
/// ever asks for membership. A lookup error is logged and treated as "not
/// listed" — refusing every card because the list is briefly unavailable
/// would take the whole service down.
pub trait BlacklistConnector: Send + Sync {
    fn contains(&self, sector_specific_id: &[u8]) -> anyhow::Result<bool>;
}

/// Terminal certificate as installed for a service provider: the
/// card-verifiable certificate, its description object and the private key
/// belonging to the certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalCredential {
    #[serde(with = "serde_bytes")]
    pub certificate: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub description: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub private_key: Vec<u8>,
    /// Sector public key used for restricted and blocking identification.
    #[serde(with = "serde_bytes")]
    pub sector_public_key: Vec<u8>,
}

/// Everything one authentication session needs from the outside. Provided at
/// construction, read-only afterwards.
#[derive(Clone)]
pub struct SessionInput {
    pub session_id: Uuid,
    pub required_fields: BTreeSet<AttributeKey>,
    pub optional_fields: BTreeSet<AttributeKey>,
    pub terminal_credential: TerminalCredential,
    /// DV and link certificates, excluding terminal and root.
    pub cvc_chain: Vec<Vec<u8>>,
    /// Trusted document-signer certificates (DER X.509).
    pub master_list: Vec<Vec<u8>>,
    pub defect_list: Option<Vec<u8>>,
    pub blacklist: Arc<dyn BlacklistConnector>,
    pub transaction_info: Option<String>,
    pub required_age: Option<i32>,
    pub required_community_id: Option<String>,
    /// Message to be signed pseudonymously, if the service uses PSM.
    pub ps_message: Option<Vec<u8>>,
    /// Prefix put in front of every log line of this session.
    pub log_prefix: String,
}

impl fmt::Debug for SessionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInput")
            .field("session_id", &self.session_id)
            .field("required_fields", &self.required_fields)
            .field("optional_fields", &self.optional_fields)
            .field("transaction_info", &self.transaction_info)
            .field("required_age", &self.required_age)
            .field("required_community_id", &self.required_community_id)
            .finish_non_exhaustive()
    }
}

impl SessionInput {
    /// All requested fields, required first.
    pub fn requested_fields(&self) -> BTreeSet<AttributeKey> {
        self.required_fields
            .union(&self.optional_fields)
            .copied()
            .collect()
    }
}
