//! Certificate holder authorization templates (CHAT) and the rights
//! negotiation between relying party, terminal certificate, card and holder.
//!
//! A template is five bytes of access bits. Bit 0 is the least significant
//! bit of the last byte; read access to data group n sits at bit `8 + n - 1`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::definitions::attribute::AttributeKey;

/// One access bit of an authentication-terminal template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessRight {
    AgeVerification,
    CommunityIdVerification,
    RestrictedIdentification,
    PrivilegedTerminal,
    CanAllowed,
    PinManagement,
    InstallCertificate,
    InstallQualifiedCertificate,
    /// Read access to data group 1..=22.
    ReadDataGroup(u8),
    PsAuthentication,
    /// Engine-internal bit in an RFU position: lets a card strip the
    /// document-validity check like any other right.
    DocumentValidity,
}

impl AccessRight {
    pub fn bit(&self) -> u8 {
        match self {
            AccessRight::AgeVerification => 0,
            AccessRight::CommunityIdVerification => 1,
            AccessRight::RestrictedIdentification => 2,
            AccessRight::PrivilegedTerminal => 3,
            AccessRight::CanAllowed => 4,
            AccessRight::PinManagement => 5,
            AccessRight::InstallCertificate => 6,
            AccessRight::InstallQualifiedCertificate => 7,
            AccessRight::ReadDataGroup(n) => 8 + (n - 1),
            AccessRight::PsAuthentication => 30,
            AccessRight::DocumentValidity => 31,
        }
    }

    /// The permission bit a requested attribute maps to. Keys the card
    /// answers without an access right return `None`.
    pub fn for_key(key: AttributeKey) -> Option<AccessRight> {
        if let Some(dg) = key.data_group() {
            return Some(AccessRight::ReadDataGroup(dg.sfid));
        }
        match key {
            AttributeKey::AgeVerification => Some(AccessRight::AgeVerification),
            AttributeKey::MunicipalityIdVerification => {
                Some(AccessRight::CommunityIdVerification)
            }
            AttributeKey::RestrictedId => Some(AccessRight::RestrictedIdentification),
            AttributeKey::DocumentValidity => Some(AccessRight::DocumentValidity),
            AttributeKey::PseudonymousSignatureAuth => Some(AccessRight::PsAuthentication),
            _ => None,
        }
    }
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRight::ReadDataGroup(n) => write!(f, "Read DG{n:02}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A five-byte rights template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat([u8; 5]);

impl Chat {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: [u8; 5]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn bytes(&self) -> [u8; 5] {
        self.0
    }

    pub fn set(&mut self, right: AccessRight) {
        let bit = right.bit();
        self.0[4 - (bit / 8) as usize] |= 1 << (bit % 8);
    }

    pub fn has(&self, right: AccessRight) -> bool {
        let bit = right.bit();
        self.0[4 - (bit / 8) as usize] & (1 << (bit % 8)) != 0
    }

    pub fn union(&self, other: &Chat) -> Chat {
        let mut out = [0u8; 5];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] | other.0[i];
        }
        Chat(out)
    }

    pub fn intersection(&self, other: &Chat) -> Chat {
        let mut out = [0u8; 5];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] & other.0[i];
        }
        Chat(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 5]
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthorizationError {
    /// A terminal must never ask the card for more than its own certificate
    /// authorizes it to ask.
    #[error("chat option not allowed for this terminal: {0}")]
    NotAllowed(AccessRight),
}

/// Build the rights template requesting `fields`, verifying each bit against
/// the terminal certificate's own template.
pub fn build_template(
    fields: &BTreeSet<AttributeKey>,
    terminal_chat: &Chat,
) -> Result<Chat, AuthorizationError> {
    let mut chat = Chat::empty();
    for key in fields {
        let Some(right) = AccessRight::for_key(*key) else {
            continue;
        };
        if !terminal_chat.has(right) {
            return Err(AuthorizationError::NotAllowed(right));
        }
        chat.set(right);
    }
    Ok(chat)
}

/// Rights of one session after the card handshake. Computed once at the
/// EAC1 → EAC2 transition and frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveRights {
    required: Chat,
    optional: Chat,
    modified: Chat,
    effective: Chat,
}

/// Intersect what was asked for with what the card actually granted. A
/// missing card template means the card granted the full request.
pub fn apply_card_modification(
    required: &Chat,
    optional: &Chat,
    card_template: Option<&Chat>,
) -> EffectiveRights {
    let requested = required.union(optional);
    let modified = card_template.copied().unwrap_or(requested);
    EffectiveRights {
        required: *required,
        optional: *optional,
        modified,
        effective: requested.intersection(&modified),
    }
}

impl EffectiveRights {
    pub fn effective(&self) -> &Chat {
        &self.effective
    }

    pub fn allows(&self, right: AccessRight) -> bool {
        self.effective.has(right)
    }

    pub fn allows_key(&self, key: AttributeKey) -> bool {
        AccessRight::for_key(key)
            .map(|right| self.effective.has(right))
            .unwrap_or(false)
    }

    /// Was this key required by the relying party but stripped by the card?
    pub fn deselected(&self, key: AttributeKey) -> bool {
        AccessRight::for_key(key)
            .map(|right| self.required.has(right) && !self.effective.has(right))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set_of(keys: &[AttributeKey]) -> BTreeSet<AttributeKey> {
        keys.iter().copied().collect()
    }

    fn permissive_chat() -> Chat {
        Chat::from_bytes([0xff, 0xff, 0xff, 0xff, 0xff])
    }

    #[test]
    fn bit_positions_match_the_template_layout() {
        let mut chat = Chat::empty();
        chat.set(AccessRight::AgeVerification);
        assert_eq!(chat.bytes(), [0, 0, 0, 0, 0x01]);

        let mut chat = Chat::empty();
        chat.set(AccessRight::ReadDataGroup(1));
        assert_eq!(chat.bytes(), [0, 0, 0, 0x01, 0]);

        let mut chat = Chat::empty();
        chat.set(AccessRight::ReadDataGroup(17));
        assert_eq!(chat.bytes(), [0, 0x01, 0, 0, 0]);

        let mut chat = Chat::empty();
        chat.set(AccessRight::ReadDataGroup(22));
        assert_eq!(chat.bytes(), [0, 0x20, 0, 0, 0]);
    }

    #[test]
    fn template_covers_requested_fields() {
        let chat = build_template(
            &set_of(&[AttributeKey::GivenNames, AttributeKey::AgeVerification]),
            &permissive_chat(),
        )
        .unwrap();
        assert!(chat.has(AccessRight::ReadDataGroup(4)));
        assert!(chat.has(AccessRight::AgeVerification));
        assert!(!chat.has(AccessRight::ReadDataGroup(5)));
    }

    #[test]
    fn request_beyond_terminal_rights_is_refused() {
        let mut terminal = Chat::empty();
        terminal.set(AccessRight::ReadDataGroup(4));
        let err = build_template(
            &set_of(&[AttributeKey::GivenNames, AttributeKey::RestrictedId]),
            &terminal,
        )
        .unwrap_err();
        assert_eq!(
            err,
            AuthorizationError::NotAllowed(AccessRight::RestrictedIdentification)
        );
    }

    #[test]
    fn card_modification_strips_required_bit() {
        // scenario: DocumentValidity required, card strips it
        let required = build_template(
            &set_of(&[AttributeKey::DocumentValidity]),
            &permissive_chat(),
        )
        .unwrap();
        let optional = Chat::empty();
        let rights = apply_card_modification(&required, &optional, Some(&Chat::empty()));
        assert!(rights.effective().is_empty());
        assert!(rights.deselected(AttributeKey::DocumentValidity));
        assert!(!rights.allows_key(AttributeKey::DocumentValidity));
    }

    #[test]
    fn absent_card_template_grants_the_request() {
        let required = build_template(&set_of(&[AttributeKey::BirthName]), &permissive_chat())
            .unwrap();
        let rights = apply_card_modification(&required, &Chat::empty(), None);
        assert!(rights.allows_key(AttributeKey::BirthName));
        assert!(!rights.deselected(AttributeKey::BirthName));
    }
}
