//! Per-session result container.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::attribute::AttributeKey;
use super::outcome::Outcome;
use super::value::AttributeValue;

/// Terminal status of an authentication session.
///
/// Stays [`SessionStatus::Failed`] until the engine explicitly decides
/// otherwise, so an aborted session can never read as valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    Failed,
    Valid,
    Expired,
    Revoked,
    NotAuthentic,
}

/// Everything a session produced: decoded attributes, the terminal status
/// and, on error, the outcome that ended the session.
///
/// Created once per session and mutated only by the protocol engine; the
/// caller reads it after the session reports finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultContainer {
    attributes: HashMap<AttributeKey, AttributeValue>,
    status: SessionStatus,
    outcome: Option<Outcome>,
}

impl ResultContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decoded value. Last write for a key wins.
    pub fn put(&mut self, key: AttributeKey, value: AttributeValue) {
        self.attributes.insert(key, value);
    }

    pub fn get(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn contains(&self, key: &AttributeKey) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn attributes(&self) -> &HashMap<AttributeKey, AttributeValue> {
        &self.attributes
    }

    /// Drop everything collected so far. Used when a revoked or expired
    /// document must not leak previously read attributes.
    pub fn clear_attributes(&mut self) {
        self.attributes.clear();
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_status_is_failed() {
        let container = ResultContainer::new();
        assert_eq!(container.status(), SessionStatus::Failed);
        assert!(container.outcome().is_none());
    }

    #[test]
    fn last_write_wins() {
        let mut container = ResultContainer::new();
        container.put(
            AttributeKey::GivenNames,
            AttributeValue::Text("ERIKA".into()),
        );
        container.put(
            AttributeKey::GivenNames,
            AttributeValue::Text("MAX".into()),
        );
        assert_eq!(
            container.get(&AttributeKey::GivenNames),
            Some(&AttributeValue::Text("MAX".into()))
        );
        assert_eq!(container.attributes().len(), 1);
    }

    #[test]
    fn clear_empties_the_map() {
        let mut container = ResultContainer::new();
        container.put(AttributeKey::Sex, AttributeValue::Text("F".into()));
        container.clear_attributes();
        assert!(container.attributes().is_empty());
    }
}
