//! Canonical addressing for one-to-one conversations.
//!
//! A thread is the unordered pair of its two participants. Its key is the two
//! identifiers sorted lexicographically and joined with [`THREAD_ID_SEPARATOR`],
//! so the same pair always yields the same key regardless of who sends first.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Joins the two sorted participant identifiers. Never valid inside an identifier.
pub const THREAD_ID_SEPARATOR: char = '_';

/// Reasons a pair of identifiers cannot be turned into a thread key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadIdError {
    /// One of the identifiers is empty (or the nil UUID).
    #[error("participant identifier must not be empty")]
    Empty,
    /// An identifier carries leading or trailing whitespace.
    #[error("participant identifier must not be padded with whitespace: {0:?}")]
    Padded(String),
    /// An identifier contains the separator and would make keys ambiguous.
    #[error("participant identifier must not contain '{THREAD_ID_SEPARATOR}': {0}")]
    ContainsSeparator(String),
    /// A stored key does not split into exactly two identifiers.
    #[error("malformed thread id: {0}")]
    Malformed(String),
}

/// Order-independent conversation key derived from two participants.
///
/// Deserializing goes through [`ThreadId::parse`], so only canonical keys are
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
pub struct ThreadId(String);

impl ThreadId {
    /// Resolves the canonical key for two participant identifiers.
    ///
    /// # Errors
    /// Returns [`ThreadIdError::Empty`] for a blank identifier,
    /// [`ThreadIdError::Padded`] for one with surrounding whitespace and
    /// [`ThreadIdError::ContainsSeparator`] when an identifier would collide
    /// with the separator.
    pub fn resolve(a: &str, b: &str) -> Result<Self, ThreadIdError> {
        let a = validate_participant(a)?;
        let b = validate_participant(b)?;

        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self(format!("{first}{THREAD_ID_SEPARATOR}{second}")))
    }

    /// Resolves the key for two user ids using their hyphenated string form.
    ///
    /// # Errors
    /// Returns [`ThreadIdError::Empty`] when either id is the nil UUID.
    pub fn between(a: Uuid, b: Uuid) -> Result<Self, ThreadIdError> {
        if a.is_nil() || b.is_nil() {
            return Err(ThreadIdError::Empty);
        }
        Self::resolve(&a.hyphenated().to_string(), &b.hyphenated().to_string())
    }

    /// Parses an already-resolved key, checking that it is canonical.
    ///
    /// # Errors
    /// Returns [`ThreadIdError::Malformed`] when the key is not the resolved
    /// form of two identifiers.
    pub fn parse(raw: &str) -> Result<Self, ThreadIdError> {
        let (a, b) = raw
            .split_once(THREAD_ID_SEPARATOR)
            .ok_or_else(|| ThreadIdError::Malformed(raw.to_string()))?;
        let resolved =
            Self::resolve(a, b).map_err(|_| ThreadIdError::Malformed(raw.to_string()))?;
        if resolved.0 == raw {
            Ok(resolved)
        } else {
            Err(ThreadIdError::Malformed(raw.to_string()))
        }
    }

    /// The two participant identifiers, in canonical order.
    #[must_use]
    pub fn participants(&self) -> (&str, &str) {
        self.0
            .split_once(THREAD_ID_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    /// The participants as user ids, when both are UUIDs.
    #[must_use]
    pub fn participant_ids(&self) -> Option<(Uuid, Uuid)> {
        let (a, b) = self.participants();
        Some((Uuid::parse_str(a).ok()?, Uuid::parse_str(b).ok()?))
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ThreadId {
    type Error = ThreadIdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<ThreadId> for String {
    fn from(id: ThreadId) -> Self {
        id.0
    }
}

impl AsRef<str> for ThreadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Identifiers are opaque: anything that would need normalizing is rejected
// instead, otherwise two different pairs could share a key.
fn validate_participant(id: &str) -> Result<&str, ThreadIdError> {
    if id.trim().is_empty() {
        return Err(ThreadIdError::Empty);
    }
    if id.trim() != id {
        return Err(ThreadIdError::Padded(id.to_string()));
    }
    if id.contains(THREAD_ID_SEPARATOR) {
        return Err(ThreadIdError::ContainsSeparator(id.to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn resolve_is_symmetric() {
        let pairs = [
            ("alice", "bob"),
            ("64f1c2", "64f1c1"),
            ("b", "a"),
            ("same", "same"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                ThreadId::resolve(a, b).unwrap(),
                ThreadId::resolve(b, a).unwrap()
            );
        }
    }

    #[test]
    fn resolve_sorts_and_joins() {
        let id = ThreadId::resolve("zed", "amy").unwrap();
        assert_eq!(id.as_str(), "amy_zed");
        assert_eq!(id.participants(), ("amy", "zed"));
    }

    #[test]
    fn distinct_pairs_never_collide() {
        let users: Vec<Uuid> = (0..24).map(|_| Uuid::new_v4()).collect();
        let mut seen: HashMap<ThreadId, (Uuid, Uuid)> = HashMap::new();

        for (i, a) in users.iter().enumerate() {
            for b in users.iter().skip(i + 1) {
                let id = ThreadId::between(*a, *b).unwrap();
                if let Some(previous) = seen.insert(id.clone(), (*a, *b)) {
                    panic!("{id} produced by {previous:?} and {:?}", (a, b));
                }
            }
        }
        assert_eq!(seen.len(), 24 * 23 / 2);
    }

    #[test]
    fn prefix_sharing_ids_stay_distinct() {
        // "ab"+"c" and "a"+"bc" would collide without a separator.
        let left = ThreadId::resolve("ab", "c").unwrap();
        let right = ThreadId::resolve("a", "bc").unwrap();
        assert_ne!(left, right);
    }

    #[test]
    fn padded_ids_are_rejected_not_normalized() {
        assert_eq!(
            ThreadId::resolve(" a", "b"),
            Err(ThreadIdError::Padded(" a".to_string()))
        );
        assert!(matches!(
            ThreadId::resolve("a", "b\n"),
            Err(ThreadIdError::Padded(_))
        ));
        assert_eq!(ThreadId::resolve("a", "b").unwrap().as_str(), "a_b");
        assert!(ThreadId::parse(" a_b").is_err());
    }

    #[test]
    fn empty_and_separator_ids_are_rejected() {
        assert_eq!(ThreadId::resolve("", "bob"), Err(ThreadIdError::Empty));
        assert_eq!(ThreadId::resolve("alice", "   "), Err(ThreadIdError::Empty));
        assert!(matches!(
            ThreadId::resolve("al_ice", "bob"),
            Err(ThreadIdError::ContainsSeparator(_))
        ));
        assert_eq!(
            ThreadId::between(Uuid::nil(), Uuid::new_v4()),
            Err(ThreadIdError::Empty)
        );
    }

    #[test]
    fn between_round_trips_participant_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let id = ThreadId::between(a, b).unwrap();

        let (first, second) = id.participant_ids().unwrap();
        assert!((first, second) == (a, b) || (first, second) == (b, a));
        assert!(first < second);
    }

    #[test]
    fn parse_accepts_only_canonical_keys() {
        assert_eq!(
            ThreadId::parse("amy_zed").unwrap(),
            ThreadId::resolve("zed", "amy").unwrap()
        );
        assert!(ThreadId::parse("zed_amy").is_err());
        assert!(ThreadId::parse("amyzed").is_err());
        assert!(ThreadId::parse("a_b_c").is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ThreadId::resolve("x", "y").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"x_y\"");
    }

    #[test]
    fn deserializing_validates_the_key() {
        let id: ThreadId = serde_json::from_str("\"x_y\"").unwrap();
        assert_eq!(id, ThreadId::resolve("y", "x").unwrap());

        assert!(serde_json::from_str::<ThreadId>("\"y_x\"").is_err());
        assert!(serde_json::from_str::<ThreadId>("\"xy\"").is_err());
        assert!(serde_json::from_str::<ThreadId>("\" x_y\"").is_err());
    }
}
