use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PRIVATE_KEY_SEPARATOR;

// User identity is supplied by the host's authenticated session; it is an
// opaque string from Cyphur's point of view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Order-independent key for a private conversation: both participant ids
/// sorted and joined, so either party computes the same key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn of(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self(format!("{}{}{}", lo.0, PRIVATE_KEY_SEPARATOR, hi.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participant ids, in sorted order.
    pub fn participants(&self) -> Option<(UserId, UserId)> {
        let (lo, hi) = self.0.split_once(PRIVATE_KEY_SEPARATOR)?;
        Some((UserId::new(lo), UserId::new(hi)))
    }

    pub fn includes(&self, user: &UserId) -> bool {
        self.participants()
            .map(|(a, b)| a == *user || b == *user)
            .unwrap_or(false)
    }

    /// The participant that is not `user`, if `user` is a party.
    pub fn other_party(&self, user: &UserId) -> Option<UserId> {
        let (a, b) = self.participants()?;
        if a == *user {
            Some(b)
        } else if b == *user {
            Some(a)
        } else {
            None
        }
    }
}

impl std::fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to either variant of conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationRef {
    Private(PrivateKey),
    Group(GroupId),
}

impl ConversationRef {
    pub fn private(a: &UserId, b: &UserId) -> Self {
        Self::Private(PrivateKey::of(a, b))
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private(_))
    }
}

impl std::fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private(key) => write!(f, "private:{key}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_is_order_independent() {
        let a = UserId::from("ulrik");
        let b = UserId::from("brenna");
        assert_eq!(PrivateKey::of(&a, &b), PrivateKey::of(&b, &a));
    }

    #[test]
    fn private_key_participants_round_trip() {
        let a = UserId::from("ulrik");
        let b = UserId::from("brenna");
        let key = PrivateKey::of(&a, &b);

        let (lo, hi) = key.participants().unwrap();
        assert_eq!(lo, b); // sorted: "brenna" < "ulrik"
        assert_eq!(hi, a);
        assert!(key.includes(&a));
        assert_eq!(key.other_party(&a), Some(b));
        assert_eq!(key.other_party(&UserId::from("nobody")), None);
    }
}
