//! Conversation containers held by the store.
//!
//! Both variants own a bounded message list; eviction and dedup are
//! enforced by [`ConversationStore`](crate::ConversationStore), not here.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cyphur_shared::message::Message;
use cyphur_shared::protocol::{GroupSnapshot, PrivateSnapshot};
use cyphur_shared::types::{GroupId, PrivateKey, UserId};

// ---------------------------------------------------------------------------
// Private conversation
// ---------------------------------------------------------------------------

/// A two-party conversation. Never deleted, only cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateConversation {
    /// Order-independent key derived from the two participant ids.
    pub key: PrivateKey,
    pub messages: Vec<Message>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl PrivateConversation {
    pub fn new(key: PrivateKey) -> Self {
        Self {
            key,
            messages: Vec::new(),
            last_activity: None,
        }
    }

    pub fn participants(&self) -> Option<(UserId, UserId)> {
        self.key.participants()
    }

    pub fn snapshot(&self) -> PrivateSnapshot {
        PrivateSnapshot {
            key: self.key.clone(),
            messages: self.messages.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named multi-party conversation with explicit membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Always contains `created_by`.
    pub members: BTreeSet<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Group {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            id: self.id,
            name: self.name.clone(),
            members: self.members.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            messages: self.messages.clone(),
        }
    }

    pub fn from_snapshot(snap: GroupSnapshot) -> Self {
        let last_activity = snap.messages.last().map(|m| m.timestamp);
        Self {
            id: snap.id,
            name: snap.name,
            members: snap.members,
            created_by: snap.created_by,
            created_at: snap.created_at,
            messages: snap.messages,
            last_activity,
        }
    }
}
