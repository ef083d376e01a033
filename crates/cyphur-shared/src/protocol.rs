//! The relay wire protocol.
//!
//! Every event exchanged between Cyphur peers is one variant of
//! [`RelayEvent`], serialized to a bincode frame. Recipient resolution is
//! the sender's job; a receiver applies whatever reaches it idempotently.
//! Delivery is fire-and-forget: no acks, no retries, no ordering beyond
//! what the host bus happens to provide.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::PROTOCOL_VERSION;
use crate::error::ProtocolError;
use crate::message::Message;
use crate::types::{ConversationRef, GroupId, MessageId, PrivateKey, UserId};

/// All wire events exchanged between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RelayEvent {
    /// A private message between two users. With `relay: true` this is the
    /// stealth copy addressed to privileged observers only.
    PrivateMessage(PrivateMessage),

    /// A message to a group. Same `relay` rule for non-member observers.
    GroupMessage(GroupMessage),

    /// Destructive in-place edit of an existing message.
    MessageEdited(MessageEdited),

    /// Hard delete of an existing message.
    MessageDeleted(MessageDeleted),

    /// A user toggled an emoji reaction.
    ReactionToggled(ReactionToggled),

    /// Typing indicator start/stop.
    Typing(Typing),

    /// A group was created; sent to its initial members.
    GroupCreated(GroupCreated),

    /// Group name or membership changed.
    GroupUpdated(GroupUpdated),

    /// A group was deleted; sent to all former members.
    GroupDeleted(GroupDeleted),

    /// A reconnecting peer asks the privileged peer for authoritative
    /// snapshots of every conversation it participates in.
    SyncRequest(SyncRequest),

    /// Answer to a sync request: private-conversation snapshots.
    PrivateSync(PrivateSync),

    /// Answer to a sync request: group snapshots.
    GroupSync(GroupSync),

    /// A privileged user pushes a background reference to chosen targets.
    BackgroundShare(BackgroundShare),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub from: UserId,
    pub to: UserId,
    pub message: Message,
    /// True on the stealth copy addressed to observers. Never set on the
    /// frame the addressee receives.
    pub relay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessage {
    pub group_id: GroupId,
    /// Display name at send time, so a non-member observer can label its
    /// interception record without holding the group.
    pub group_name: String,
    pub message: Message,
    /// True on the stealth copy addressed to non-member observers.
    pub relay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEdited {
    pub conv: ConversationRef,
    pub message_id: MessageId,
    pub new_content: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub conv: ConversationRef,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionToggled {
    pub conv: ConversationRef,
    pub message_id: MessageId,
    pub emoji: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Typing {
    pub conv: ConversationRef,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group: GroupSnapshot,
}

/// Carries the updated metadata snapshot (messages omitted) rather than a
/// patch, so a newly added member can build its local record; removed
/// members drop theirs on receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupUpdated {
    pub group: GroupSnapshot,
}

/// Partial group mutation. `members`, when present, replaces the whole
/// member set (the creator is re-added by the store).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub members: Option<BTreeSet<UserId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDeleted {
    pub group_id: GroupId,
    pub deleted_by: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub requester: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateSync {
    pub conversations: Vec<PrivateSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSync {
    pub groups: Vec<GroupSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundShare {
    pub background: String,
    pub scope: BackgroundScope,
    pub shared_by: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackgroundScope {
    Global,
    Conversation(ConversationRef),
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Authoritative copy of a private conversation, pushed during sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateSnapshot {
    pub key: PrivateKey,
    pub messages: Vec<Message>,
}

/// Authoritative copy of a group, pushed at creation and during sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub name: String,
    pub members: BTreeSet<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl RelayEvent {
    /// Serialize to a wire frame: one protocol-version byte, then the
    /// bincode body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![PROTOCOL_VERSION];
        bincode::serialize_into(&mut out, self).map_err(ProtocolError::Encode)?;
        Ok(out)
    }

    /// Deserialize a wire frame, rejecting unknown protocol versions.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        match data.split_first() {
            None => Err(ProtocolError::Empty),
            Some((&PROTOCOL_VERSION, body)) => {
                bincode::deserialize(body).map_err(ProtocolError::Decode)
            }
            Some((&version, _)) => Err(ProtocolError::Version(version)),
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrivateMessage(_) => "private-message",
            Self::GroupMessage(_) => "group-message",
            Self::MessageEdited(_) => "message-edited",
            Self::MessageDeleted(_) => "message-deleted",
            Self::ReactionToggled(_) => "reaction-toggled",
            Self::Typing(_) => "typing",
            Self::GroupCreated(_) => "group-created",
            Self::GroupUpdated(_) => "group-updated",
            Self::GroupDeleted(_) => "group-deleted",
            Self::SyncRequest(_) => "sync-request",
            Self::PrivateSync(_) => "private-sync",
            Self::GroupSync(_) => "group-sync",
            Self::BackgroundShare(_) => "background-share",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message as Msg;

    #[test]
    fn relay_event_round_trip() {
        let from = UserId::from("u1");
        let to = UserId::from("u2");
        let event = RelayEvent::PrivateMessage(PrivateMessage {
            from: from.clone(),
            to: to.clone(),
            message: Msg::new(from, "Ulrik", "meet me at the docks"),
            relay: false,
        });

        let bytes = event.to_bytes().unwrap();
        let restored = RelayEvent::from_bytes(&bytes).unwrap();

        if let (RelayEvent::PrivateMessage(orig), RelayEvent::PrivateMessage(rest)) =
            (&event, &restored)
        {
            assert_eq!(orig.message.id, rest.message.id);
            assert_eq!(orig.message.content, rest.message.content);
            assert_eq!(rest.to, to);
            assert!(!rest.relay);
        } else {
            panic!("Event kind mismatch");
        }
    }

    #[test]
    fn undecodable_frame_is_an_error() {
        assert!(matches!(
            RelayEvent::from_bytes(&[0xFF; 3]),
            Err(ProtocolError::Version(0xFF))
        ));
        assert!(matches!(RelayEvent::from_bytes(&[]), Err(ProtocolError::Empty)));
        // Right version, garbage body.
        assert!(matches!(
            RelayEvent::from_bytes(&[crate::constants::PROTOCOL_VERSION, 0xFF, 0xFF]),
            Err(ProtocolError::Decode(_))
        ));
    }
}
