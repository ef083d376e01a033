//! Notifications the session publishes for a presentation layer.
//!
//! The UI holds the receiving half of an unbounded channel; a dropped
//! receiver silently disables notifications without affecting the session.

use cyphur_shared::types::{ConversationRef, GroupId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    MessageReceived {
        conv: ConversationRef,
        message_id: MessageId,
    },
    MessageSent {
        conv: ConversationRef,
        message_id: MessageId,
    },
    MessageEdited {
        conv: ConversationRef,
        message_id: MessageId,
    },
    MessageDeleted {
        conv: ConversationRef,
        message_id: MessageId,
    },
    ReactionChanged {
        conv: ConversationRef,
        message_id: MessageId,
    },
    TypingChanged {
        conv: ConversationRef,
    },
    GroupChanged {
        group_id: GroupId,
    },
    GroupRemoved {
        group_id: GroupId,
    },
    InterceptionUpdated,
    BackgroundChanged,
    SyncApplied {
        messages_added: usize,
    },
}
