//! The conversation store: single owner of message history and its
//! invariants.
//!
//! Invariants enforced here:
//! - a message is never present twice in one conversation, by id or by
//!   content fingerprint (absorbs duplicate delivery from the dual-path
//!   relay);
//! - message lists are capped, oldest evicted first;
//! - a group's creator is always a member;
//! - operations on absent conversations or messages return
//!   [`StoreError::NotFound`], they never panic.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use cyphur_shared::constants::{MAX_CONTENT_CHARS, MESSAGE_HISTORY_CAP};
use cyphur_shared::message::Message;
use cyphur_shared::protocol::{GroupPatch, GroupSnapshot, PrivateSnapshot};
use cyphur_shared::types::{ConversationRef, GroupId, MessageId, PrivateKey, UserId};

use crate::error::{Result, StoreError};
use crate::models::{Group, PrivateConversation};

/// Outcome of an append: duplicates are a silent no-op, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    Appended,
    Duplicate,
}

/// Per-client authoritative conversation state. One instance per session;
/// replicas converge through relayed events, not shared memory.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    privates: HashMap<PrivateKey, PrivateConversation>,
    groups: HashMap<GroupId, Group>,
    cap: usize,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_cap(MESSAGE_HISTORY_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            privates: HashMap::new(),
            groups: HashMap::new(),
            cap,
        }
    }

    // -----------------------------------------------------------------------
    // Message operations
    // -----------------------------------------------------------------------

    /// Append a message to a conversation. Private conversations are created
    /// lazily on first message; appending to an unknown group is `NotFound`.
    pub fn append_message(&mut self, conv: &ConversationRef, message: Message) -> Result<Appended> {
        if !message.has_payload() {
            return Err(StoreError::Validation(
                "message needs content or an image".into(),
            ));
        }
        if message.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(StoreError::Validation(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if let Some(image) = &message.image {
            if !image.is_valid() {
                return Err(StoreError::Validation("invalid image payload".into()));
            }
        }

        let cap = self.cap;
        let timestamp = message.timestamp;
        let (messages, last_activity) = match conv {
            ConversationRef::Private(key) => {
                let c = self
                    .privates
                    .entry(key.clone())
                    .or_insert_with(|| PrivateConversation::new(key.clone()));
                (&mut c.messages, &mut c.last_activity)
            }
            ConversationRef::Group(id) => {
                let g = self.groups.get_mut(id).ok_or(StoreError::NotFound)?;
                (&mut g.messages, &mut g.last_activity)
            }
        };

        let fingerprint = message.fingerprint();
        if messages
            .iter()
            .any(|m| m.id == message.id || m.fingerprint() == fingerprint)
        {
            debug!(conv = %conv, msg_id = %message.id, "Duplicate message absorbed");
            return Ok(Appended::Duplicate);
        }

        messages.push(message);
        while messages.len() > cap {
            messages.remove(0);
        }
        *last_activity = Some(timestamp);

        Ok(Appended::Appended)
    }

    /// Destructively overwrite a message's content. No prior-content history
    /// is kept. `edited_at` is supplied by the caller so replicas applying a
    /// relayed edit keep the editor's timestamp.
    pub fn edit_message(
        &mut self,
        conv: &ConversationRef,
        message_id: MessageId,
        new_content: impl Into<String>,
        edited_at: DateTime<Utc>,
    ) -> Result<()> {
        let message = self.message_mut(conv, message_id)?;
        message.content = new_content.into();
        message.edited = true;
        message.edited_at = Some(edited_at);
        Ok(())
    }

    /// Hard-delete a message. Other messages' `reply_to` pointers at it are
    /// left dangling; readers tolerate that.
    pub fn delete_message(&mut self, conv: &ConversationRef, message_id: MessageId) -> Result<()> {
        let messages = self.messages_mut(conv)?;
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        if messages.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Toggle `user`'s reaction under `emoji`. Returns whether the user is a
    /// member of the reaction set after the call.
    pub fn toggle_reaction(
        &mut self,
        conv: &ConversationRef,
        message_id: MessageId,
        emoji: &str,
        user: &UserId,
    ) -> Result<bool> {
        let message = self.message_mut(conv, message_id)?;
        Ok(message.toggle_reaction(emoji, user))
    }

    /// Empty a conversation's history, keeping the shell and membership.
    pub fn clear_history(&mut self, conv: &ConversationRef) -> Result<()> {
        self.messages_mut(conv)?.clear();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Group operations
    // -----------------------------------------------------------------------

    /// Create a group with a fresh id. The creator is forcibly included in
    /// the member set. Returns the snapshot to announce on the wire.
    pub fn create_group(
        &mut self,
        name: impl Into<String>,
        mut members: BTreeSet<UserId>,
        created_by: UserId,
    ) -> GroupSnapshot {
        members.insert(created_by.clone());
        let group = Group {
            id: GroupId::new(),
            name: name.into(),
            members,
            created_by,
            created_at: Utc::now(),
            messages: Vec::new(),
            last_activity: None,
        };
        let snapshot = group.snapshot();
        debug!(group_id = %group.id, name = %group.name, "Group created");
        self.groups.insert(group.id, group);
        snapshot
    }

    /// Apply a name/membership patch. A replaced member set keeps the
    /// creator.
    pub fn update_group(&mut self, id: GroupId, patch: GroupPatch) -> Result<()> {
        let group = self.groups.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = patch.name {
            group.name = name;
        }
        if let Some(mut members) = patch.members {
            members.insert(group.created_by.clone());
            group.members = members;
        }
        Ok(())
    }

    /// Remove a group record entirely. Returns the removed group so the
    /// caller can cascade ephemeral cleanup.
    pub fn delete_group(&mut self, id: GroupId) -> Result<Group> {
        self.groups.remove(&id).ok_or(StoreError::NotFound)
    }

    /// Remove only the local record, used when this client loses membership.
    pub fn forget_group(&mut self, id: GroupId) -> Option<Group> {
        self.groups.remove(&id)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn private(&self, key: &PrivateKey) -> Option<&PrivateConversation> {
        self.privates.get(key)
    }

    /// Get or create the shell of a private conversation.
    pub fn ensure_private(&mut self, key: &PrivateKey) -> &PrivateConversation {
        self.privates
            .entry(key.clone())
            .or_insert_with(|| PrivateConversation::new(key.clone()))
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn privates(&self) -> impl Iterator<Item = &PrivateConversation> {
        self.privates.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn messages(&self, conv: &ConversationRef) -> Option<&[Message]> {
        match conv {
            ConversationRef::Private(key) => {
                self.privates.get(key).map(|c| c.messages.as_slice())
            }
            ConversationRef::Group(id) => self.groups.get(id).map(|g| g.messages.as_slice()),
        }
    }

    pub fn message(&self, conv: &ConversationRef, id: MessageId) -> Option<&Message> {
        self.messages(conv)?.iter().find(|m| m.id == id)
    }

    fn messages_mut(&mut self, conv: &ConversationRef) -> Result<&mut Vec<Message>> {
        match conv {
            ConversationRef::Private(key) => self
                .privates
                .get_mut(key)
                .map(|c| &mut c.messages)
                .ok_or(StoreError::NotFound),
            ConversationRef::Group(id) => self
                .groups
                .get_mut(id)
                .map(|g| &mut g.messages)
                .ok_or(StoreError::NotFound),
        }
    }

    fn message_mut(&mut self, conv: &ConversationRef, id: MessageId) -> Result<&mut Message> {
        self.messages_mut(conv)?
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound)
    }

    // -----------------------------------------------------------------------
    // Snapshots & merge (sync protocol, persistence)
    // -----------------------------------------------------------------------

    /// Snapshots of every private conversation `user` participates in.
    pub fn private_snapshots_for(&self, user: &UserId) -> Vec<PrivateSnapshot> {
        self.privates
            .values()
            .filter(|c| c.key.includes(user))
            .map(|c| c.snapshot())
            .collect()
    }

    /// Snapshots of every group `user` is a member of.
    pub fn group_snapshots_for(&self, user: &UserId) -> Vec<GroupSnapshot> {
        self.groups
            .values()
            .filter(|g| g.is_member(user))
            .map(|g| g.snapshot())
            .collect()
    }

    /// Merge a received private snapshot, filtered to conversations `me`
    /// participates in. Returns how many messages were new.
    pub fn merge_private_snapshot(&mut self, snapshot: PrivateSnapshot, me: &UserId) -> usize {
        if !snapshot.key.includes(me) {
            return 0;
        }
        self.merge_private_snapshot_unchecked(snapshot)
    }

    /// Merge without a participation check; only the persistence loader,
    /// which has already filtered, uses this.
    pub(crate) fn merge_private_snapshot_unchecked(&mut self, snapshot: PrivateSnapshot) -> usize {
        let conv = ConversationRef::Private(snapshot.key.clone());
        self.ensure_private(&snapshot.key);
        let mut added = 0;
        for message in snapshot.messages {
            if matches!(self.append_message(&conv, message), Ok(Appended::Appended)) {
                added += 1;
            }
        }
        added
    }

    /// Merge a received group snapshot, filtered to groups `me` belongs to.
    /// Creates the local record when missing. Returns how many messages were
    /// new, or `None` when the snapshot was filtered out.
    pub fn merge_group_snapshot(&mut self, snapshot: GroupSnapshot, me: &UserId) -> Option<usize> {
        if !snapshot.members.contains(me) {
            return None;
        }
        Some(self.merge_group_snapshot_unchecked(snapshot))
    }

    /// Merge without a membership check; only the persistence loader,
    /// which has already filtered, uses this.
    pub(crate) fn merge_group_snapshot_unchecked(&mut self, snapshot: GroupSnapshot) -> usize {
        let conv = ConversationRef::Group(snapshot.id);
        match self.groups.get_mut(&snapshot.id) {
            Some(group) => {
                group.name = snapshot.name;
                group.members = snapshot.members;
                let mut added = 0;
                for message in snapshot.messages {
                    if matches!(self.append_message(&conv, message), Ok(Appended::Appended)) {
                        added += 1;
                    }
                }
                added
            }
            None => {
                let added = snapshot.messages.len();
                self.groups
                    .insert(snapshot.id, Group::from_snapshot(snapshot));
                added
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyphur_shared::message::ImageRef;

    fn store() -> ConversationStore {
        ConversationStore::new()
    }

    fn private_ref(a: &str, b: &str) -> ConversationRef {
        ConversationRef::private(&UserId::from(a), &UserId::from(b))
    }

    fn message(sender: &str, content: &str) -> Message {
        Message::new(UserId::from(sender), sender.to_uppercase(), content)
    }

    #[test]
    fn append_creates_private_conversation_lazily() {
        let mut s = store();
        let conv = private_ref("u1", "u2");

        let outcome = s.append_message(&conv, message("u1", "hello")).unwrap();
        assert_eq!(outcome, Appended::Appended);
        assert_eq!(s.messages(&conv).unwrap().len(), 1);
    }

    #[test]
    fn append_is_idempotent_by_id_and_fingerprint() {
        let mut s = store();
        let conv = private_ref("u1", "u2");
        let m = message("u1", "hello");

        assert_eq!(
            s.append_message(&conv, m.clone()).unwrap(),
            Appended::Appended
        );
        // Same id.
        assert_eq!(
            s.append_message(&conv, m.clone()).unwrap(),
            Appended::Duplicate
        );
        // Different id, same sender+timestamp+content.
        let mut twin = m.clone();
        twin.id = MessageId::new();
        assert_eq!(s.append_message(&conv, twin).unwrap(), Appended::Duplicate);

        assert_eq!(s.messages(&conv).unwrap().len(), 1);
    }

    #[test]
    fn append_rejects_empty_message() {
        let mut s = store();
        let conv = private_ref("u1", "u2");
        let mut m = message("u1", "");
        m.content = String::new();

        assert!(matches!(
            s.append_message(&conv, m.clone()),
            Err(StoreError::Validation(_))
        ));

        // An image alone is enough.
        m.image = Some(ImageRef::Uri("maps/harbor.webp".into()));
        assert_eq!(s.append_message(&conv, m).unwrap(), Appended::Appended);
    }

    #[test]
    fn cap_evicts_oldest() {
        let mut s = ConversationStore::with_cap(3);
        let conv = private_ref("u1", "u2");

        for i in 0..4i64 {
            let mut m = message("u1", &format!("m{i}"));
            // Distinct timestamps so fingerprints differ.
            m.timestamp = Utc::now() + chrono::Duration::milliseconds(i);
            s.append_message(&conv, m).unwrap();
        }

        let contents: Vec<_> = s
            .messages(&conv)
            .unwrap()
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn edit_and_delete_on_absent_message_return_not_found() {
        let mut s = store();
        let conv = private_ref("u1", "u2");
        s.append_message(&conv, message("u1", "hi")).unwrap();

        let ghost = MessageId::new();
        assert!(matches!(
            s.edit_message(&conv, ghost, "x", Utc::now()),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            s.delete_message(&conv, ghost),
            Err(StoreError::NotFound)
        ));
        // Unknown conversation too.
        assert!(matches!(
            s.edit_message(&private_ref("a", "b"), ghost, "x", Utc::now()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn edit_overwrites_and_flags() {
        let mut s = store();
        let conv = private_ref("u1", "u2");
        let m = message("u1", "first draft");
        let id = m.id;
        s.append_message(&conv, m).unwrap();

        s.edit_message(&conv, id, "final", Utc::now()).unwrap();
        let edited = s.message(&conv, id).unwrap();
        assert_eq!(edited.content, "final");
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());
    }

    #[test]
    fn delete_leaves_replies_dangling() {
        let mut s = store();
        let conv = private_ref("u1", "u2");
        let first = message("u1", "original");
        let first_id = first.id;
        s.append_message(&conv, first).unwrap();
        let reply = message("u2", "replying").with_reply_to(first_id);
        s.append_message(&conv, reply).unwrap();

        s.delete_message(&conv, first_id).unwrap();
        let remaining = s.messages(&conv).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].reply_to, Some(first_id));
        assert!(s.message(&conv, first_id).is_none());
    }

    #[test]
    fn group_creator_is_always_a_member() {
        let mut s = store();
        let members: BTreeSet<_> = [UserId::from("u2"), UserId::from("u3")].into();
        let snap = s.create_group("heist", members, UserId::from("u1"));

        assert!(snap.members.contains(&UserId::from("u1")));
        assert_eq!(snap.members.len(), 3);

        // Replacing members keeps the creator.
        s.update_group(
            snap.id,
            GroupPatch {
                name: None,
                members: Some([UserId::from("u2")].into()),
            },
        )
        .unwrap();
        let group = s.group(&snap.id).unwrap();
        assert!(group.is_member(&UserId::from("u1")));
        assert!(!group.is_member(&UserId::from("u3")));
    }

    #[test]
    fn clear_history_keeps_the_shell() {
        let mut s = store();
        let snap = s.create_group("heist", BTreeSet::new(), UserId::from("u1"));
        let conv = ConversationRef::Group(snap.id);
        s.append_message(&conv, message("u1", "hello")).unwrap();

        s.clear_history(&conv).unwrap();
        assert_eq!(s.messages(&conv).unwrap().len(), 0);
        assert!(s.group(&snap.id).is_some());
    }

    #[test]
    fn merge_filters_to_own_conversations() {
        let mut s = store();
        let me = UserId::from("u1");

        let mine = PrivateSnapshot {
            key: PrivateKey::of(&me, &UserId::from("u2")),
            messages: vec![message("u2", "psst")],
        };
        let not_mine = PrivateSnapshot {
            key: PrivateKey::of(&UserId::from("u3"), &UserId::from("u4")),
            messages: vec![message("u3", "secret")],
        };

        assert_eq!(s.merge_private_snapshot(mine.clone(), &me), 1);
        // Re-merge is idempotent.
        assert_eq!(s.merge_private_snapshot(mine, &me), 0);
        assert_eq!(s.merge_private_snapshot(not_mine, &me), 0);
        assert_eq!(s.privates().count(), 1);
    }

    #[test]
    fn merge_group_snapshot_creates_or_merges() {
        let mut s = store();
        let me = UserId::from("u2");

        let mut other = ConversationStore::new();
        let snap = other.create_group("heist", [me.clone()].into(), UserId::from("u1"));
        other
            .append_message(&ConversationRef::Group(snap.id), message("u1", "in position"))
            .unwrap();
        let full = other.group(&snap.id).unwrap().snapshot();

        assert_eq!(s.merge_group_snapshot(full.clone(), &me), Some(1));
        assert_eq!(s.merge_group_snapshot(full.clone(), &me), Some(0));
        // A non-member sees nothing.
        assert_eq!(s.merge_group_snapshot(full, &UserId::from("u9")), None);
    }
}
