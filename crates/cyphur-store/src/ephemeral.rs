//! Client-local presence and ephemeral state.
//!
//! Typing indicators, unread counters, favorites/mute/pin sets, pending
//! reply targets, and shared background references. None of this is
//! replicated except through the explicit events the session chooses to
//! broadcast. Typing entries expire after a timeout and are pruned lazily
//! on read.
//!
//! Reply targets are scoped per conversation; a pending reply in one chat
//! cannot leak into another when the user switches mid-compose.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use cyphur_shared::constants::TYPING_TIMEOUT_SECS;
use cyphur_shared::protocol::BackgroundScope;
use cyphur_shared::types::{ConversationRef, MessageId, UserId};

#[derive(Debug, Clone)]
pub struct EphemeralState {
    typing: HashMap<ConversationRef, HashMap<UserId, DateTime<Utc>>>,
    typing_timeout: Duration,
    unread: HashMap<ConversationRef, u32>,
    last_read: HashMap<ConversationRef, DateTime<Utc>>,
    favorites: HashSet<ConversationRef>,
    mutes: HashSet<ConversationRef>,
    pins: HashMap<ConversationRef, Vec<MessageId>>,
    reply_targets: HashMap<ConversationRef, MessageId>,
    backgrounds: HashMap<BackgroundScope, String>,
}

impl Default for EphemeralState {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralState {
    pub fn new() -> Self {
        Self {
            typing: HashMap::new(),
            typing_timeout: Duration::seconds(TYPING_TIMEOUT_SECS),
            unread: HashMap::new(),
            last_read: HashMap::new(),
            favorites: HashSet::new(),
            mutes: HashSet::new(),
            pins: HashMap::new(),
            reply_targets: HashMap::new(),
            backgrounds: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Typing
    // -----------------------------------------------------------------------

    /// Update typing state for `user` in `conv`. Returns whether the visible
    /// state changed; a refresh of an already-visible signal does not. The
    /// caller uses this to suppress redundant relay emission.
    pub fn set_typing(
        &mut self,
        conv: &ConversationRef,
        user: &UserId,
        is_typing: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let entries = self.typing.entry(conv.clone()).or_default();
        let was_visible = entries
            .get(user)
            .map(|t| now - *t <= self.typing_timeout)
            .unwrap_or(false);

        if is_typing {
            entries.insert(user.clone(), now);
            !was_visible
        } else {
            entries.remove(user);
            was_visible
        }
    }

    /// Users currently typing in `conv`. Stale entries are pruned here, not
    /// proactively.
    pub fn typists(&mut self, conv: &ConversationRef, now: DateTime<Utc>) -> Vec<UserId> {
        let timeout = self.typing_timeout;
        match self.typing.get_mut(conv) {
            None => Vec::new(),
            Some(entries) => {
                entries.retain(|_, t| now - *t <= timeout);
                let mut users: Vec<UserId> = entries.keys().cloned().collect();
                users.sort();
                users
            }
        }
    }

    // -----------------------------------------------------------------------
    // Unread
    // -----------------------------------------------------------------------

    /// Increment the unread counter unless the conversation is muted.
    /// Suppressed increments are never applied retroactively on unmute.
    pub fn bump_unread(&mut self, conv: &ConversationRef) -> bool {
        if self.mutes.contains(conv) {
            return false;
        }
        *self.unread.entry(conv.clone()).or_insert(0) += 1;
        true
    }

    pub fn unread(&self, conv: &ConversationRef) -> u32 {
        self.unread.get(conv).copied().unwrap_or(0)
    }

    /// Zero the counter and stamp the last-read timestamp.
    pub fn mark_read(&mut self, conv: &ConversationRef, now: DateTime<Utc>) {
        self.unread.remove(conv);
        self.last_read.insert(conv.clone(), now);
    }

    pub fn last_read(&self, conv: &ConversationRef) -> Option<DateTime<Utc>> {
        self.last_read.get(conv).copied()
    }

    // -----------------------------------------------------------------------
    // Favorites / mutes / pins
    // -----------------------------------------------------------------------

    /// Returns whether the conversation is a favorite after the call.
    pub fn toggle_favorite(&mut self, conv: &ConversationRef) -> bool {
        if self.favorites.remove(conv) {
            false
        } else {
            self.favorites.insert(conv.clone());
            true
        }
    }

    pub fn is_favorite(&self, conv: &ConversationRef) -> bool {
        self.favorites.contains(conv)
    }

    /// Returns whether the conversation is muted after the call.
    pub fn toggle_mute(&mut self, conv: &ConversationRef) -> bool {
        if self.mutes.remove(conv) {
            false
        } else {
            self.mutes.insert(conv.clone());
            true
        }
    }

    pub fn is_muted(&self, conv: &ConversationRef) -> bool {
        self.mutes.contains(conv)
    }

    /// Returns whether the message is pinned after the call.
    pub fn toggle_pin(&mut self, conv: &ConversationRef, message_id: MessageId) -> bool {
        let pins = self.pins.entry(conv.clone()).or_default();
        if let Some(pos) = pins.iter().position(|id| *id == message_id) {
            pins.remove(pos);
            false
        } else {
            pins.push(message_id);
            true
        }
    }

    pub fn pins(&self, conv: &ConversationRef) -> &[MessageId] {
        self.pins.get(conv).map(Vec::as_slice).unwrap_or(&[])
    }

    // -----------------------------------------------------------------------
    // Reply targets
    // -----------------------------------------------------------------------

    pub fn set_reply_target(&mut self, conv: &ConversationRef, message_id: MessageId) {
        self.reply_targets.insert(conv.clone(), message_id);
    }

    pub fn reply_target(&self, conv: &ConversationRef) -> Option<MessageId> {
        self.reply_targets.get(conv).copied()
    }

    /// Clear and return the pending reply target, consumed on send.
    pub fn take_reply_target(&mut self, conv: &ConversationRef) -> Option<MessageId> {
        self.reply_targets.remove(conv)
    }

    // -----------------------------------------------------------------------
    // Backgrounds
    // -----------------------------------------------------------------------

    pub fn set_background(&mut self, scope: BackgroundScope, background: String) {
        self.backgrounds.insert(scope, background);
    }

    /// The background for a view: conversation-specific wins over global.
    pub fn background_for(&self, conv: &ConversationRef) -> Option<&str> {
        self.backgrounds
            .get(&BackgroundScope::Conversation(conv.clone()))
            .or_else(|| self.backgrounds.get(&BackgroundScope::Global))
            .map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Drop every piece of state tied to a conversation; used when a group
    /// is deleted.
    pub fn forget_conversation(&mut self, conv: &ConversationRef) {
        self.typing.remove(conv);
        self.unread.remove(conv);
        self.last_read.remove(conv);
        self.favorites.remove(conv);
        self.mutes.remove(conv);
        self.pins.remove(conv);
        self.reply_targets.remove(conv);
        self.backgrounds
            .remove(&BackgroundScope::Conversation(conv.clone()));
    }

    // Snapshot accessors used by the persistence codecs.

    pub(crate) fn unread_entries(&self) -> Vec<(ConversationRef, u32, Option<DateTime<Utc>>)> {
        let mut refs: HashSet<&ConversationRef> =
            self.unread.keys().chain(self.last_read.keys()).collect();
        refs.drain()
            .map(|c| (c.clone(), self.unread(c), self.last_read(c)))
            .collect()
    }

    pub(crate) fn restore_unread(
        &mut self,
        entries: Vec<(ConversationRef, u32, Option<DateTime<Utc>>)>,
    ) {
        for (conv, count, last_read) in entries {
            if count > 0 {
                self.unread.insert(conv.clone(), count);
            }
            if let Some(t) = last_read {
                self.last_read.insert(conv, t);
            }
        }
    }

    pub(crate) fn favorites(&self) -> Vec<ConversationRef> {
        self.favorites.iter().cloned().collect()
    }

    pub(crate) fn restore_favorites(&mut self, refs: Vec<ConversationRef>) {
        self.favorites.extend(refs);
    }

    pub(crate) fn mutes(&self) -> Vec<ConversationRef> {
        self.mutes.iter().cloned().collect()
    }

    pub(crate) fn restore_mutes(&mut self, refs: Vec<ConversationRef>) {
        self.mutes.extend(refs);
    }

    pub(crate) fn all_pins(&self) -> Vec<(ConversationRef, Vec<MessageId>)> {
        self.pins
            .iter()
            .map(|(c, p)| (c.clone(), p.clone()))
            .collect()
    }

    pub(crate) fn restore_pins(&mut self, entries: Vec<(ConversationRef, Vec<MessageId>)>) {
        self.pins.extend(entries);
    }

    pub(crate) fn all_backgrounds(&self) -> Vec<(BackgroundScope, String)> {
        self.backgrounds
            .iter()
            .map(|(s, b)| (s.clone(), b.clone()))
            .collect()
    }

    pub(crate) fn restore_backgrounds(&mut self, entries: Vec<(BackgroundScope, String)>) {
        self.backgrounds.extend(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationRef {
        ConversationRef::private(&UserId::from("u1"), &UserId::from("u2"))
    }

    #[test]
    fn typing_refresh_is_not_a_change() {
        let mut state = EphemeralState::new();
        let c = conv();
        let u = UserId::from("u2");
        let t0 = Utc::now();

        assert!(state.set_typing(&c, &u, true, t0));
        assert!(!state.set_typing(&c, &u, true, t0 + Duration::seconds(1)));
        assert!(state.set_typing(&c, &u, false, t0 + Duration::seconds(2)));
        // Already stopped: no visible change.
        assert!(!state.set_typing(&c, &u, false, t0 + Duration::seconds(2)));
    }

    #[test]
    fn stale_typing_entries_expire_lazily() {
        let mut state = EphemeralState::new();
        let c = conv();
        let u = UserId::from("u2");
        let t0 = Utc::now();

        state.set_typing(&c, &u, true, t0);
        assert_eq!(state.typists(&c, t0 + Duration::seconds(3)), vec![u.clone()]);
        assert!(state
            .typists(&c, t0 + Duration::seconds(TYPING_TIMEOUT_SECS + 1))
            .is_empty());
        // A signal after expiry counts as a fresh change.
        assert!(state.set_typing(&c, &u, true, t0 + Duration::seconds(30)));
    }

    #[test]
    fn mute_suppresses_unread_without_backfill() {
        let mut state = EphemeralState::new();
        let c = conv();

        assert!(state.bump_unread(&c));
        state.toggle_mute(&c);
        assert!(!state.bump_unread(&c));
        assert!(!state.bump_unread(&c));
        state.toggle_mute(&c);
        // Suppressed increments are gone for good.
        assert_eq!(state.unread(&c), 1);
    }

    #[test]
    fn mark_read_zeroes_and_stamps() {
        let mut state = EphemeralState::new();
        let c = conv();
        state.bump_unread(&c);
        state.bump_unread(&c);

        let now = Utc::now();
        state.mark_read(&c, now);
        assert_eq!(state.unread(&c), 0);
        assert_eq!(state.last_read(&c), Some(now));
    }

    #[test]
    fn reply_targets_are_scoped_per_conversation() {
        let mut state = EphemeralState::new();
        let c1 = conv();
        let c2 = ConversationRef::private(&UserId::from("u1"), &UserId::from("u3"));
        let m1 = MessageId::new();
        let m2 = MessageId::new();

        state.set_reply_target(&c1, m1);
        state.set_reply_target(&c2, m2);

        assert_eq!(state.reply_target(&c1), Some(m1));
        assert_eq!(state.take_reply_target(&c2), Some(m2));
        assert_eq!(state.reply_target(&c2), None);
        assert_eq!(state.reply_target(&c1), Some(m1));
    }

    #[test]
    fn conversation_background_wins_over_global() {
        let mut state = EphemeralState::new();
        let c = conv();

        state.set_background(BackgroundScope::Global, "bg/ship.webp".into());
        assert_eq!(state.background_for(&c), Some("bg/ship.webp"));

        state.set_background(
            BackgroundScope::Conversation(c.clone()),
            "bg/cellar.webp".into(),
        );
        assert_eq!(state.background_for(&c), Some("bg/cellar.webp"));
    }

    #[test]
    fn forget_conversation_cascades() {
        let mut state = EphemeralState::new();
        let c = conv();
        state.bump_unread(&c);
        state.toggle_favorite(&c);
        state.toggle_pin(&c, MessageId::new());
        state.set_reply_target(&c, MessageId::new());

        state.forget_conversation(&c);
        assert_eq!(state.unread(&c), 0);
        assert!(!state.is_favorite(&c));
        assert!(state.pins(&c).is_empty());
        assert_eq!(state.reply_target(&c), None);
    }
}
