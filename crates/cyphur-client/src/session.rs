//! The session coordinator: outbound entry points and their gates.
//!
//! Every user action is applied to the local store first, then announced
//! over the transport with an explicit recipient list. Emissions are
//! fire-and-forget; the stealth relay copy for privileged observers is
//! emitted here, invisibly to both parties. Validation and permission
//! checks run before any state mutation or emission.

use std::collections::BTreeSet;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cyphur_net::{Recipients, Transport};
use cyphur_shared::constants::{INTERCEPTION_CAP, MAX_CONTENT_CHARS, MESSAGE_HISTORY_CAP};
use cyphur_shared::message::{ImageRef, Message};
use cyphur_shared::protocol::{
    BackgroundScope, BackgroundShare, GroupCreated, GroupDeleted, GroupMessage, GroupPatch,
    GroupUpdated, MessageDeleted, MessageEdited, PrivateMessage, ReactionToggled, RelayEvent,
    SyncRequest, Typing,
};
use cyphur_shared::roster::{Roster, RosterUser};
use cyphur_shared::types::{ConversationRef, GroupId, MessageId, UserId};
use cyphur_store::settings;
use cyphur_store::{
    ConfigStore, ConversationStore, EphemeralState, InterceptContext, InterceptFilter,
    InterceptSort, InterceptedRecord, InterceptionLog,
};

use crate::error::{Result, SessionError};
use crate::events::SessionEvent;

/// Tunables; defaults match the protocol constants.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub history_cap: usize,
    pub interception_cap: usize,
    pub max_content_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_cap: MESSAGE_HISTORY_CAP,
            interception_cap: INTERCEPTION_CAP,
            max_content_chars: MAX_CONTENT_CHARS,
        }
    }
}

/// What a user is about to send.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub content: String,
    pub image: Option<ImageRef>,
    /// Speak as another persona; privileged senders only.
    pub persona: Option<Persona>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Display identity override for a privileged sender.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub avatar: Option<String>,
}

/// One client's coordinator. Owns all per-client state; replicas converge
/// only through the relayed events this type emits and applies.
pub struct Session<T: Transport, R: Roster, C: ConfigStore> {
    pub(crate) me: RosterUser,
    pub(crate) roster: R,
    pub(crate) transport: T,
    pub(crate) config_store: C,
    pub(crate) store: ConversationStore,
    pub(crate) ephemeral: EphemeralState,
    /// Present exactly when this session holds the privileged role.
    pub(crate) intercept: Option<InterceptionLog>,
    pub(crate) active_view: Option<ConversationRef>,
    pub(crate) events_tx: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) cfg: SessionConfig,
}

impl<T: Transport, R: Roster, C: ConfigStore> Session<T, R, C> {
    /// Build a session for `me`, loading whatever persisted state the
    /// config store holds. Returns the session and the notification
    /// stream.
    pub fn new(
        me: UserId,
        roster: R,
        transport: T,
        config_store: C,
        cfg: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let me = roster
            .user(&me)
            .ok_or_else(|| SessionError::Validation(format!("unknown user {me}")))?;

        let mut store = ConversationStore::with_cap(cfg.history_cap);
        if let Err(e) = settings::load_conversations(&mut store, &config_store, &me.id, me.privileged)
        {
            warn!(error = %e, "Could not load conversations, starting empty");
        }
        let mut ephemeral = EphemeralState::new();
        if let Err(e) = settings::load_ephemeral(&mut ephemeral, &config_store) {
            warn!(error = %e, "Could not load ephemeral state, starting empty");
        }

        let intercept = me
            .privileged
            .then(|| InterceptionLog::with_cap(cfg.interception_cap));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        info!(user = %me.id, privileged = me.privileged, "Session started");

        Ok((
            Self {
                me,
                roster,
                transport,
                config_store,
                store,
                ephemeral,
                intercept,
                active_view: None,
                events_tx,
                cfg,
            },
            events_rx,
        ))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn me(&self) -> &RosterUser {
        &self.me
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn ephemeral(&self) -> &EphemeralState {
        &self.ephemeral
    }

    /// The interception log; `None` for ordinary users.
    pub fn interception(&self) -> Option<&InterceptionLog> {
        self.intercept.as_ref()
    }

    pub fn config_store(&self) -> &C {
        &self.config_store
    }

    /// Users currently typing in `conv`, excluding this client.
    pub fn typists(&mut self, conv: &ConversationRef) -> Vec<UserId> {
        let me = self.me.id.clone();
        self.ephemeral
            .typists(conv, Utc::now())
            .into_iter()
            .filter(|u| *u != me)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Send a private message. The addressee gets the direct frame; if both
    /// parties are non-privileged, active observers get a stealth relay
    /// copy the parties cannot detect.
    pub fn send_private(&mut self, to: &UserId, draft: MessageDraft) -> Result<MessageId> {
        if *to == self.me.id {
            return Err(SessionError::Validation(
                "cannot open a conversation with yourself".into(),
            ));
        }
        let recipient = self
            .roster
            .user(to)
            .ok_or_else(|| SessionError::Validation(format!("unknown recipient {to}")))?;

        let conv = ConversationRef::private(&self.me.id, to);
        let message = self.build_message(&conv, draft)?;
        let message_id = message.id;
        self.store.append_message(&conv, message.clone())?;

        self.emit_frame(
            Recipients::one(to.clone()),
            &RelayEvent::PrivateMessage(PrivateMessage {
                from: self.me.id.clone(),
                to: to.clone(),
                message: message.clone(),
                relay: false,
            }),
        )?;

        if !self.me.privileged && !recipient.privileged {
            let observers: Vec<UserId> = self
                .roster
                .active_observers()
                .into_iter()
                .map(|u| u.id)
                .collect();
            if !observers.is_empty() {
                self.emit_relay_copy(
                    Recipients::Only(observers),
                    &RelayEvent::PrivateMessage(PrivateMessage {
                        from: self.me.id.clone(),
                        to: to.clone(),
                        message: message.clone(),
                        relay: true,
                    }),
                );
            }
        }

        // A privileged sender's own traffic is visible by definition; the
        // interception list is populated at send time, no relay involved.
        if let Some(log) = self.intercept.as_mut() {
            log.record(
                InterceptContext::Private {
                    a: self.me.id.clone(),
                    b: to.clone(),
                },
                message,
            );
            self.emit_event(SessionEvent::InterceptionUpdated);
        }

        info!(msg_id = %message_id, to = %to, "Private message sent");
        self.emit_event(SessionEvent::MessageSent {
            conv,
            message_id,
        });
        self.flush();
        Ok(message_id)
    }

    /// Send a message to a group this client belongs to. Members get the
    /// direct frame; non-member observers get the stealth relay copy.
    pub fn send_group(&mut self, group_id: GroupId, draft: MessageDraft) -> Result<MessageId> {
        let (members, group_name) = {
            let group = self.store.group(&group_id).ok_or(SessionError::NotFound)?;
            if !group.is_member(&self.me.id) {
                return Err(SessionError::PermissionDenied(
                    "not a member of this group".into(),
                ));
            }
            (group.members.clone(), group.name.clone())
        };

        let conv = ConversationRef::Group(group_id);
        let message = self.build_message(&conv, draft)?;
        let message_id = message.id;
        self.store.append_message(&conv, message.clone())?;

        let direct: Vec<UserId> = members
            .iter()
            .filter(|u| **u != self.me.id)
            .cloned()
            .collect();
        self.emit_frame(
            Recipients::Only(direct),
            &RelayEvent::GroupMessage(GroupMessage {
                group_id,
                group_name: group_name.clone(),
                message: message.clone(),
                relay: false,
            }),
        )?;

        if !self.me.privileged {
            let outside_observers: Vec<UserId> = self
                .roster
                .active_observers()
                .into_iter()
                .filter(|u| !members.contains(&u.id))
                .map(|u| u.id)
                .collect();
            if !outside_observers.is_empty() {
                self.emit_relay_copy(
                    Recipients::Only(outside_observers),
                    &RelayEvent::GroupMessage(GroupMessage {
                        group_id,
                        group_name: group_name.clone(),
                        message: message.clone(),
                        relay: true,
                    }),
                );
            }
        }

        if let Some(log) = self.intercept.as_mut() {
            log.record(
                InterceptContext::Group {
                    id: group_id,
                    name: group_name,
                },
                message,
            );
            self.emit_event(SessionEvent::InterceptionUpdated);
        }

        info!(msg_id = %message_id, group_id = %group_id, "Group message sent");
        self.emit_event(SessionEvent::MessageSent {
            conv,
            message_id,
        });
        self.flush();
        Ok(message_id)
    }

    // -----------------------------------------------------------------------
    // Mutating existing messages
    // -----------------------------------------------------------------------

    /// Destructively edit a message. `NotFound` when the message has since
    /// vanished; callers treat that as a harmless race and stay silent.
    pub fn edit_message(
        &mut self,
        conv: &ConversationRef,
        message_id: MessageId,
        new_content: impl Into<String>,
    ) -> Result<()> {
        let new_content = new_content.into();
        self.guard_participant(conv)?;
        self.guard_content(&new_content)?;
        self.guard_author(conv, message_id)?;

        let edited_at = Utc::now();
        self.store
            .edit_message(conv, message_id, new_content.clone(), edited_at)?;

        self.emit_frame(
            Recipients::Only(self.other_participants(conv)),
            &RelayEvent::MessageEdited(MessageEdited {
                conv: conv.clone(),
                message_id,
                new_content,
                edited_at,
            }),
        )?;
        self.emit_event(SessionEvent::MessageEdited {
            conv: conv.clone(),
            message_id,
        });
        self.flush();
        Ok(())
    }

    /// Hard-delete a message everywhere. Same silent `NotFound` rule as
    /// [`edit_message`](Self::edit_message).
    pub fn delete_message(&mut self, conv: &ConversationRef, message_id: MessageId) -> Result<()> {
        self.guard_participant(conv)?;
        self.guard_author(conv, message_id)?;

        self.store.delete_message(conv, message_id)?;

        self.emit_frame(
            Recipients::Only(self.other_participants(conv)),
            &RelayEvent::MessageDeleted(MessageDeleted {
                conv: conv.clone(),
                message_id,
            }),
        )?;
        self.emit_event(SessionEvent::MessageDeleted {
            conv: conv.clone(),
            message_id,
        });
        self.flush();
        Ok(())
    }

    /// Toggle this client's reaction. Returns `None` (a silent no-op, no
    /// emission) when the message is gone, otherwise whether the reaction
    /// is present after the call.
    pub fn toggle_reaction(
        &mut self,
        conv: &ConversationRef,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<Option<bool>> {
        self.guard_participant(conv)?;

        let me = self.me.id.clone();
        let present = match self.store.toggle_reaction(conv, message_id, emoji, &me) {
            Err(cyphur_store::StoreError::NotFound) => return Ok(None),
            other => other?,
        };

        self.emit_frame(
            Recipients::Only(self.other_participants(conv)),
            &RelayEvent::ReactionToggled(ReactionToggled {
                conv: conv.clone(),
                message_id,
                emoji: emoji.to_string(),
                user_id: self.me.id.clone(),
            }),
        )?;
        self.emit_event(SessionEvent::ReactionChanged {
            conv: conv.clone(),
            message_id,
        });
        self.flush();
        Ok(Some(present))
    }

    /// Announce a typing state change. Emission is suppressed when the
    /// visible state did not change (a refresh while already typing).
    pub fn set_typing(&mut self, conv: &ConversationRef, is_typing: bool) -> Result<bool> {
        self.guard_participant(conv)?;
        let me = self.me.id.clone();
        let changed = self.ephemeral.set_typing(conv, &me, is_typing, Utc::now());
        if changed {
            self.emit_frame(
                Recipients::Only(self.other_participants(conv)),
                &RelayEvent::Typing(Typing {
                    conv: conv.clone(),
                    user_id: me,
                    is_typing,
                }),
            )?;
        }
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    pub fn create_group(
        &mut self,
        name: impl Into<String>,
        members: BTreeSet<UserId>,
    ) -> Result<GroupId> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SessionError::Validation("group name is empty".into()));
        }

        let snapshot = self.store.create_group(name, members, self.me.id.clone());
        let group_id = snapshot.id;

        let recipients: Vec<UserId> = snapshot
            .members
            .iter()
            .filter(|u| **u != self.me.id)
            .cloned()
            .collect();
        self.emit_frame(
            Recipients::Only(recipients),
            &RelayEvent::GroupCreated(GroupCreated { group: snapshot }),
        )?;

        info!(group_id = %group_id, "Group created");
        self.emit_event(SessionEvent::GroupChanged { group_id });
        self.flush();
        Ok(group_id)
    }

    /// Rename a group or replace its membership. Allowed for the creator
    /// and the privileged role.
    pub fn update_group(&mut self, group_id: GroupId, patch: GroupPatch) -> Result<()> {
        let old_members = {
            let group = self.store.group(&group_id).ok_or(SessionError::NotFound)?;
            if group.created_by != self.me.id && !self.me.privileged {
                return Err(SessionError::PermissionDenied(
                    "only the creator can change this group".into(),
                ));
            }
            group.members.clone()
        };

        self.store.update_group(group_id, patch)?;

        let mut snapshot = self
            .store
            .group(&group_id)
            .ok_or(SessionError::NotFound)?
            .snapshot();
        snapshot.messages.clear();

        // Removed members must hear about it too, so they can drop their
        // local record.
        let recipients: Vec<UserId> = old_members
            .union(&snapshot.members)
            .filter(|u| **u != self.me.id)
            .cloned()
            .collect();
        self.emit_frame(
            Recipients::Only(recipients),
            &RelayEvent::GroupUpdated(GroupUpdated { group: snapshot }),
        )?;

        self.emit_event(SessionEvent::GroupChanged { group_id });
        self.flush();
        Ok(())
    }

    /// Delete a group for everyone. Privileged-only.
    pub fn delete_group(&mut self, group_id: GroupId) -> Result<()> {
        if !self.me.privileged {
            return Err(SessionError::PermissionDenied(
                "only the privileged role can delete groups".into(),
            ));
        }

        let removed = self.store.delete_group(group_id)?;
        let conv = ConversationRef::Group(group_id);
        self.ephemeral.forget_conversation(&conv);
        if self.active_view.as_ref() == Some(&conv) {
            self.active_view = None;
        }

        let recipients: Vec<UserId> = removed
            .members
            .iter()
            .filter(|u| **u != self.me.id)
            .cloned()
            .collect();
        self.emit_frame(
            Recipients::Only(recipients),
            &RelayEvent::GroupDeleted(GroupDeleted {
                group_id,
                deleted_by: self.me.id.clone(),
            }),
        )?;

        info!(group_id = %group_id, "Group deleted");
        self.emit_event(SessionEvent::GroupRemoved { group_id });
        self.flush();
        Ok(())
    }

    /// Wipe a conversation's history locally, keeping the shell.
    pub fn clear_history(&mut self, conv: &ConversationRef) -> Result<()> {
        self.guard_participant(conv)?;
        self.store.clear_history(conv)?;
        self.flush();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backgrounds, sync, view state
    // -----------------------------------------------------------------------

    /// Push a background reference to explicit targets. Privileged-only.
    pub fn share_background(
        &mut self,
        background: impl Into<String>,
        scope: BackgroundScope,
        targets: Vec<UserId>,
    ) -> Result<()> {
        if !self.me.privileged {
            return Err(SessionError::PermissionDenied(
                "only the privileged role can share backgrounds".into(),
            ));
        }
        let background = background.into();
        if background.trim().is_empty() {
            return Err(SessionError::Validation("background reference is empty".into()));
        }

        self.ephemeral
            .set_background(scope.clone(), background.clone());
        self.emit_frame(
            Recipients::Only(targets),
            &RelayEvent::BackgroundShare(BackgroundShare {
                background,
                scope,
                shared_by: self.me.id.clone(),
            }),
        )?;
        self.emit_event(SessionEvent::BackgroundChanged);
        self.flush();
        Ok(())
    }

    /// Ask the privileged peer to push authoritative snapshots of every
    /// conversation this client is a party to. Used on reconnect.
    pub fn request_sync(&mut self) -> Result<()> {
        let observers: Vec<UserId> = self
            .roster
            .active_observers()
            .into_iter()
            .filter(|u| u.id != self.me.id)
            .map(|u| u.id)
            .collect();
        if observers.is_empty() {
            warn!("No privileged peer online, sync request skipped");
            return Ok(());
        }
        self.emit_frame(
            Recipients::Only(observers),
            &RelayEvent::SyncRequest(SyncRequest {
                requester: self.me.id.clone(),
            }),
        )
    }

    /// Mark a conversation as the active view: unread drops to zero and
    /// stays there while it is open.
    pub fn open_conversation(&mut self, conv: ConversationRef) {
        self.ephemeral.mark_read(&conv, Utc::now());
        self.active_view = Some(conv);
        self.flush();
    }

    pub fn close_conversation(&mut self) {
        self.active_view = None;
    }

    // -----------------------------------------------------------------------
    // Ephemeral toggles
    // -----------------------------------------------------------------------

    pub fn toggle_favorite(&mut self, conv: &ConversationRef) -> bool {
        let now = self.ephemeral.toggle_favorite(conv);
        self.flush();
        now
    }

    pub fn toggle_mute(&mut self, conv: &ConversationRef) -> bool {
        let now = self.ephemeral.toggle_mute(conv);
        self.flush();
        now
    }

    pub fn toggle_pin(&mut self, conv: &ConversationRef, message_id: MessageId) -> bool {
        let now = self.ephemeral.toggle_pin(conv, message_id);
        self.flush();
        now
    }

    pub fn set_reply_target(&mut self, conv: &ConversationRef, message_id: MessageId) {
        self.ephemeral.set_reply_target(conv, message_id);
    }

    pub fn clear_reply_target(&mut self, conv: &ConversationRef) {
        self.ephemeral.take_reply_target(conv);
    }

    // -----------------------------------------------------------------------
    // Interception queries (privileged)
    // -----------------------------------------------------------------------

    pub fn interception_records(
        &self,
        filter: &InterceptFilter,
        sort: InterceptSort,
    ) -> Result<Vec<&InterceptedRecord>> {
        self.intercept
            .as_ref()
            .map(|log| log.records(filter, sort))
            .ok_or_else(|| {
                SessionError::PermissionDenied("interception is privileged-only".into())
            })
    }

    pub fn toggle_intercept_flag(&mut self, message_id: MessageId) -> Result<bool> {
        self.intercept
            .as_mut()
            .map(|log| log.toggle_flag(message_id))
            .ok_or_else(|| {
                SessionError::PermissionDenied("interception is privileged-only".into())
            })
    }

    pub fn mark_interception_viewed(&mut self) -> Result<()> {
        self.intercept
            .as_mut()
            .map(InterceptionLog::mark_viewed)
            .ok_or_else(|| {
                SessionError::PermissionDenied("interception is privileged-only".into())
            })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn build_message(&mut self, conv: &ConversationRef, draft: MessageDraft) -> Result<Message> {
        if draft.persona.is_some() && !self.me.privileged {
            return Err(SessionError::PermissionDenied(
                "speaking as another persona is privileged-only".into(),
            ));
        }
        if draft.content.trim().is_empty() && draft.image.is_none() {
            return Err(SessionError::Validation(
                "message needs content or an image".into(),
            ));
        }
        self.guard_content(&draft.content)?;
        if let Some(image) = &draft.image {
            if !image.is_valid() {
                return Err(SessionError::Validation("invalid image payload".into()));
            }
        }

        let (name, avatar) = match draft.persona {
            Some(p) => (p.name, p.avatar),
            None => (self.me.display_name.clone(), self.me.avatar.clone()),
        };

        let mut message = Message::new(self.me.id.clone(), name, draft.content);
        message.sender_avatar = avatar;
        message.image = draft.image;
        message.reply_to = self.ephemeral.take_reply_target(conv);
        Ok(message)
    }

    fn guard_content(&self, content: &str) -> Result<()> {
        if content.chars().count() > self.cfg.max_content_chars {
            return Err(SessionError::Validation(format!(
                "content exceeds {} characters",
                self.cfg.max_content_chars
            )));
        }
        Ok(())
    }

    /// Participants may act in a conversation; the privileged role may act
    /// anywhere.
    pub(crate) fn guard_participant(&self, conv: &ConversationRef) -> Result<()> {
        if self.me.privileged {
            return Ok(());
        }
        let ok = match conv {
            ConversationRef::Private(key) => key.includes(&self.me.id),
            ConversationRef::Group(id) => self
                .store
                .group(id)
                .map(|g| g.is_member(&self.me.id))
                .unwrap_or(false),
        };
        if ok {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied(
                "not a participant of this conversation".into(),
            ))
        }
    }

    /// Only the author may edit or delete a message; the privileged role
    /// may touch anything.
    fn guard_author(&self, conv: &ConversationRef, message_id: MessageId) -> Result<()> {
        if self.me.privileged {
            return Ok(());
        }
        match self.store.message(conv, message_id) {
            None => Err(SessionError::NotFound),
            Some(m) if m.sender_id == self.me.id => Ok(()),
            Some(_) => Err(SessionError::PermissionDenied(
                "not the author of this message".into(),
            )),
        }
    }

    /// Everyone in `conv` except this client.
    pub(crate) fn other_participants(&self, conv: &ConversationRef) -> Vec<UserId> {
        match conv {
            ConversationRef::Private(key) => key
                .participants()
                .map(|(a, b)| {
                    [a, b]
                        .into_iter()
                        .filter(|u| *u != self.me.id)
                        .collect()
                })
                .unwrap_or_default(),
            ConversationRef::Group(id) => self
                .store
                .group(id)
                .map(|g| {
                    g.members
                        .iter()
                        .filter(|u| **u != self.me.id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub(crate) fn emit_event(&self, event: SessionEvent) {
        // A dropped receiver just means nobody is listening.
        let _ = self.events_tx.send(event);
    }

    /// Encode and emit one frame. The primary send path surfaces failures;
    /// nothing is ever retried.
    pub(crate) fn emit_frame(&self, recipients: Recipients, event: &RelayEvent) -> Result<()> {
        let bytes = event.to_bytes()?;
        debug!(kind = event.kind(), "Emitting frame");
        self.transport.emit(&recipients, Bytes::from(bytes))?;
        Ok(())
    }

    /// Relay copies are best-effort: failures are logged and swallowed so
    /// the parties' own exchange is never disturbed.
    pub(crate) fn emit_relay_copy(&self, recipients: Recipients, event: &RelayEvent) {
        if let Err(e) = self.emit_frame(recipients, event) {
            warn!(kind = event.kind(), error = %e, "Relay copy dropped");
        }
    }

    /// Best-effort persistence after a mutation; in-memory state stays
    /// authoritative whatever happens here. Only a privileged session
    /// writes the shared conversations blob.
    pub(crate) fn flush(&mut self) {
        if self.me.privileged {
            if let Err(e) = settings::save_conversations(&self.store, &mut self.config_store) {
                warn!(error = %e, "Conversations flush failed");
            }
        }
        if let Err(e) = settings::save_ephemeral(&self.ephemeral, &mut self.config_store) {
            warn!(error = %e, "Ephemeral flush failed");
        }
    }
}
