//! Applying frames that arrive from other peers.
//!
//! Every event is applied idempotently: duplicate frames, frames for
//! messages that have since been deleted, and frames for conversations this
//! client is not party to all degrade to silent no-ops. An undecodable
//! frame is logged and dropped; there is no way to ask for a resend.

use chrono::Utc;
use tracing::{debug, warn};

use cyphur_net::{InboundFrame, Transport};
use cyphur_shared::message::Message;
use cyphur_shared::protocol::{
    BackgroundShare, GroupCreated, GroupDeleted, GroupMessage, GroupPatch, GroupUpdated,
    MessageDeleted, MessageEdited, PrivateMessage, ReactionToggled, RelayEvent, Typing,
};
use cyphur_shared::roster::Roster;
use cyphur_shared::types::{ConversationRef, GroupId, MessageId};
use cyphur_store::{Appended, ConfigStore, InterceptContext, StoreError};

use crate::events::SessionEvent;
use crate::session::Session;

impl<T: Transport, R: Roster, C: ConfigStore> Session<T, R, C> {
    /// Decode and apply one frame from the bus. Never fails: malformed or
    /// inapplicable frames are dropped with a log line.
    pub fn handle_frame(&mut self, frame: InboundFrame) {
        let event = match RelayEvent::from_bytes(&frame.data) {
            Ok(event) => event,
            Err(e) => {
                warn!(from = %frame.from, error = %e, "Undecodable frame dropped");
                return;
            }
        };
        debug!(from = %frame.from, kind = event.kind(), "Frame received");
        self.apply_event(event);
    }

    fn apply_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::PrivateMessage(ev) => self.on_private_message(ev),
            RelayEvent::GroupMessage(ev) => self.on_group_message(ev),
            RelayEvent::MessageEdited(ev) => self.on_message_edited(ev),
            RelayEvent::MessageDeleted(ev) => self.on_message_deleted(ev),
            RelayEvent::ReactionToggled(ev) => self.on_reaction_toggled(ev),
            RelayEvent::Typing(ev) => self.on_typing(ev),
            RelayEvent::GroupCreated(ev) => self.on_group_created(ev),
            RelayEvent::GroupUpdated(ev) => self.on_group_updated(ev),
            RelayEvent::GroupDeleted(ev) => self.on_group_deleted(ev),
            RelayEvent::SyncRequest(ev) => self.on_sync_request(ev),
            RelayEvent::PrivateSync(ev) => self.on_private_sync(ev),
            RelayEvent::GroupSync(ev) => self.on_group_sync(ev),
            RelayEvent::BackgroundShare(ev) => self.on_background_share(ev),
        }
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    fn on_private_message(&mut self, ev: PrivateMessage) {
        let conv = ConversationRef::private(&ev.from, &ev.to);

        if ev.relay {
            // The stealth copy. Only a privileged session that is not itself
            // a party does anything with it.
            if !self.me.privileged || ev.from == self.me.id || ev.to == self.me.id {
                return;
            }
            self.record_interception(
                InterceptContext::Private {
                    a: ev.from.clone(),
                    b: ev.to.clone(),
                },
                ev.message.clone(),
            );
            // The observer also mirrors the conversation itself, so it can
            // answer sync requests later.
            match self.store.append_message(&conv, ev.message) {
                Ok(_) | Err(StoreError::NotFound) => {}
                Err(e) => warn!(conv = %conv, error = %e, "Relay copy rejected"),
            }
            self.flush();
            return;
        }

        if ev.to != self.me.id {
            return;
        }

        match self.store.append_message(&conv, ev.message.clone()) {
            Ok(Appended::Appended) => {}
            Ok(Appended::Duplicate) => return,
            Err(e) => {
                warn!(from = %ev.from, error = %e, "Inbound message rejected");
                return;
            }
        }

        // A privileged recipient's interception list covers its own traffic.
        if self.me.privileged {
            self.record_interception(
                InterceptContext::Private {
                    a: ev.from.clone(),
                    b: ev.to.clone(),
                },
                ev.message.clone(),
            );
        }

        self.note_received(conv, ev.message.id);
        self.flush();
    }

    fn on_group_message(&mut self, ev: GroupMessage) {
        let conv = ConversationRef::Group(ev.group_id);

        if ev.relay {
            // Stealth copy for a privileged non-member. The group name rides
            // on the frame because no local group record exists.
            if !self.me.privileged {
                return;
            }
            if self
                .store
                .group(&ev.group_id)
                .map(|g| g.is_member(&self.me.id))
                .unwrap_or(false)
            {
                return;
            }
            self.record_interception(
                InterceptContext::Group {
                    id: ev.group_id,
                    name: ev.group_name,
                },
                ev.message,
            );
            return;
        }

        match self.store.append_message(&conv, ev.message.clone()) {
            Ok(Appended::Appended) => {}
            Ok(Appended::Duplicate) => return,
            Err(StoreError::NotFound) => {
                // Direct frame for a group we never heard of; its creation
                // announcement was lost. Sync will recover it.
                debug!(group_id = %ev.group_id, "Message for unknown group dropped");
                return;
            }
            Err(e) => {
                warn!(group_id = %ev.group_id, error = %e, "Inbound message rejected");
                return;
            }
        }

        if self.me.privileged {
            self.record_interception(
                InterceptContext::Group {
                    id: ev.group_id,
                    name: ev.group_name,
                },
                ev.message.clone(),
            );
        }

        self.note_received(conv, ev.message.id);
        self.flush();
    }

    fn on_message_edited(&mut self, ev: MessageEdited) {
        match self
            .store
            .edit_message(&ev.conv, ev.message_id, ev.new_content, ev.edited_at)
        {
            Ok(()) => {
                self.emit_event(SessionEvent::MessageEdited {
                    conv: ev.conv,
                    message_id: ev.message_id,
                });
                self.flush();
            }
            // Edit of a message deleted in the meantime; the delete wins.
            Err(StoreError::NotFound) => {}
            Err(e) => warn!(conv = %ev.conv, error = %e, "Edit not applied"),
        }
    }

    fn on_message_deleted(&mut self, ev: MessageDeleted) {
        match self.store.delete_message(&ev.conv, ev.message_id) {
            Ok(()) => {
                self.emit_event(SessionEvent::MessageDeleted {
                    conv: ev.conv,
                    message_id: ev.message_id,
                });
                self.flush();
            }
            // Already gone, including delete/delete races.
            Err(StoreError::NotFound) => {}
            Err(e) => warn!(conv = %ev.conv, error = %e, "Delete not applied"),
        }
    }

    fn on_reaction_toggled(&mut self, ev: ReactionToggled) {
        match self
            .store
            .toggle_reaction(&ev.conv, ev.message_id, &ev.emoji, &ev.user_id)
        {
            Ok(_) => {
                self.emit_event(SessionEvent::ReactionChanged {
                    conv: ev.conv,
                    message_id: ev.message_id,
                });
                self.flush();
            }
            Err(StoreError::NotFound) => {}
            Err(e) => warn!(conv = %ev.conv, error = %e, "Reaction not applied"),
        }
    }

    fn on_typing(&mut self, ev: Typing) {
        let changed = self
            .ephemeral
            .set_typing(&ev.conv, &ev.user_id, ev.is_typing, Utc::now());
        if changed {
            self.emit_event(SessionEvent::TypingChanged { conv: ev.conv });
        }
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    fn on_group_created(&mut self, ev: GroupCreated) {
        let group_id = ev.group.id;
        if self.store.merge_group_snapshot(ev.group, &self.me.id).is_some() {
            self.emit_event(SessionEvent::GroupChanged { group_id });
            self.flush();
        }
    }

    fn on_group_updated(&mut self, ev: GroupUpdated) {
        let group_id = ev.group.id;
        let still_member = ev.group.members.contains(&self.me.id);

        if still_member {
            self.store.merge_group_snapshot(ev.group, &self.me.id);
            self.emit_event(SessionEvent::GroupChanged { group_id });
            self.flush();
            return;
        }

        if self.me.privileged && self.store.group(&group_id).is_some() {
            // The observer keeps mirroring groups it never belonged to.
            let patch = GroupPatch {
                name: Some(ev.group.name),
                members: Some(ev.group.members),
            };
            if self.store.update_group(group_id, patch).is_ok() {
                self.emit_event(SessionEvent::GroupChanged { group_id });
                self.flush();
            }
            return;
        }

        if self.store.forget_group(group_id).is_some() {
            self.drop_conversation_state(group_id);
            self.emit_event(SessionEvent::GroupRemoved { group_id });
            self.flush();
        }
    }

    fn on_group_deleted(&mut self, ev: GroupDeleted) {
        if self.store.forget_group(ev.group_id).is_some() {
            debug!(group_id = %ev.group_id, deleted_by = %ev.deleted_by, "Group deleted remotely");
            self.drop_conversation_state(ev.group_id);
            self.emit_event(SessionEvent::GroupRemoved {
                group_id: ev.group_id,
            });
            self.flush();
        }
    }

    // -----------------------------------------------------------------------
    // Backgrounds
    // -----------------------------------------------------------------------

    fn on_background_share(&mut self, ev: BackgroundShare) {
        if !self.roster.is_privileged(&ev.shared_by) {
            warn!(from = %ev.shared_by, "Background share from unprivileged sender dropped");
            return;
        }
        self.ephemeral.set_background(ev.scope, ev.background);
        self.emit_event(SessionEvent::BackgroundChanged);
        self.flush();
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    /// Unread bookkeeping and notification for a newly stored message.
    fn note_received(&mut self, conv: ConversationRef, message_id: MessageId) {
        if self.active_view.as_ref() == Some(&conv) {
            // Reading it right now; keep the counter at zero.
            self.ephemeral.mark_read(&conv, Utc::now());
        } else {
            self.ephemeral.bump_unread(&conv);
        }
        self.emit_event(SessionEvent::MessageReceived { conv, message_id });
    }

    fn record_interception(&mut self, context: InterceptContext, message: Message) {
        if let Some(log) = self.intercept.as_mut() {
            if log.record(context, message) {
                self.emit_event(SessionEvent::InterceptionUpdated);
            }
        }
    }

    fn drop_conversation_state(&mut self, group_id: GroupId) {
        let conv = ConversationRef::Group(group_id);
        self.ephemeral.forget_conversation(&conv);
        if self.active_view.as_ref() == Some(&conv) {
            self.active_view = None;
        }
    }
}
