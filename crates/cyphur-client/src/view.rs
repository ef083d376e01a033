//! Read-side projections for a presentation layer.
//!
//! Nothing here mutates state except lazy typing-expiry pruning; the
//! session exposes flat view structs so a UI never reaches into the store
//! directly.

use chrono::{DateTime, Utc};

use cyphur_net::Transport;
use cyphur_shared::message::{ImageRef, Message};
use cyphur_shared::roster::Roster;
use cyphur_shared::types::{ConversationRef, MessageId, PrivateKey, UserId};
use cyphur_store::ConfigStore;

use crate::error::Result;
use crate::session::Session;

const EXCERPT_CHARS: usize = 80;

/// One entry in the conversation list.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conv: ConversationRef,
    pub title: String,
    /// Plain-text preview of the newest message.
    pub preview: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub unread: u32,
    pub favorite: bool,
    pub muted: bool,
    /// `None` for private conversations.
    pub member_count: Option<usize>,
}

/// One rendered message.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub image: Option<ImageRef>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply: Option<ReplyExcerpt>,
    pub reactions: Vec<ReactionView>,
    /// Sent by this client.
    pub mine: bool,
    pub pinned: bool,
}

/// The quoted message a reply points at.
#[derive(Debug, Clone)]
pub struct ReplyExcerpt {
    pub message_id: MessageId,
    pub sender_name: Option<String>,
    pub excerpt: Option<String>,
    /// The quoted message no longer exists; render a tombstone.
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct ReactionView {
    pub emoji: String,
    pub count: usize,
    /// This client is among the reactors.
    pub mine: bool,
}

impl<T: Transport, R: Roster, C: ConfigStore> Session<T, R, C> {
    /// All conversations this client can see, favorites first, then most
    /// recently active.
    pub fn conversation_list(&self) -> Vec<ConversationSummary> {
        let mut out: Vec<ConversationSummary> = Vec::new();

        for c in self.store.privates() {
            if !self.me.privileged && !c.key.includes(&self.me.id) {
                continue;
            }
            let conv = ConversationRef::Private(c.key.clone());
            out.push(self.summarize(
                conv,
                self.private_title(&c.key),
                c.messages.last(),
                c.last_activity,
                None,
            ));
        }
        for g in self.store.groups() {
            if !self.me.privileged && !g.is_member(&self.me.id) {
                continue;
            }
            let conv = ConversationRef::Group(g.id);
            out.push(self.summarize(
                conv,
                g.name.clone(),
                g.messages.last(),
                g.last_activity,
                Some(g.members.len()),
            ));
        }

        out.sort_by(|a, b| {
            b.favorite
                .cmp(&a.favorite)
                .then_with(|| b.last_activity.cmp(&a.last_activity))
                .then_with(|| a.title.cmp(&b.title))
        });
        out
    }

    /// Rendered history of one conversation, oldest first. Read access
    /// mirrors write access: participants and the privileged role.
    pub fn message_views(&self, conv: &ConversationRef) -> Result<Vec<MessageView>> {
        self.guard_participant(conv)?;
        let messages = self.store.messages(conv).unwrap_or(&[]);
        Ok(messages
            .iter()
            .map(|m| self.render(conv, messages, m))
            .collect())
    }

    fn render(&self, conv: &ConversationRef, history: &[Message], m: &Message) -> MessageView {
        let reply = m.reply_to.map(|target| {
            match history.iter().find(|q| q.id == target) {
                Some(quoted) => ReplyExcerpt {
                    message_id: target,
                    sender_name: Some(quoted.sender_name.clone()),
                    excerpt: Some(excerpt(quoted)),
                    deleted: false,
                },
                None => ReplyExcerpt {
                    message_id: target,
                    sender_name: None,
                    excerpt: None,
                    deleted: true,
                },
            }
        });

        let reactions = m
            .reactions
            .iter()
            .map(|(emoji, users)| ReactionView {
                emoji: emoji.clone(),
                count: users.len(),
                mine: users.contains(&self.me.id),
            })
            .collect();

        MessageView {
            id: m.id,
            sender_id: m.sender_id.clone(),
            sender_name: m.sender_name.clone(),
            sender_avatar: m.sender_avatar.clone(),
            content: m.content.clone(),
            timestamp: m.timestamp,
            image: m.image.clone(),
            edited: m.edited,
            edited_at: m.edited_at,
            reply,
            reactions,
            mine: m.sender_id == self.me.id,
            pinned: self.ephemeral.pins(conv).contains(&m.id),
        }
    }

    fn summarize(
        &self,
        conv: ConversationRef,
        title: String,
        last: Option<&Message>,
        last_activity: Option<DateTime<Utc>>,
        member_count: Option<usize>,
    ) -> ConversationSummary {
        ConversationSummary {
            preview: last.map(excerpt),
            last_activity,
            unread: self.ephemeral.unread(&conv),
            favorite: self.ephemeral.is_favorite(&conv),
            muted: self.ephemeral.is_muted(&conv),
            member_count,
            conv,
            title,
        }
    }

    fn private_title(&self, key: &PrivateKey) -> String {
        match key.other_party(&self.me.id) {
            Some(other) => self
                .roster
                .user(&other)
                .map(|u| u.display_name)
                .unwrap_or_else(|| other.to_string()),
            // The observer is not a party; label with both names.
            None => key
                .participants()
                .map(|(a, b)| format!("{} / {}", self.display_name(&a), self.display_name(&b)))
                .unwrap_or_else(|| key.to_string()),
        }
    }

    fn display_name(&self, id: &UserId) -> String {
        self.roster
            .user(id)
            .map(|u| u.display_name)
            .unwrap_or_else(|| id.to_string())
    }

}

fn excerpt(m: &Message) -> String {
    let text = m.plain_text();
    if text.is_empty() && m.image.is_some() {
        return "[image]".to_string();
    }
    if text.chars().count() <= EXCERPT_CHARS {
        return text;
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}…")
}

/// Compact age label for timestamps in lists.
pub fn relative_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now - ts;
    if delta.num_seconds() < 60 {
        "now".to_string()
    } else if delta.num_minutes() < 60 {
        format!("{}m", delta.num_minutes())
    } else if delta.num_hours() < 24 {
        format!("{}h", delta.num_hours())
    } else if delta.num_days() < 7 {
        format!("{}d", delta.num_days())
    } else {
        ts.format("%Y-%m-%d").to_string()
    }
}
