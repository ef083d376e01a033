//! The message model.
//!
//! A message is immutable once created except for the two mutations the
//! protocol permits: a destructive edit and a hard delete. Reactions are a
//! toggled per-emoji membership set. Duplicate delivery from the dual-path
//! relay is absorbed by comparing both the message id and a content
//! fingerprint (sender + timestamp + content).

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Image attachments
// ---------------------------------------------------------------------------

/// An attached image: either a URI the host can resolve, or a
/// self-contained base64-encoded blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageRef {
    Uri(String),
    Blob { mime: String, data: String },
}

impl ImageRef {
    pub fn from_bytes(mime: impl Into<String>, bytes: &[u8]) -> Self {
        Self::Blob {
            mime: mime.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Blobs must carry an `image/*` mime type; URIs must be non-empty.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Uri(uri) => !uri.trim().is_empty(),
            Self::Blob { mime, data } => mime.starts_with("image/") && !data.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Content identity of a message, used to absorb duplicate delivery when the
/// same message arrives over both the direct and the relay path under
/// different envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn of(sender: &UserId, timestamp: DateTime<Utc>, content: &str) -> Self {
        Self(format!(
            "{}#{}#{}",
            sender,
            timestamp.timestamp_millis(),
            content
        ))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message as it travels over the wire and sits in history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique within its conversation, assigned by the sender at creation.
    pub id: MessageId,
    pub sender_id: UserId,
    /// Display name at send time. A privileged sender may override this to
    /// speak as another persona.
    pub sender_name: String,
    /// Avatar reference at send time, same override rule as `sender_name`.
    pub sender_avatar: Option<String>,
    /// Rich-text content. May be empty when an image is attached.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub image: Option<ImageRef>,
    /// Quoted message in the same conversation. Dangling ids (the quoted
    /// message was since deleted) are tolerated by readers.
    pub reply_to: Option<MessageId>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    /// emoji -> ids of users who reacted with it.
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
}

impl Message {
    pub fn new(sender_id: UserId, sender_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            sender_name: sender_name.into(),
            sender_avatar: None,
            content: content.into(),
            timestamp: Utc::now(),
            image: None,
            reply_to: None,
            edited: false,
            edited_at: None,
            reactions: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_reply_to(mut self, reply_to: MessageId) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// A message must carry content or an image (or both).
    pub fn has_payload(&self) -> bool {
        !self.content.trim().is_empty() || self.image.is_some()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.sender_id, self.timestamp, &self.content)
    }

    /// Toggle `user`'s membership under `emoji`. Returns true when the user
    /// is a member after the call. Empty emoji sets are dropped.
    pub fn toggle_reaction(&mut self, emoji: &str, user: &UserId) -> bool {
        let set = self.reactions.entry(emoji.to_string()).or_default();
        let present = if set.remove(user) {
            false
        } else {
            set.insert(user.clone());
            true
        };
        if set.is_empty() {
            self.reactions.remove(emoji);
        }
        present
    }

    /// Content reduced to plain text: markup tags stripped, whitespace
    /// collapsed. Used for previews and size-limited fields.
    pub fn plain_text(&self) -> String {
        let mut out = String::with_capacity(self.content.len());
        let mut in_tag = false;
        for c in self.content.chars() {
            match c {
                '<' => in_tag = true,
                '>' if in_tag => in_tag = false,
                c if !in_tag => out.push(c),
                _ => {}
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message::new(UserId::from("u1"), "Ulrik", "hello")
    }

    #[test]
    fn payload_requires_content_or_image() {
        let mut m = msg();
        assert!(m.has_payload());

        m.content = "   ".into();
        assert!(!m.has_payload());

        m.image = Some(ImageRef::Uri("backgrounds/tavern.webp".into()));
        assert!(m.has_payload());
    }

    #[test]
    fn reaction_toggle_round_trips() {
        let mut m = msg();
        let u = UserId::from("u2");

        assert!(m.toggle_reaction("🔥", &u));
        assert_eq!(m.reactions["🔥"].len(), 1);

        assert!(!m.toggle_reaction("🔥", &u));
        assert!(m.reactions.is_empty());
    }

    #[test]
    fn fingerprint_ignores_message_id() {
        let a = msg();
        let mut b = a.clone();
        b.id = MessageId::new();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.content = "different".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn plain_text_strips_markup() {
        let mut m = msg();
        m.content = "<p>hello  <b>world</b></p>".into();
        assert_eq!(m.plain_text(), "hello world");
    }

    #[test]
    fn blob_image_must_be_an_image() {
        assert!(ImageRef::from_bytes("image/png", b"\x89PNG").is_valid());
        assert!(!ImageRef::from_bytes("text/html", b"<html>").is_valid());
        assert!(!ImageRef::Uri("  ".into()).is_valid());
    }
}
