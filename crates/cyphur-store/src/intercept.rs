//! The privileged observer's interception log.
//!
//! A write-only shadow copy of every message the observer can see, built
//! purely from delivered events. Capped ring buffer, session-only (never
//! persisted), never synced back to the parties' own stores. Deleting a
//! group or a message does not remove its interception records; the audit
//! trail persists.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use cyphur_shared::constants::INTERCEPTION_CAP;
use cyphur_shared::message::Message;
use cyphur_shared::types::{GroupId, MessageId, UserId};

/// Where an intercepted message was travelling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum InterceptContext {
    Private { a: UserId, b: UserId },
    /// Group display name captured at interception time; later renames do
    /// not rewrite history.
    Group { id: GroupId, name: String },
}

/// One captured message with its context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptedRecord {
    pub id: Uuid,
    pub intercepted_at: DateTime<Utc>,
    pub context: InterceptContext,
    pub message: Message,
}

impl InterceptedRecord {
    fn involves(&self, user: &UserId) -> bool {
        if self.message.sender_id == *user {
            return true;
        }
        match &self.context {
            InterceptContext::Private { a, b } => a == user || b == user,
            InterceptContext::Group { .. } => false,
        }
    }
}

/// Which records a query keeps.
#[derive(Debug, Clone, Default)]
pub struct InterceptFilter {
    pub kind: Option<InterceptKind>,
    /// Keep records involving at least one of these users.
    pub participants: Option<HashSet<UserId>>,
    /// Case-insensitive match over sender name, plain-text content, and
    /// group name.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptKind {
    Private,
    Group,
    Flagged,
    HasImage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InterceptSort {
    #[default]
    NewestFirst,
    OldestFirst,
    Sender,
    Kind,
}

/// Append-only capped mirror of observed traffic.
#[derive(Debug, Clone)]
pub struct InterceptionLog {
    records: VecDeque<InterceptedRecord>,
    cap: usize,
    /// Observer-local marker set, not replicated.
    flagged: HashSet<MessageId>,
    /// Watermark for the "new since last look" badge; unrelated to the
    /// per-conversation unread counters ordinary participants keep.
    last_viewed: Option<DateTime<Utc>>,
}

impl Default for InterceptionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptionLog {
    pub fn new() -> Self {
        Self::with_cap(INTERCEPTION_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            records: VecDeque::new(),
            cap,
            flagged: HashSet::new(),
            last_viewed: None,
        }
    }

    /// Record a message. A message id already present is skipped, so a
    /// message reaching the observer by more than one path yields exactly
    /// one record. Returns whether a record was added.
    pub fn record(&mut self, context: InterceptContext, message: Message) -> bool {
        if self.records.iter().any(|r| r.message.id == message.id) {
            return false;
        }
        if self.records.len() == self.cap {
            self.records.pop_front();
        }
        debug!(msg_id = %message.id, "Message intercepted");
        self.records.push_back(InterceptedRecord {
            id: Uuid::new_v4(),
            intercepted_at: Utc::now(),
            context,
            message,
        });
        true
    }

    /// Toggle the observer-local flag on a message id. Returns whether the
    /// message is flagged after the call.
    pub fn toggle_flag(&mut self, message_id: MessageId) -> bool {
        if self.flagged.remove(&message_id) {
            false
        } else {
            self.flagged.insert(message_id);
            true
        }
    }

    pub fn is_flagged(&self, message_id: MessageId) -> bool {
        self.flagged.contains(&message_id)
    }

    pub fn mark_viewed(&mut self) {
        self.last_viewed = Some(Utc::now());
    }

    /// Records newer than the last look.
    pub fn unseen_count(&self) -> usize {
        match self.last_viewed {
            None => self.records.len(),
            Some(watermark) => self
                .records
                .iter()
                .filter(|r| r.intercepted_at > watermark)
                .count(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Filtered, sorted view over the log.
    pub fn records(&self, filter: &InterceptFilter, sort: InterceptSort) -> Vec<&InterceptedRecord> {
        let needle = filter.text.as_ref().map(|t| t.to_lowercase());
        let mut out: Vec<&InterceptedRecord> = self
            .records
            .iter()
            .filter(|r| self.matches_kind(r, filter.kind))
            .filter(|r| match &filter.participants {
                None => true,
                Some(set) => set.iter().any(|u| r.involves(u)),
            })
            .filter(|r| match &needle {
                None => true,
                Some(needle) => self.matches_text(r, needle),
            })
            .collect();

        match sort {
            InterceptSort::NewestFirst => {
                out.sort_by(|a, b| b.intercepted_at.cmp(&a.intercepted_at))
            }
            InterceptSort::OldestFirst => {
                out.sort_by(|a, b| a.intercepted_at.cmp(&b.intercepted_at))
            }
            InterceptSort::Sender => out.sort_by(|a, b| {
                a.message
                    .sender_name
                    .to_lowercase()
                    .cmp(&b.message.sender_name.to_lowercase())
                    .then_with(|| b.intercepted_at.cmp(&a.intercepted_at))
            }),
            InterceptSort::Kind => out.sort_by(|a, b| {
                let rank = |r: &InterceptedRecord| match r.context {
                    InterceptContext::Private { .. } => 0u8,
                    InterceptContext::Group { .. } => 1,
                };
                rank(a)
                    .cmp(&rank(b))
                    .then_with(|| b.intercepted_at.cmp(&a.intercepted_at))
            }),
        }
        out
    }

    fn matches_kind(&self, record: &InterceptedRecord, kind: Option<InterceptKind>) -> bool {
        match kind {
            None => true,
            Some(InterceptKind::Private) => {
                matches!(record.context, InterceptContext::Private { .. })
            }
            Some(InterceptKind::Group) => {
                matches!(record.context, InterceptContext::Group { .. })
            }
            Some(InterceptKind::Flagged) => self.flagged.contains(&record.message.id),
            Some(InterceptKind::HasImage) => record.message.image.is_some(),
        }
    }

    fn matches_text(&self, record: &InterceptedRecord, needle: &str) -> bool {
        if record.message.sender_name.to_lowercase().contains(needle) {
            return true;
        }
        if record.message.plain_text().to_lowercase().contains(needle) {
            return true;
        }
        match &record.context {
            InterceptContext::Group { name, .. } => name.to_lowercase().contains(needle),
            InterceptContext::Private { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, content: &str) -> Message {
        Message::new(UserId::from(sender), sender.to_uppercase(), content)
    }

    fn private_ctx(a: &str, b: &str) -> InterceptContext {
        InterceptContext::Private {
            a: UserId::from(a),
            b: UserId::from(b),
        }
    }

    #[test]
    fn duplicate_message_yields_one_record() {
        let mut log = InterceptionLog::new();
        let m = message("u1", "meet at dusk");

        assert!(log.record(private_ctx("u1", "u2"), m.clone()));
        assert!(!log.record(private_ctx("u1", "u2"), m));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut log = InterceptionLog::with_cap(2);
        for i in 0..3 {
            log.record(private_ctx("u1", "u2"), message("u1", &format!("m{i}")));
        }
        let records = log.records(&InterceptFilter::default(), InterceptSort::OldestFirst);
        let contents: Vec<_> = records.iter().map(|r| r.message.content.clone()).collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[test]
    fn filters_compose() {
        let mut log = InterceptionLog::new();
        log.record(private_ctx("u1", "u2"), message("u1", "the harbor plan"));
        let flagged = message("u3", "unrelated");
        let flagged_id = flagged.id;
        log.record(
            InterceptContext::Group {
                id: GroupId::new(),
                name: "Heist".into(),
            },
            flagged,
        );
        log.toggle_flag(flagged_id);

        let private_only = log.records(
            &InterceptFilter {
                kind: Some(InterceptKind::Private),
                ..Default::default()
            },
            InterceptSort::default(),
        );
        assert_eq!(private_only.len(), 1);

        let by_text = log.records(
            &InterceptFilter {
                text: Some("HEIST".into()),
                ..Default::default()
            },
            InterceptSort::default(),
        );
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].message.sender_id, UserId::from("u3"));

        let by_flag = log.records(
            &InterceptFilter {
                kind: Some(InterceptKind::Flagged),
                ..Default::default()
            },
            InterceptSort::default(),
        );
        assert_eq!(by_flag.len(), 1);

        let by_participant = log.records(
            &InterceptFilter {
                participants: Some([UserId::from("u2")].into()),
                ..Default::default()
            },
            InterceptSort::default(),
        );
        assert_eq!(by_participant.len(), 1);
    }

    #[test]
    fn unseen_count_tracks_the_watermark() {
        let mut log = InterceptionLog::new();
        log.record(private_ctx("u1", "u2"), message("u1", "one"));
        assert_eq!(log.unseen_count(), 1);

        log.mark_viewed();
        assert_eq!(log.unseen_count(), 0);

        std::thread::sleep(std::time::Duration::from_millis(2));
        log.record(private_ctx("u1", "u2"), message("u1", "two"));
        assert_eq!(log.unseen_count(), 1);
    }
}
