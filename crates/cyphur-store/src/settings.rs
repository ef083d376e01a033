//! Persistence over the host's named-blob config store.
//!
//! The host exposes a durable key-value store with two scopes: `Shared`
//! (writable only by the privileged role, readable by everyone) and
//! `Client` (owned by this client). Each concern maps to one named JSON
//! blob. In-memory state stays authoritative; these snapshots follow it,
//! and a missing or corrupt blob loads as empty state.
//!
//! The interception log is deliberately absent here: it is session-only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cyphur_shared::constants::{
    BLOB_BACKGROUNDS, BLOB_CONVERSATIONS, BLOB_FAVORITES, BLOB_MUTES, BLOB_PINS, BLOB_UNREAD,
};
use cyphur_shared::protocol::{BackgroundScope, GroupSnapshot, PrivateSnapshot};
use cyphur_shared::types::{ConversationRef, MessageId, UserId};

use crate::conversations::ConversationStore;
use crate::ephemeral::EphemeralState;
use crate::error::{Result, StoreError};
use crate::models::{Group, PrivateConversation};

/// Which side of the config store a blob lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Global, privileged-writable.
    Shared,
    /// Per-client, owner-writable.
    Client,
}

/// The host's durable config store capability.
pub trait ConfigStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, scope: Scope, key: &str, blob: Vec<u8>) -> Result<()>;
}

/// In-process config store for tests and embedding hosts.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    shared: HashMap<String, Vec<u8>>,
    client: HashMap<String, Vec<u8>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<Vec<u8>>> {
        let map = match scope {
            Scope::Shared => &self.shared,
            Scope::Client => &self.client,
        };
        Ok(map.get(key).cloned())
    }

    fn set(&mut self, scope: Scope, key: &str, blob: Vec<u8>) -> Result<()> {
        let map = match scope {
            Scope::Shared => &mut self.shared,
            Scope::Client => &mut self.client,
        };
        map.insert(key.to_string(), blob);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blob shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConversationsBlob {
    privates: Vec<PrivateSnapshot>,
    groups: Vec<GroupSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UnreadBlob {
    entries: Vec<UnreadEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnreadEntry {
    conv: ConversationRef,
    count: u32,
    last_read: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RefSetBlob {
    refs: Vec<ConversationRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PinsBlob {
    entries: Vec<(ConversationRef, Vec<MessageId>)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BackgroundsBlob {
    entries: Vec<(BackgroundScope, String)>,
}

fn save_json<T: Serialize>(
    config: &mut dyn ConfigStore,
    scope: Scope,
    key: &str,
    value: &T,
) -> Result<()> {
    let blob = serde_json::to_vec(value)?;
    config.set(scope, key, blob)?;
    debug!(key, "Blob flushed");
    Ok(())
}

/// Load a blob, treating a missing one as `None` and surfacing corruption
/// as an error the caller downgrades to a warning.
fn load_json<T: DeserializeOwned>(
    config: &dyn ConfigStore,
    scope: Scope,
    key: &str,
) -> Result<Option<T>> {
    match config.get(scope, key)? {
        None => Ok(None),
        Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
    }
}

// ---------------------------------------------------------------------------
// High-level snapshot round trips
// ---------------------------------------------------------------------------

/// Flush the full conversation state to the shared `conversations` blob.
/// Only a privileged session calls this; the Shared scope is not writable
/// by ordinary clients.
pub fn save_conversations(store: &ConversationStore, config: &mut dyn ConfigStore) -> Result<()> {
    let blob = ConversationsBlob {
        privates: store.privates().map(PrivateConversation::snapshot).collect(),
        groups: store.groups().map(Group::snapshot).collect(),
    };
    save_json(config, Scope::Shared, BLOB_CONVERSATIONS, &blob)
}

/// Rebuild conversation state from the shared blob, filtered to what `me`
/// may see: own private conversations and groups, everything when
/// privileged. Returns how many conversations were loaded.
pub fn load_conversations(
    store: &mut ConversationStore,
    config: &dyn ConfigStore,
    me: &UserId,
    privileged: bool,
) -> Result<usize> {
    let blob: ConversationsBlob =
        match load_json(config, Scope::Shared, BLOB_CONVERSATIONS) {
            Ok(Some(blob)) => blob,
            Ok(None) => return Ok(0),
            Err(StoreError::Serialization(e)) => {
                warn!(error = %e, "Corrupt conversations blob, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

    let mut loaded = 0;
    for snapshot in blob.privates {
        if privileged || snapshot.key.includes(me) {
            store.merge_private_snapshot_unchecked(snapshot);
            loaded += 1;
        }
    }
    for snapshot in blob.groups {
        if privileged || snapshot.members.contains(me) {
            store.merge_group_snapshot_unchecked(snapshot);
            loaded += 1;
        }
    }
    Ok(loaded)
}

/// Flush every per-client ephemeral blob.
pub fn save_ephemeral(state: &EphemeralState, config: &mut dyn ConfigStore) -> Result<()> {
    let unread = UnreadBlob {
        entries: state
            .unread_entries()
            .into_iter()
            .map(|(conv, count, last_read)| UnreadEntry {
                conv,
                count,
                last_read,
            })
            .collect(),
    };
    save_json(config, Scope::Client, BLOB_UNREAD, &unread)?;
    save_json(
        config,
        Scope::Client,
        BLOB_FAVORITES,
        &RefSetBlob {
            refs: state.favorites(),
        },
    )?;
    save_json(
        config,
        Scope::Client,
        BLOB_MUTES,
        &RefSetBlob {
            refs: state.mutes(),
        },
    )?;
    save_json(
        config,
        Scope::Client,
        BLOB_PINS,
        &PinsBlob {
            entries: state.all_pins(),
        },
    )?;
    save_json(
        config,
        Scope::Client,
        BLOB_BACKGROUNDS,
        &BackgroundsBlob {
            entries: state.all_backgrounds(),
        },
    )
}

/// Restore the per-client ephemeral blobs; each missing or corrupt blob
/// falls back to empty state on its own.
pub fn load_ephemeral(state: &mut EphemeralState, config: &dyn ConfigStore) -> Result<()> {
    if let Some(blob) = load_lenient::<UnreadBlob>(config, BLOB_UNREAD)? {
        state.restore_unread(
            blob.entries
                .into_iter()
                .map(|e| (e.conv, e.count, e.last_read))
                .collect(),
        );
    }
    if let Some(blob) = load_lenient::<RefSetBlob>(config, BLOB_FAVORITES)? {
        state.restore_favorites(blob.refs);
    }
    if let Some(blob) = load_lenient::<RefSetBlob>(config, BLOB_MUTES)? {
        state.restore_mutes(blob.refs);
    }
    if let Some(blob) = load_lenient::<PinsBlob>(config, BLOB_PINS)? {
        state.restore_pins(blob.entries);
    }
    if let Some(blob) = load_lenient::<BackgroundsBlob>(config, BLOB_BACKGROUNDS)? {
        state.restore_backgrounds(blob.entries);
    }
    Ok(())
}

fn load_lenient<T: DeserializeOwned>(config: &dyn ConfigStore, key: &str) -> Result<Option<T>> {
    match load_json(config, Scope::Client, key) {
        Ok(v) => Ok(v),
        Err(StoreError::Serialization(e)) => {
            warn!(key, error = %e, "Corrupt blob, ignoring");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyphur_shared::message::Message;
    use cyphur_shared::types::PrivateKey;
    use std::collections::BTreeSet;

    #[test]
    fn conversations_round_trip_through_the_shared_blob() {
        let mut store = ConversationStore::new();
        let u1 = UserId::from("u1");
        let u2 = UserId::from("u2");
        let conv = ConversationRef::private(&u1, &u2);
        store
            .append_message(&conv, Message::new(u1.clone(), "Ulrik", "hello"))
            .unwrap();
        store.create_group("heist", BTreeSet::new(), u1.clone());

        let mut config = MemoryConfigStore::new();
        save_conversations(&store, &mut config).unwrap();

        let mut restored = ConversationStore::new();
        let loaded = load_conversations(&mut restored, &config, &u2, false).unwrap();
        assert_eq!(loaded, 1); // the private conversation; u2 is no group member
        assert_eq!(restored.messages(&conv).unwrap().len(), 1);

        let mut observer = ConversationStore::new();
        let loaded = load_conversations(&mut observer, &config, &UserId::from("gm"), true).unwrap();
        assert_eq!(loaded, 2);
    }

    #[test]
    fn missing_blobs_load_as_empty_state() {
        let config = MemoryConfigStore::new();
        let mut store = ConversationStore::new();
        let mut state = EphemeralState::new();

        assert_eq!(
            load_conversations(&mut store, &config, &UserId::from("u1"), false).unwrap(),
            0
        );
        load_ephemeral(&mut state, &config).unwrap();
    }

    #[test]
    fn corrupt_blob_is_ignored() {
        let mut config = MemoryConfigStore::new();
        config
            .set(Scope::Client, BLOB_FAVORITES, b"not json".to_vec())
            .unwrap();

        let mut state = EphemeralState::new();
        load_ephemeral(&mut state, &config).unwrap();
    }

    #[test]
    fn ephemeral_round_trip() {
        let mut state = EphemeralState::new();
        let conv = ConversationRef::Private(PrivateKey::of(
            &UserId::from("u1"),
            &UserId::from("u2"),
        ));
        state.bump_unread(&conv);
        state.toggle_favorite(&conv);
        state.toggle_mute(&conv);
        let pin = MessageId::new();
        state.toggle_pin(&conv, pin);
        state.set_background(BackgroundScope::Global, "bg/ship.webp".into());

        let mut config = MemoryConfigStore::new();
        save_ephemeral(&state, &mut config).unwrap();

        let mut restored = EphemeralState::new();
        load_ephemeral(&mut restored, &config).unwrap();
        assert_eq!(restored.unread(&conv), 1);
        assert!(restored.is_favorite(&conv));
        assert!(restored.is_muted(&conv));
        assert_eq!(restored.pins(&conv), &[pin]);
        assert_eq!(restored.background_for(&conv), Some("bg/ship.webp"));
    }
}
