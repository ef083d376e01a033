//! Reconnect catch-up.
//!
//! The privileged session mirrors everything, so it is the one peer that
//! can answer a [`SyncRequest`] authoritatively. The answer is a pair of
//! snapshot frames addressed to the requester alone, filtered to what the
//! requester may see; the requester merges them through the same dedup the
//! live path uses, so replays are harmless.

use tracing::{debug, info};

use cyphur_net::{Recipients, Transport};
use cyphur_shared::protocol::{GroupSync, PrivateSync, RelayEvent, SyncRequest};
use cyphur_shared::roster::Roster;
use cyphur_store::ConfigStore;

use crate::events::SessionEvent;
use crate::session::Session;

impl<T: Transport, R: Roster, C: ConfigStore> Session<T, R, C> {
    pub(crate) fn on_sync_request(&mut self, ev: SyncRequest) {
        if !self.me.privileged {
            return;
        }

        let privates = self.store.private_snapshots_for(&ev.requester);
        let groups = self.store.group_snapshots_for(&ev.requester);
        info!(
            requester = %ev.requester,
            privates = privates.len(),
            groups = groups.len(),
            "Answering sync request"
        );

        // Both answers are best-effort, like everything else on the bus.
        self.emit_relay_copy(
            Recipients::one(ev.requester.clone()),
            &RelayEvent::PrivateSync(PrivateSync {
                conversations: privates,
            }),
        );
        self.emit_relay_copy(
            Recipients::one(ev.requester),
            &RelayEvent::GroupSync(GroupSync { groups }),
        );
    }

    pub(crate) fn on_private_sync(&mut self, ev: PrivateSync) {
        let me = self.me.id.clone();
        let mut added = 0;
        for snapshot in ev.conversations {
            added += self.store.merge_private_snapshot(snapshot, &me);
        }
        debug!(messages_added = added, "Private sync merged");
        self.emit_event(SessionEvent::SyncApplied {
            messages_added: added,
        });
        if added > 0 {
            self.flush();
        }
    }

    pub(crate) fn on_group_sync(&mut self, ev: GroupSync) {
        let me = self.me.id.clone();
        let mut added = 0;
        let mut merged_any = false;
        for snapshot in ev.groups {
            if let Some(n) = self.store.merge_group_snapshot(snapshot, &me) {
                added += n;
                merged_any = true;
            }
        }
        debug!(messages_added = added, "Group sync merged");
        self.emit_event(SessionEvent::SyncApplied {
            messages_added: added,
        });
        if merged_any {
            self.flush();
        }
    }
}
