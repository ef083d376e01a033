//! The event bus capability and its in-process implementation.
//!
//! [`LoopbackBus`] fans frames out to per-endpoint unbounded channels. An
//! endpoint that has been dropped behaves like an offline client: its
//! frames are silently lost, which is exactly the delivery guarantee the
//! host bus offers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use cyphur_shared::types::UserId;

use crate::error::NetError;

/// Addressing for one emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Every connected client except the sender.
    All,
    /// An explicit recipient list.
    Only(Vec<UserId>),
}

impl Recipients {
    pub fn one(user: UserId) -> Self {
        Self::Only(vec![user])
    }
}

/// One frame as it arrives at an endpoint.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub from: UserId,
    pub data: Bytes,
}

/// The emit half of the host bus, as seen by one client.
pub trait Transport {
    /// Fire-and-forget emission. Recipients that are offline or unknown
    /// simply never receive the frame.
    fn emit(&self, recipients: &Recipients, data: Bytes) -> Result<(), NetError>;
}

type Registry = Arc<Mutex<HashMap<UserId, mpsc::UnboundedSender<InboundFrame>>>>;

/// In-process bus connecting any number of endpoints.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    registry: Registry,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and get its endpoint plus the receiving half of
    /// its inbound queue.
    pub fn connect(&self, id: UserId) -> (BusEndpoint, mpsc::UnboundedReceiver<InboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id.clone(), tx);
        debug!(client = %id, "Endpoint connected");
        (
            BusEndpoint {
                id,
                registry: Arc::clone(&self.registry),
            },
            rx,
        )
    }

    /// Drop a client's inbound queue, simulating a disconnect.
    pub fn disconnect(&self, id: &UserId) {
        self.registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(id);
        debug!(client = %id, "Endpoint disconnected");
    }
}

/// One client's handle on the loopback bus.
#[derive(Debug, Clone)]
pub struct BusEndpoint {
    id: UserId,
    registry: Registry,
}

impl Transport for BusEndpoint {
    fn emit(&self, recipients: &Recipients, data: Bytes) -> Result<(), NetError> {
        let registry = self.registry.lock().map_err(|_| NetError::Unavailable)?;
        let frame = InboundFrame {
            from: self.id.clone(),
            data,
        };
        match recipients {
            Recipients::All => {
                for (id, tx) in registry.iter() {
                    if *id == self.id {
                        continue;
                    }
                    // A closed queue is an offline client; drop the frame.
                    let _ = tx.send(frame.clone());
                }
                trace!(from = %self.id, "Frame broadcast");
            }
            Recipients::Only(ids) => {
                for id in ids {
                    if let Some(tx) = registry.get(id) {
                        let _ = tx.send(frame.clone());
                    }
                }
                trace!(from = %self.id, count = ids.len(), "Frame addressed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<InboundFrame>) -> Vec<InboundFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn broadcast_excludes_the_sender() {
        let bus = LoopbackBus::new();
        let (a, mut a_rx) = bus.connect(UserId::from("a"));
        let (_b, mut b_rx) = bus.connect(UserId::from("b"));
        let (_c, mut c_rx) = bus.connect(UserId::from("c"));

        a.emit(&Recipients::All, Bytes::from_static(b"hi")).unwrap();

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx).len(), 1);
        assert_eq!(drain(&mut c_rx).len(), 1);
    }

    #[test]
    fn explicit_recipients_only() {
        let bus = LoopbackBus::new();
        let (a, _a_rx) = bus.connect(UserId::from("a"));
        let (_b, mut b_rx) = bus.connect(UserId::from("b"));
        let (_c, mut c_rx) = bus.connect(UserId::from("c"));

        a.emit(
            &Recipients::one(UserId::from("b")),
            Bytes::from_static(b"psst"),
        )
        .unwrap();

        let to_b = drain(&mut b_rx);
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].from, UserId::from("a"));
        assert!(drain(&mut c_rx).is_empty());
    }

    #[test]
    fn offline_recipients_drop_frames() {
        let bus = LoopbackBus::new();
        let (a, _a_rx) = bus.connect(UserId::from("a"));
        bus.disconnect(&UserId::from("ghost"));

        // Unknown and disconnected recipients are not an error.
        a.emit(
            &Recipients::one(UserId::from("ghost")),
            Bytes::from_static(b"anyone?"),
        )
        .unwrap();
    }
}
