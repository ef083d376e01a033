//! # cyphur-net
//!
//! The transport seam. The host provides a best-effort broadcast bus that
//! can address all clients or an explicit recipient list; this crate
//! defines that capability as the [`Transport`] trait and ships
//! [`LoopbackBus`], an in-process implementation on tokio mpsc channels
//! used by tests and same-process embeddings. Delivery is fire-and-forget:
//! offline recipients simply miss the frame.

pub mod bus;

mod error;

pub use bus::{BusEndpoint, InboundFrame, LoopbackBus, Recipients, Transport};
pub use error::NetError;
