//! # cyphur-shared
//!
//! Wire protocol and core domain types shared by every Cyphur crate:
//! identifiers, the message model, the tagged relay-event taxonomy, and the
//! roster capability through which the host session exposes its users.

pub mod constants;
pub mod message;
pub mod protocol;
pub mod roster;
pub mod types;

mod error;

pub use error::ProtocolError;
