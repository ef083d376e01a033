//! # cyphur-client
//!
//! The per-client session coordinator. A [`Session`] owns this client's
//! conversation store, ephemeral state, and (for the privileged role) the
//! interception log; it exposes the mutation entry points a presentation
//! layer calls, applies incoming relay events idempotently, answers sync
//! requests, and publishes [`SessionEvent`] notifications over an mpsc
//! channel.
//!
//! Each session is a single logical thread of control: incoming frames are
//! handled one at a time, so no locking exists inside a session. Replicas
//! converge only through relayed events (last-writer-wins edits,
//! idempotent appends).

pub mod events;
pub mod session;
pub mod view;

mod error;
mod inbound;
mod sync;

pub use error::{Result, SessionError};
pub use events::SessionEvent;
pub use session::{MessageDraft, Persona, Session, SessionConfig};
pub use view::{ConversationSummary, MessageView, ReactionView, ReplyExcerpt};
