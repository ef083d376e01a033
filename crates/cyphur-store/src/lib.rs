//! # cyphur-store
//!
//! Client-local authoritative state for Cyphur: conversation history with
//! its dedup and cap invariants, the privileged interception log, ephemeral
//! presence state, and the named-blob persistence layer over the host's
//! config store. All state is in-memory first; persistence is a best-effort
//! snapshot that follows the mutation.

pub mod conversations;
pub mod ephemeral;
pub mod intercept;
pub mod models;
pub mod settings;

mod error;

pub use conversations::{Appended, ConversationStore};
pub use ephemeral::EphemeralState;
pub use error::{Result, StoreError};
pub use intercept::{
    InterceptContext, InterceptFilter, InterceptKind, InterceptSort, InterceptedRecord,
    InterceptionLog,
};
pub use settings::{ConfigStore, MemoryConfigStore, Scope};
