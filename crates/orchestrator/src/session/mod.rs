//! Session recovery: lets a client resume an interrupted conversational
//! workflow within a bounded time window.

pub mod recovery;
pub mod store;

pub use recovery::{
    RecoveryOffer, SessionKind, SessionRecoveryCache, SessionRecoveryConfig, SessionRecoveryRecord,
};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore, SessionStoreError};
