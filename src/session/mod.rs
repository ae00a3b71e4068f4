//! Last-known identity for offline UI gating.
//!
//! The cached identity trails the live session and expires after a fixed
//! TTL. It is a distinct type from the live [`SessionToken`], so it cannot
//! stand in for a credential.

mod cache;
mod identity;

pub use cache::{SessionCache, DEFAULT_TTL_DAYS};
pub use identity::{IdentityProfile, OfflineIdentity, SessionToken};
