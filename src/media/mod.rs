//! Durable storage for lesson media downloaded for offline playback.
//!
//! - One SQLite table keyed by caller-chosen id, indexed by course
//! - Atomic insert-or-overwrite per key; quota failures leave the old value
//! - Optional byte budget with least-recently-played eviction

mod store;
mod types;

pub use store::MediaStore;
pub use types::{DownloadRequest, MediaHandle, MediaMetadata, MediaObject};
