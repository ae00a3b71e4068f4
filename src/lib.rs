//! Offline-first media delivery and session continuity for the campus
//! platform.
//!
//! - [`media`]: durable store for downloaded lesson media
//! - [`interceptor`]: request interceptor with per-class caching strategies
//! - [`session`]: last-known identity with a bounded lifetime
//! - [`connectivity`]: offline redirect and reconnect restore
//! - [`upload`]: relay or direct-to-storage upload selection

pub mod app;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod interceptor;
pub mod media;
pub mod net;
pub mod server;
pub mod session;
pub mod upload;

pub use error::{Error, Result};
