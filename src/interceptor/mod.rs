//! Network-state-aware request interceptor.
//!
//! Sits between the application and the network and answers from its own
//! response cache when the network is gone:
//! - API requests always go to the network and fail naturally offline
//! - Media is served cache-first and refreshed in the background
//! - Everything else is network-first with stale-if-error fallback
//!
//! Cached responses live in a named generation; activating a new version
//! deletes every other generation.

mod cache;
mod engine;
mod strategy;

pub use cache::{CachedResponse, ResponseCache};
pub use engine::{
  Intercepted, Interceptor, InterceptorSettings, Lifecycle, Message, Reply, ResponseSource,
};
pub use strategy::{ClassifierRules, ResourceClass, Strategy};
