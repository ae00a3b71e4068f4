//! Connectivity transition controller.
//!
//! Edge-triggered by online/offline signals. Going offline moves the user
//! to an offline-safe view (the media library when downloads exist); coming
//! back restores the previous location once, after a settle delay.

mod controller;
mod signals;

pub use controller::{ConnectivityController, Navigator, OfflineViews, Transition};
pub use signals::{is_reachable, Connectivity, ConnectivitySignals, SignalSender};
