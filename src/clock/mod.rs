//! Reference-clock synchronisation.
//!
//! [`drift`] holds the pure offset and drift math; [`service`] (feature
//! `network`) runs the periodic queries against a time server.

pub mod drift;
#[cfg(feature = "network")]
pub mod service;
