//! dnstrail - passive DNS monitor that flags queries left unanswered.
//!
//! Outbound queries are correlated with inbound responses by a hash of
//! their question. Queries still pending after the staleness threshold are
//! reported by a periodic, bounded sweep.

pub mod capture;
pub mod config;
pub mod dns;
pub mod event;
pub mod key;
pub mod monitor;
pub mod stats;
pub mod store;
pub mod sweep;
