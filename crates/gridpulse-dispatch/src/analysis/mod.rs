//! Capability handler implementations.
//!
//! `stats` computes closed-form statistics in-process; `insight` delegates
//! to a hosted chat model via `gridpulse-providers`.

pub mod insight;
pub mod stats;
