//! # GridPulse Core
//!
//! Shared foundation for the GridPulse dispatch service: the TOML
//! configuration system and the error taxonomy every other crate maps onto.

pub mod config;
pub mod error;

pub use config::GridPulseConfig;
pub use error::{GridPulseError, Result};
