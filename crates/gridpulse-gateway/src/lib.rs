//! # GridPulse Gateway
//!
//! HTTP JSON API over the dispatch core: task CRUD, manual execution,
//! cancellation, and direct analysis shortcuts.

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, build_router, start};
