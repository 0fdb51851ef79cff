//! # GridPulse Dispatch
//!
//! The dispatch core of the GridPulse power-monitoring backend: persisted
//! analysis tasks routed to capability providers, executed on demand or by
//! a due-task poller.
//!
//! ## Architecture
//! ```text
//! HTTP request ─┐
//!               ├─→ TaskStore (SQLite, atomic claims)
//! Poller tick ──┘         │
//!                         ▼
//!               TaskExecutor ──→ CapabilityRegistry
//!                         │            ├── StatisticsProvider (in-process)
//!                         │            │     ├── trend_analysis
//!                         │            │     └── anomaly_detection
//!                         │            └── InsightProvider (LLM chat)
//!                         │                  ├── sentiment_analysis
//!                         │                  ├── summarization
//!                         │                  └── task_decomposition
//!                         ▼
//!               result/error written back, pending children re-queued
//! ```
//!
//! Status transitions are claimed with single `UPDATE ... RETURNING`
//! statements, so concurrent executors and multi-process pollers cannot
//! double-run a task.

pub mod analysis;
pub mod executor;
pub mod poller;
pub mod registry;
pub mod store;
pub mod task;

pub use analysis::insight::InsightProvider;
pub use analysis::stats::StatisticsProvider;
pub use executor::TaskExecutor;
pub use registry::{CapabilityProvider, CapabilityRegistry, ProviderInfo};
pub use store::TaskStore;
pub use task::{Capability, NewTask, Task, TaskPatch, TaskPriority, TaskStatus};
