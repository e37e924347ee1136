//! Daily collection cycle.
//!
//! [`IngestionOrchestrator`] drives one cycle end to end:
//! `Idle -> Paginating -> Resolving -> Backfilling -> Persisting -> Done`,
//! or `Skipped` when today's snapshot batch exists or another cycle for
//! the same day is running.

pub mod guard;
pub mod orchestrator;
pub mod resolver;

pub use guard::{DayGuard, DayPermit};
pub use orchestrator::{CycleCounts, CycleError, CycleState, CycleSummary, IngestionOrchestrator};
pub use resolver::SymbolMap;
