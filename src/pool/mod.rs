//! Session pool module
//!
//! Top-level coordination: the orchestrator owning the backlog/active sets
//! and the scheduler deciding which sessions to retire.

mod orchestrator;
mod replace;

pub use orchestrator::{RunReport, SeedSummary, SessionPool};
pub use replace::{ReplacementEvent, ReplacementReason, ReplacementScheduler};
