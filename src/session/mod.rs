//! Viewer session module
//!
//! One session is a single automated viewer bound to a persistent profile,
//! tracked through its lifecycle and launched with bounded retries.

mod launcher;
mod lifecycle;

pub use launcher::{LaunchOutcome, LaunchWorker, LaunchWorkerConfig};
pub use lifecycle::{next_phase, LifecycleEvent, LifecyclePhase, LifecycleState, Session};
