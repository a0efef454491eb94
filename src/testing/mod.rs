//! Testing infrastructure
//!
//! Deterministic fault injection at session checkpoints.

pub mod fault_injection;

pub use fault_injection::{Checkpoint, FaultPlan};
