//! Outcome classification
//!
//! Turns engine errors and recorded breaches into learner-facing
//! [`crate::config::types::ErrorInfo`] values and final statuses.

pub mod classify;

pub use classify::{strip_traceback, ErrorClassifier};
