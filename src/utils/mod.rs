//! Utilities
//!
//! Bounded output collection and the stable JSON run report.

pub mod json_schema;
pub mod output;
