//! Policy modules
//!
//! Static source screening applied before any engine instance exists.

pub mod screen;

// Re-export commonly used items
pub use screen::*;
