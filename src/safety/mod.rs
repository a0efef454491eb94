//! Safety and teardown
//!
//! Every engine instance is accounted for from creation to its single close.

pub mod teardown;

pub use teardown::TeardownLedger;
