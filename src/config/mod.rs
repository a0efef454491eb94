//! Configuration and policy
//!
//! Policy definition, presets, loading and validation.

pub mod loader;
pub mod policy;
pub mod presets;
pub mod types;
pub mod validator;
