//! Engine runtime
//!
//! Ownership of the embedded Lua state, the restricted learner environment,
//! and the value and frame inspection used by the step recorder.

pub mod engine;
pub mod environment;
pub mod introspect;
pub mod render;

pub use engine::EngineInstance;
