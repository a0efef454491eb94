//! Execution control
//!
//! Session lifecycle, budget enforcement and step recording.

pub mod context;
pub mod executor;
pub mod guard;
pub mod session;
pub mod stepper;

pub use executor::ScriptExecutor;
pub use session::{Created, Loaded, Session, CHUNK_NAME};
