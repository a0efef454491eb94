//! luabox: sandboxed execution and step recording for learner Lua scripts
//!
//! Every request runs in a fresh embedded Lua 5.4 state with a reduced
//! global namespace, bounded output, a wall-clock budget and an allocator cap.
//! Stepwise runs additionally record one snapshot per source line reached:
//! call stack, rendered locals and the output printed so far.
//!
//! # Architecture
//!
//! ## Execution Control ([`exec`])
//! - [`exec::executor`]: `ScriptExecutor`, the public entry point
//! - [`exec::session`]: Type-state session lifecycle (`Created -> Loaded -> result`)
//! - [`exec::guard`]: Wall-clock and output budget checks
//! - [`exec::context`]: Per-session run state shared with engine callbacks
//! - [`exec::stepper`]: Line-boundary step recording
//!
//! ## Engine Runtime ([`runtime`])
//! - [`runtime::engine`]: Exclusive ownership of one Lua state
//! - [`runtime::environment`]: Restricted globals, bounded `print`, `_G` sentinel
//! - [`runtime::introspect`]: Frame walk and locals through captured debug functions
//! - [`runtime::render`]: Engine-native stringification and truncation
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::classify`]: Engine errors and breaches to learner-facing outcomes
//!
//! ## Safety & Teardown ([`safety`])
//! - [`safety::teardown`]: Create/close accounting for every engine instance
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration & Policy ([`config`])
//! - [`config::types`]: Shared type definitions and closed enums
//! - [`config::loader`]: Policy files and preset resolution
//! - [`config::presets`]: Versioned policy envelopes
//! - [`config::validator`]: Policy validation
//! - [`config::policy`]: Static source screen
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: Bounded output sink
//! - [`utils::json_schema`]: Stable JSON run report
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::fault_injection`]: Deterministic checkpoint failures
//!
//! # Design Principles
//!
//! 1. **Capabilities removed, not filtered** - the source screen is advisory;
//!    the environment is the boundary
//! 2. **One instance per request** - nothing survives between runs
//! 3. **Close exactly once** - every exit path tears down before returning
//! 4. **Types prevent misuse** - a session cannot run twice or before loading
//! 5. **Engine as truth** - values and errors read exactly as Lua reports them

// Execution Control
pub mod exec;

// Engine runtime
pub mod runtime;

// Outcome classification
pub mod verdict;

// Safety & Teardown
pub mod safety;

// Observability
pub mod observability;

// Configuration & Policy
pub mod config;

// Utilities
pub mod utils;

// Testing Infrastructure
pub mod testing;

// Command-line interface
pub mod cli;

pub use config::types::{
    ErrorInfo, ErrorKind, ExecutionMode, ExecutionOutcome, ExecutionRequest, ExecutionResult,
    ExecutionStatus, ExecutionStep, LimitKind, LocalBinding, OutputIntegrity, Policy,
    RenderedValue, Result, SandboxError, SessionState, StepwiseOutcome, TypeTag,
};
pub use exec::{ScriptExecutor, Session};
pub use safety::TeardownLedger;
pub use testing::{Checkpoint, FaultPlan};
