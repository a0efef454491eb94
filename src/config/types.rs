/// Core types and structures for the luabox system
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Sentinel appended once when an output cap is reached
pub const OUTPUT_LIMIT_SENTINEL: &str = "... (Output limit exceeded)";

/// Marker appended to a single value longer than `max_value_chars`
pub const VALUE_TRUNCATION_MARKER: &str = "... (truncated)";

/// Generic message for static denylist hits. Never names the pattern.
pub const POLICY_VIOLATION_MESSAGE: &str = "Dangerous code pattern detected and blocked";

/// Generic message for runtime access to removed capabilities (e.g. `_G`)
pub const CAPABILITY_BLOCKED_MESSAGE: &str = "Access to restricted capability blocked";

/// Globals removed from every fresh engine instance
pub const DEFAULT_BANNED_GLOBALS: &[&str] = &[
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "require",
    "package",
    "io",
    "os",
    "debug",
    "getmetatable",
    "setmetatable",
    "rawget",
    "rawset",
    "rawequal",
    "rawlen",
    "collectgarbage",
];

/// Source patterns rejected before any engine work (case-insensitive)
pub const DEFAULT_BANNED_PATTERNS: &[&str] = &[
    r"\bwhile\s+true\s+do\b",
    r"\bfor\b[^\n]*\bmath\s*\.\s*huge\b",
    r#"\brequire\s*[("']"#,
    r"\bdofile\s*\(",
    r"\bloadfile\s*\(",
    r"\bio\s*\.",
    r"\bos\s*\.",
    r"\bdebug\s*\.",
    r"\bpackage\s*\.",
    // `_ENV` is the real globals table and cannot be removed
    r"\b_ENV\b",
];

/// Execution policy: the static caps and denylists applied to every session.
///
/// Created once when the executor starts and shared read-only afterwards.
/// Missing fields in a policy file fall back to [`Policy::default`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Policy {
    /// Maximum accepted source size in bytes
    pub max_source_bytes: usize,
    /// Maximum output lines, sentinel included
    pub max_output_lines: usize,
    /// Maximum output bytes, sentinel included
    pub max_output_bytes: usize,
    /// Wall-clock budget measured from session creation
    pub max_wall_clock_millis: u64,
    /// Maximum recorded steps, terminal step included
    pub max_step_count: usize,
    /// Per-value character cap for print and locals rendering
    pub max_value_chars: usize,
    /// Print arguments beyond this count are ignored
    pub max_print_args: usize,
    /// Engine allocator cap in bytes
    pub max_memory_bytes: Option<usize>,
    /// When set, direct runs consult the guard every N VM instructions
    pub instruction_check_interval: Option<u32>,
    /// Treat reaching an output cap as fatal instead of truncating
    pub fail_on_output_overflow: bool,
    /// Replace `_G` with a sentinel that raises on any access
    pub restrict_global_table: bool,
    /// Globals set to nil in every fresh instance
    pub banned_global_names: BTreeSet<String>,
    /// Regex sources matched case-insensitively against submitted code
    pub banned_source_patterns: Vec<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_source_bytes: 50_000,
            max_output_lines: 1000,
            max_output_bytes: 100_000,
            max_wall_clock_millis: 2000,
            max_step_count: 10_000,
            max_value_chars: 1000,
            max_print_args: 100,
            max_memory_bytes: Some(64 * 1024 * 1024), // 64MB
            instruction_check_interval: None,          // cooperative checkpoints only
            fail_on_output_overflow: false,
            restrict_global_table: true,
            banned_global_names: DEFAULT_BANNED_GLOBALS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            banned_source_patterns: DEFAULT_BANNED_PATTERNS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
        }
    }
}

impl Policy {
    /// SHA256 of the canonical JSON form, stable across runs
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Threshold configured for a limit, as reported in errors
    pub fn threshold(&self, limit: LimitKind) -> u64 {
        match limit {
            LimitKind::SourceBytes => self.max_source_bytes as u64,
            LimitKind::OutputLines => self.max_output_lines as u64,
            LimitKind::OutputBytes => self.max_output_bytes as u64,
            LimitKind::WallClock => self.max_wall_clock_millis,
            LimitKind::Memory => self.max_memory_bytes.unwrap_or(0) as u64,
            LimitKind::Steps => self.max_step_count as u64,
        }
    }
}

/// How a request should be run
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionMode {
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "stepwise")]
    Stepwise,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Direct => write!(f, "direct"),
            ExecutionMode::Stepwise => write!(f, "stepwise"),
        }
    }
}

/// A single execution request. Owned by the caller until submitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source: String,
    pub mode: ExecutionMode,
}

impl ExecutionRequest {
    pub fn direct(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mode: ExecutionMode::Direct,
        }
    }

    pub fn stepwise(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mode: ExecutionMode::Stepwise,
        }
    }
}

/// Lifecycle states of an execution session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Loaded,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::TimedOut
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Created => "created",
            SessionState::Loaded => "loaded",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::TimedOut => "timed_out",
        };
        write!(f, "{}", label)
    }
}

/// Final status of one execution - STABLE TAXONOMY
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ExecutionStatus {
    /// Chunk ran to completion
    #[default]
    #[serde(rename = "completed")]
    Completed,
    /// Syntax, runtime, policy or memory failure inside a session
    #[serde(rename = "failed")]
    Failed,
    /// Guard trip (wall clock or fatal output overflow)
    #[serde(rename = "timed_out")]
    TimedOut,
    /// Refused by the source screen; no engine instance was created
    #[serde(rename = "rejected")]
    Rejected,
}

impl ExecutionStatus {
    /// Terminal session state that corresponds to this status
    pub fn session_state(self) -> Option<SessionState> {
        match self {
            ExecutionStatus::Completed => Some(SessionState::Completed),
            ExecutionStatus::Failed => Some(SessionState::Failed),
            ExecutionStatus::TimedOut => Some(SessionState::TimedOut),
            ExecutionStatus::Rejected => None,
        }
    }
}

/// Error classes surfaced to callers
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SyntaxError,
    RuntimeError,
    PolicyViolation,
    ResourceLimitExceeded,
    InternalHookError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::SyntaxError => "Syntax Error",
            ErrorKind::RuntimeError => "Runtime Error",
            ErrorKind::PolicyViolation => "Policy Violation",
            ErrorKind::ResourceLimitExceeded => "Resource Limit Exceeded",
            ErrorKind::InternalHookError => "Internal Hook Error",
        };
        write!(f, "{}", label)
    }
}

/// Named resource limits, keyed by their policy field
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LimitKind {
    #[serde(rename = "max_source_bytes")]
    SourceBytes,
    #[serde(rename = "max_output_lines")]
    OutputLines,
    #[serde(rename = "max_output_bytes")]
    OutputBytes,
    #[serde(rename = "max_wall_clock_millis")]
    WallClock,
    #[serde(rename = "max_memory_bytes")]
    Memory,
    #[serde(rename = "max_step_count")]
    Steps,
}

impl LimitKind {
    pub fn policy_field(self) -> &'static str {
        match self {
            LimitKind::SourceBytes => "max_source_bytes",
            LimitKind::OutputLines => "max_output_lines",
            LimitKind::OutputBytes => "max_output_bytes",
            LimitKind::WallClock => "max_wall_clock_millis",
            LimitKind::Memory => "max_memory_bytes",
            LimitKind::Steps => "max_step_count",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.policy_field())
    }
}

/// Which limit tripped and its configured threshold
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitBreach {
    pub limit: LimitKind,
    pub threshold: u64,
}

/// Error surfaced inside a result
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<LimitBreach>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            limit: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    /// Static denylist hit
    pub fn policy_violation() -> Self {
        Self::new(ErrorKind::PolicyViolation, POLICY_VIOLATION_MESSAGE)
    }

    /// Runtime access to a removed capability
    pub fn capability_blocked() -> Self {
        Self::new(ErrorKind::PolicyViolation, CAPABILITY_BLOCKED_MESSAGE)
    }

    pub fn resource_limit(limit: LimitKind, threshold: u64) -> Self {
        Self {
            kind: ErrorKind::ResourceLimitExceeded,
            message: format!("Resource limit exceeded: {} ({})", limit, threshold),
            limit: Some(LimitBreach { limit, threshold }),
        }
    }

    pub fn internal_hook(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalHookError, message)
    }

    /// True when the guard (not the allocator) stopped the run
    pub fn is_guard_trip(&self) -> bool {
        matches!(
            self.limit,
            Some(LimitBreach {
                limit: LimitKind::WallClock | LimitKind::OutputLines | LimitKind::OutputBytes,
                ..
            })
        )
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Output integrity classification
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputIntegrity {
    #[default]
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_line_limit")]
    TruncatedByLineLimit,
    #[serde(rename = "truncated_by_byte_limit")]
    TruncatedByByteLimit,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLineLimit => write!(f, "truncated_by_line_limit"),
            OutputIntegrity::TruncatedByByteLimit => write!(f, "truncated_by_byte_limit"),
        }
    }
}

/// Result of one session. Produced exactly once.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Captured print lines, sentinel included when truncated
    pub output: Vec<String>,
    pub error: Option<ErrorInfo>,
    pub elapsed_millis: u64,
    pub output_integrity: OutputIntegrity,
}

/// Runtime type of a rendered value
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Nil,
    Table,
    Function,
    Other,
}

impl TypeTag {
    /// Map an engine type name (`nil`, `integer`, `table`, ...) to a tag
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "string" => TypeTag::String,
            "number" | "integer" => TypeTag::Number,
            "boolean" => TypeTag::Boolean,
            "nil" => TypeTag::Nil,
            "table" => TypeTag::Table,
            "function" => TypeTag::Function,
            _ => TypeTag::Other,
        }
    }
}

/// A value as the engine itself would stringify it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedValue {
    pub type_tag: TypeTag,
    pub rendered: String,
}

/// One local binding of the innermost frame
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalBinding {
    pub name: String,
    #[serde(flatten)]
    pub value: RenderedValue,
}

/// Snapshot of program state at a source-line boundary
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionStep {
    /// 1-based, contiguous
    pub index: usize,
    /// None only for the terminal step
    pub source_line: Option<u32>,
    /// Trimmed text of `source_line`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_text: Option<String>,
    /// Outermost frame first
    pub call_stack: Vec<String>,
    pub locals: Vec<LocalBinding>,
    /// Everything printed so far
    pub output_snapshot: Vec<String>,
}

impl ExecutionStep {
    pub fn is_terminal(&self) -> bool {
        self.source_line.is_none()
    }

    pub fn local(&self, name: &str) -> Option<&RenderedValue> {
        self.locals
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| &binding.value)
    }
}

/// Stepwise run: recorded steps plus the final result
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StepwiseOutcome {
    pub steps: Vec<ExecutionStep>,
    pub result: ExecutionResult,
    /// Stepping stopped at `max_step_count` before the program ended
    pub steps_truncated: bool,
    /// Introspection failure; operator-facing only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_error: Option<ErrorInfo>,
}

/// Outcome of [`crate::exec::executor::ScriptExecutor::submit`]
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Direct(ExecutionResult),
    Stepwise(StepwiseOutcome),
}

impl ExecutionOutcome {
    pub fn result(&self) -> &ExecutionResult {
        match self {
            ExecutionOutcome::Direct(result) => result,
            ExecutionOutcome::Stepwise(outcome) => &outcome.result,
        }
    }
}

/// Host-facing errors for luabox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine failure outside a learner run, as the engine worded it
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Engine instance {instance_id} used after teardown")]
    InstanceClosed { instance_id: String },

    #[error("Engine instance {instance_id} torn down twice")]
    AlreadyClosed { instance_id: String },

    /// Carried through the engine as an external error to unwind a run
    #[error("Execution interrupted: {0}")]
    Interrupted(ErrorInfo),
}

impl From<mlua::Error> for SandboxError {
    fn from(err: mlua::Error) -> Self {
        SandboxError::Engine(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
