/// Security event logging framework for luabox
/// Structured, operator-facing record of what learner code attempted and how
/// each session ended. Denylist details are logged here and never shown to users.
use crate::config::types::{ErrorInfo, ExecutionMode, ExecutionStatus, Result, SandboxError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

/// Security event severity levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of security events we track
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SecurityEventType {
    // Lifecycle events
    ExecutionStarted,
    ExecutionFinished,

    // Policy events
    SourceRejected,
    CapabilityAccess,

    // Limit violation events
    WallClockLimitViolation,
    OutputLimitViolation,
    MemoryLimitViolation,
    StepLimitReached,

    // Instrumentation and teardown
    InternalHookFailure,
    TeardownViolation,
}

impl SecurityEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::ExecutionStarted => SecuritySeverity::Low,
            SecurityEventType::ExecutionFinished => SecuritySeverity::Low,

            SecurityEventType::SourceRejected => SecuritySeverity::Medium,
            SecurityEventType::CapabilityAccess => SecuritySeverity::High,

            SecurityEventType::WallClockLimitViolation => SecuritySeverity::Medium,
            SecurityEventType::OutputLimitViolation => SecuritySeverity::Low,
            SecurityEventType::MemoryLimitViolation => SecuritySeverity::High,
            SecurityEventType::StepLimitReached => SecuritySeverity::Low,

            SecurityEventType::InternalHookFailure => SecuritySeverity::High,
            SecurityEventType::TeardownViolation => SecuritySeverity::Critical,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationIds {
    /// Unique request identifier
    pub request_id: String,
    /// Session identifier (one per engine instance)
    pub session_id: String,
    /// Execution mode of the session
    pub mode: Option<ExecutionMode>,
}

impl CorrelationIds {
    /// Create new correlation IDs for a session
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().to_string(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Reuse a caller-supplied request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Individual security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub policy_fingerprint: Option<String>,
    /// Index of the denylist pattern that matched (operator-only)
    pub pattern_index: Option<usize>,
    pub error: Option<ErrorInfo>,
}

impl SecurityEvent {
    /// Create a new security event with default severity
    pub fn new(event_type: SecurityEventType, details: String) -> Self {
        let severity = event_type.default_severity();
        Self {
            event_type,
            severity,
            timestamp: chrono::Utc::now(),
            details,
            correlation: None,
            policy_fingerprint: None,
            pattern_index: None,
            error: None,
        }
    }

    pub fn with_severity(mut self, severity: SecuritySeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_policy_fingerprint(mut self, fingerprint: String) -> Self {
        self.policy_fingerprint = Some(fingerprint);
        self
    }

    pub fn with_pattern_index(mut self, index: usize) -> Self {
        self.pattern_index = Some(index);
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    /// JSON line written to the audit file
    pub fn to_json(&self) -> serde_json::Value {
        let mut log_entry = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });

        if let Some(correlation) = &self.correlation {
            log_entry["correlation"] = serde_json::json!({
                "request_id": correlation.request_id,
                "session_id": correlation.session_id,
                "mode": correlation.mode,
            });
        }
        if let Some(fingerprint) = &self.policy_fingerprint {
            log_entry["policy_fingerprint"] = serde_json::json!(fingerprint);
        }
        if let Some(index) = self.pattern_index {
            log_entry["pattern_index"] = serde_json::json!(index);
        }
        if let Some(error) = &self.error {
            log_entry["error"] =
                serde_json::to_value(error).unwrap_or_else(|_| serde_json::json!(null));
        }

        log_entry
    }
}

/// Security logger that handles both structured logging and audit trail
pub struct SecurityLogger {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl SecurityLogger {
    /// Create a new security logger
    pub fn new(audit_path: Option<PathBuf>) -> Result<Self> {
        let audit_path = audit_path.unwrap_or_else(|| {
            std::env::temp_dir()
                .join("luabox")
                .join("security-audit.log")
        });

        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create security log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| {
                SandboxError::Config(format!("Failed to open security audit log: {}", e))
            })?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path,
        })
    }

    /// Log a security event
    pub fn log_security_event(&self, event: SecurityEvent) {
        log_to_facade(&event);

        let log_entry = event.to_json();
        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", log_entry) {
                error!("Failed to write to security audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush security audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on security audit file");
        }
    }

    /// Get the audit log file path
    pub fn audit_path(&self) -> &PathBuf {
        &self.audit_path
    }
}

fn log_to_facade(event: &SecurityEvent) {
    match event.severity {
        SecuritySeverity::Critical | SecuritySeverity::High => {
            error!("SECURITY: {:?} - {}", event.event_type, event.details);
        }
        SecuritySeverity::Medium => {
            warn!("SECURITY: {:?} - {}", event.event_type, event.details);
        }
        SecuritySeverity::Low => {
            info!("SECURITY: {:?} - {}", event.event_type, event.details);
        }
    }
}

/// Global security logger instance
static SECURITY_LOGGER: OnceLock<SecurityLogger> = OnceLock::new();

/// Initialize the global security logger
pub fn init_security_logger(audit_path: Option<PathBuf>) -> Result<()> {
    let logger = SecurityLogger::new(audit_path)?;
    let path = logger.audit_path().clone();
    if SECURITY_LOGGER.set(logger).is_err() {
        warn!("Security logger already initialized");
    } else {
        info!("Security logger initialized at {}", path.display());
    }
    Ok(())
}

/// Log a security event using the global logger
pub fn log_security_event(event: SecurityEvent) {
    if let Some(logger) = SECURITY_LOGGER.get() {
        logger.log_security_event(event);
    } else {
        // Fallback to the log facade if no audit file was configured
        log_to_facade(&event);
    }
}

/// Log session start
pub fn execution_started(correlation: CorrelationIds, policy_fingerprint: String) {
    let event = SecurityEvent::new(
        SecurityEventType::ExecutionStarted,
        format!("Session {} started", correlation.session_id),
    )
    .with_correlation(correlation)
    .with_policy_fingerprint(policy_fingerprint);

    log_security_event(event);
}

/// Log session end with its final status
pub fn execution_finished(
    correlation: CorrelationIds,
    status: ExecutionStatus,
    error: Option<ErrorInfo>,
    elapsed_millis: u64,
) {
    let mut event = SecurityEvent::new(
        SecurityEventType::ExecutionFinished,
        format!(
            "Session {} finished: {:?} in {}ms",
            correlation.session_id, status, elapsed_millis
        ),
    )
    .with_correlation(correlation);
    if let Some(error) = error {
        event = event.with_error(error);
    }

    log_security_event(event);
}

/// Log a source refused by the static screen
pub fn source_rejected(
    correlation: CorrelationIds,
    error: ErrorInfo,
    pattern_index: Option<usize>,
) {
    let mut event = SecurityEvent::new(
        SecurityEventType::SourceRejected,
        format!("Source rejected before engine start: {}", error.kind),
    )
    .with_correlation(correlation)
    .with_error(error);
    if let Some(index) = pattern_index {
        event = event.with_pattern_index(index);
    }

    log_security_event(event);
}

/// Log runtime access to a removed capability
pub fn capability_access(correlation: CorrelationIds, capability: &str) {
    let event = SecurityEvent::new(
        SecurityEventType::CapabilityAccess,
        format!("Blocked access to restricted capability '{}'", capability),
    )
    .with_correlation(correlation);

    log_security_event(event);
}

/// Log wall clock limit violation
pub fn wall_clock_limit_violation(correlation: CorrelationIds, used_ms: u64, limit_ms: u64) {
    let event = SecurityEvent::new(
        SecurityEventType::WallClockLimitViolation,
        format!(
            "Wall clock limit exceeded: used={}ms, limit={}ms",
            used_ms, limit_ms
        ),
    )
    .with_correlation(correlation);

    log_security_event(event);
}

/// Log output truncation
pub fn output_limit_violation(correlation: CorrelationIds, limit: &str, threshold: u64) {
    let event = SecurityEvent::new(
        SecurityEventType::OutputLimitViolation,
        format!("Output truncated at {}={}", limit, threshold),
    )
    .with_correlation(correlation);

    log_security_event(event);
}

/// Log allocator cap hit
pub fn memory_limit_violation(correlation: CorrelationIds, limit: u64) {
    let event = SecurityEvent::new(
        SecurityEventType::MemoryLimitViolation,
        format!("Memory limit exceeded: limit={} bytes", limit),
    )
    .with_correlation(correlation);

    log_security_event(event);
}

/// Log step recording stopping at its cap
pub fn step_limit_reached(correlation: CorrelationIds, limit: usize) {
    let event = SecurityEvent::new(
        SecurityEventType::StepLimitReached,
        format!("Step recording stopped at {} steps", limit),
    )
    .with_correlation(correlation);

    log_security_event(event);
}

/// Log an introspection failure inside the step hook
pub fn internal_hook_failure(correlation: CorrelationIds, error: ErrorInfo) {
    let event = SecurityEvent::new(
        SecurityEventType::InternalHookFailure,
        format!("Step recording degraded: {}", error.message),
    )
    .with_correlation(correlation)
    .with_error(error);

    log_security_event(event);
}

/// Log a double teardown or use-after-teardown
pub fn teardown_violation(instance_id: &str, details: String) {
    let event = SecurityEvent::new(
        SecurityEventType::TeardownViolation,
        format!("Engine instance {}: {}", instance_id, details),
    );

    log_security_event(event);
}
