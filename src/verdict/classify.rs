/// Outcome classification
/// Maps engine errors and recorded breaches to learner-facing error records
/// and final statuses. Pure functions over their inputs.
use crate::config::types::{ErrorInfo, ExecutionStatus, LimitKind, Policy, SandboxError};

/// Marker the engine uses to append its traceback to error messages
const TRACEBACK_MARKER: &str = "\nstack traceback:";

pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a failed load or run.
    ///
    /// A recorded breach takes precedence over whatever the engine reported,
    /// since learner code may have caught and rethrown it.
    pub fn classify(err: &mlua::Error, breach: Option<ErrorInfo>, policy: &Policy) -> ErrorInfo {
        if let Some(breach) = breach {
            return breach;
        }
        Self::classify_engine_error(err, policy)
    }

    fn classify_engine_error(err: &mlua::Error, policy: &Policy) -> ErrorInfo {
        match err {
            mlua::Error::SyntaxError { message, .. } => {
                ErrorInfo::syntax(strip_traceback(message))
            }
            mlua::Error::RuntimeError(message) => ErrorInfo::runtime(strip_traceback(message)),
            mlua::Error::MemoryError(_) => ErrorInfo::resource_limit(
                LimitKind::Memory,
                policy.threshold(LimitKind::Memory),
            ),
            mlua::Error::CallbackError { cause, .. } => {
                Self::classify_engine_error(cause.as_ref(), policy)
            }
            mlua::Error::ExternalError(external) => {
                match external.downcast_ref::<SandboxError>() {
                    Some(SandboxError::Interrupted(info)) => info.clone(),
                    _ => ErrorInfo::runtime(strip_traceback(&external.to_string())),
                }
            }
            other => ErrorInfo::runtime(strip_traceback(&other.to_string())),
        }
    }

    /// Final status for a finished run
    pub fn status_for(error: Option<&ErrorInfo>) -> ExecutionStatus {
        match error {
            None => ExecutionStatus::Completed,
            Some(info) if info.is_guard_trip() => ExecutionStatus::TimedOut,
            Some(_) => ExecutionStatus::Failed,
        }
    }
}

/// Drop the engine's appended traceback; keep the rest verbatim
pub fn strip_traceback(message: &str) -> String {
    match message.find(TRACEBACK_MARKER) {
        Some(index) => message[..index].to_string(),
        None => message.to_string(),
    }
}
