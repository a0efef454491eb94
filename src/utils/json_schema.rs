/// Stable JSON run report
/// The document the CLI prints for every run. Version 1 is frozen; new fields
/// must be optional.
use crate::config::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RUN_REPORT_SCHEMA_VERSION: &str = "1.0";

/// Run report for CLI and service consumers (v1)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunReportV1 {
    /// Schema version (always "1.0" for v1)
    pub schema_version: String,

    pub mode: ExecutionMode,

    /// Final status (stable taxonomy)
    pub status: ExecutionStatus,

    /// Printed lines, sentinel included when truncated
    pub output: Vec<String>,

    pub output_integrity: OutputIntegrity,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// `error` rendered as shown to learners
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_display: Option<String>,

    pub elapsed_millis: u64,

    /// Recorded steps (stepwise runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<ExecutionStep>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_truncated: Option<bool>,

    /// Step recording failure, operator-facing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_error: Option<ErrorInfo>,

    /// SHA256 of the policy that governed the run
    pub policy_fingerprint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_preset: Option<String>,

    pub execution_start: DateTime<Utc>,
    pub execution_end: DateTime<Utc>,
}

impl RunReportV1 {
    pub fn from_outcome(
        outcome: &ExecutionOutcome,
        policy: &Policy,
        policy_preset: Option<&str>,
        execution_start: DateTime<Utc>,
    ) -> Self {
        let (mode, steps, steps_truncated, hook_error) = match outcome {
            ExecutionOutcome::Direct(_) => (ExecutionMode::Direct, None, None, None),
            ExecutionOutcome::Stepwise(stepwise) => (
                ExecutionMode::Stepwise,
                Some(stepwise.steps.clone()),
                Some(stepwise.steps_truncated),
                stepwise.hook_error.clone(),
            ),
        };
        let result = outcome.result();

        Self {
            schema_version: RUN_REPORT_SCHEMA_VERSION.to_string(),
            mode,
            status: result.status,
            output: result.output.clone(),
            output_integrity: result.output_integrity,
            error: result.error.clone(),
            error_display: result.error.as_ref().map(ToString::to_string),
            elapsed_millis: result.elapsed_millis,
            steps,
            steps_truncated,
            hook_error,
            policy_fingerprint: policy.fingerprint(),
            policy_preset: policy_preset.map(str::to_string),
            execution_start,
            execution_end: Utc::now(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            SandboxError::Config(format!("Failed to serialize report to JSON: {}", e))
        })
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            SandboxError::Config(format!("Failed to deserialize report from JSON: {}", e))
        })
    }

    /// Validate schema version
    pub fn validate_schema_version(&self) -> Result<()> {
        if self.schema_version != RUN_REPORT_SCHEMA_VERSION {
            return Err(SandboxError::Config(format!(
                "Unsupported schema version: {}",
                self.schema_version
            )));
        }
        Ok(())
    }

    /// True when the run reported an error to the learner
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_report() -> RunReportV1 {
        let outcome = ExecutionOutcome::Direct(ExecutionResult {
            status: ExecutionStatus::Failed,
            output: vec!["1".to_string()],
            error: Some(ErrorInfo::runtime("learner:2: boom")),
            elapsed_millis: 3,
            output_integrity: OutputIntegrity::Complete,
        });
        RunReportV1::from_outcome(&outcome, &Policy::default(), Some("classroom-v1"), Utc::now())
    }

    #[test]
    fn test_json_schema_stability() {
        let json = direct_report().to_json().unwrap();
        for field in [
            "\"schema_version\"",
            "\"mode\"",
            "\"status\"",
            "\"output\"",
            "\"output_integrity\"",
            "\"error\"",
            "\"elapsed_millis\"",
            "\"policy_fingerprint\"",
            "\"execution_start\"",
        ] {
            assert!(json.contains(field), "missing {}", field);
        }
        assert!(json.contains("\"failed\""));
        assert!(json.contains("Runtime Error: learner:2: boom"));
        // Direct runs carry no step fields
        assert!(!json.contains("\"steps\""));
    }

    #[test]
    fn test_json_deserialization() {
        let report = direct_report();
        let parsed = RunReportV1::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed, report);
        assert!(parsed.validate_schema_version().is_ok());
        assert!(parsed.has_error());
    }

    #[test]
    fn test_stepwise_fields() {
        let outcome = ExecutionOutcome::Stepwise(StepwiseOutcome {
            steps: Vec::new(),
            result: ExecutionResult::default(),
            steps_truncated: true,
            hook_error: None,
        });
        let report = RunReportV1::from_outcome(&outcome, &Policy::default(), None, Utc::now());
        assert_eq!(report.mode, ExecutionMode::Stepwise);
        assert_eq!(report.steps_truncated, Some(true));
        assert!(!report.has_error());
    }

    #[test]
    fn test_rejects_unknown_schema_version() {
        let mut report = direct_report();
        report.schema_version = "2.0".to_string();
        assert!(report.validate_schema_version().is_err());
    }
}
