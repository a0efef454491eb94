// Policy Validation
// Executors validate their policy at startup and fail fast with actionable errors

use crate::config::types::{
    Policy, Result, SandboxError, OUTPUT_LIMIT_SENTINEL, VALUE_TRUNCATION_MARKER,
};
use regex::RegexBuilder;

/// Names that should always be banned; leaving one out is legal but suspicious
const CORE_BANNED_GLOBALS: &[&str] = &["io", "os", "debug", "load", "require", "package"];

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate a policy. In strict mode, errors are fatal.
pub fn validate_policy(policy: &Policy, strict: bool) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(policy, &mut result);
    validate_denylists(policy, &mut result);
    validate_preemption(policy, &mut result);

    if strict && !result.is_valid() {
        let error_msg = format!(
            "Policy validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(SandboxError::Config(error_msg));
    }

    for warning in &result.warnings {
        log::warn!("policy warning: {}", warning);
    }

    Ok(result)
}

fn validate_limits(policy: &Policy, result: &mut ValidationResult) {
    if policy.max_source_bytes == 0 {
        result.add_error("max_source_bytes cannot be zero".to_string());
    }

    if policy.max_wall_clock_millis == 0 {
        result.add_error("max_wall_clock_millis cannot be zero".to_string());
    } else if policy.max_wall_clock_millis > 30_000 {
        result.add_warning(format!(
            "max_wall_clock_millis {} is above 30s; learners will wait on runaway loops",
            policy.max_wall_clock_millis
        ));
    }

    // The sentinel takes the final slot, so one content line needs two slots.
    if policy.max_output_lines < 2 {
        result.add_error(format!(
            "max_output_lines must be at least 2 (got {})",
            policy.max_output_lines
        ));
    }

    if policy.max_output_bytes <= OUTPUT_LIMIT_SENTINEL.len() {
        result.add_error(format!(
            "max_output_bytes must exceed the sentinel length {} (got {})",
            OUTPUT_LIMIT_SENTINEL.len(),
            policy.max_output_bytes
        ));
    }

    // The terminal step always has a reserved slot.
    if policy.max_step_count < 2 {
        result.add_error(format!(
            "max_step_count must be at least 2 (got {})",
            policy.max_step_count
        ));
    }

    if policy.max_value_chars == 0 {
        result.add_error("max_value_chars cannot be zero".to_string());
    } else if policy.max_value_chars + VALUE_TRUNCATION_MARKER.len() > policy.max_output_bytes {
        result.add_warning(
            "max_value_chars exceeds max_output_bytes; a single value can fill the output"
                .to_string(),
        );
    }

    if policy.max_print_args == 0 {
        result.add_error("max_print_args cannot be zero".to_string());
    }

    if let Some(memory) = policy.max_memory_bytes {
        if memory == 0 {
            result.add_error("max_memory_bytes cannot be zero".to_string());
        } else if memory < 1024 * 1024 {
            result.add_warning(format!(
                "max_memory_bytes {} is very low (< 1MB), the standard library may not fit",
                memory
            ));
        }
    } else {
        result.add_warning("max_memory_bytes is unset; allocation is unbounded".to_string());
    }
}

fn validate_denylists(policy: &Policy, result: &mut ValidationResult) {
    for (index, pattern) in policy.banned_source_patterns.iter().enumerate() {
        if let Err(err) = RegexBuilder::new(pattern).case_insensitive(true).build() {
            result.add_error(format!(
                "banned_source_patterns[{}] is not a valid regex: {}",
                index, err
            ));
        }
    }

    for name in &policy.banned_global_names {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            result.add_error(format!("banned global name {:?} is not an identifier", name));
        }
    }

    for core in CORE_BANNED_GLOBALS {
        if !policy.banned_global_names.contains(*core) {
            result.add_warning(format!("global '{}' is not banned", core));
        }
    }

    if !policy.restrict_global_table {
        result.add_warning("restrict_global_table is off; _G is reachable".to_string());
    }
}

fn validate_preemption(policy: &Policy, result: &mut ValidationResult) {
    match policy.instruction_check_interval {
        Some(0) => result.add_error("instruction_check_interval cannot be zero".to_string()),
        Some(_) => {}
        None => result.add_warning(
            "instruction_check_interval is unset; direct runs are only bounded at print checkpoints"
                .to_string(),
        ),
    }
}
