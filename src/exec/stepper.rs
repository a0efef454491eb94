/// Step Recorder
/// Captures one snapshot per learner source line reached in stepwise mode.
/// Introspection failures degrade recording; they never fail the run.
use crate::config::types::{ErrorInfo, ExecutionStep, LimitKind, Policy};
use crate::exec::context::RunContext;
use crate::exec::session::CHUNK_NAME;
use crate::observability::{audit, metrics};
use crate::runtime::introspect::Introspection;
use crate::testing::fault_injection::Checkpoint;
use crate::verdict::strip_traceback;
use mlua::Lua;

#[derive(Default)]
pub struct StepRecorder {
    steps: Vec<ExecutionStep>,
    /// Line steps allowed; one slot stays free for the terminal step
    line_capacity: usize,
    max_value_chars: usize,
    source_lines: Vec<String>,
    introspection: Option<Introspection>,
    truncated: bool,
    hook_error: Option<ErrorInfo>,
    stopped: bool,
}

/// Recorded steps handed back to the session
#[derive(Debug, Default)]
pub struct RecordedSteps {
    pub steps: Vec<ExecutionStep>,
    pub truncated: bool,
    pub hook_error: Option<ErrorInfo>,
}

impl StepRecorder {
    pub fn new(policy: &Policy, source_lines: Vec<String>) -> Self {
        Self {
            steps: Vec::new(),
            line_capacity: policy.max_step_count.saturating_sub(1),
            max_value_chars: policy.max_value_chars,
            source_lines,
            ..Self::default()
        }
    }

    /// Called from the line hook after the guard check
    pub fn on_line_boundary(&mut self, lua: &Lua, ctx: &RunContext, line: i32) {
        if self.stopped {
            return;
        }
        if self.steps.len() >= self.line_capacity {
            self.stop_at_cap(ctx);
            return;
        }
        if line <= 0 {
            return;
        }

        match self.capture(lua, ctx, line) {
            Ok(Some(step)) => {
                self.steps.push(step);
                metrics::get_metrics().steps_recorded.inc();
            }
            Ok(None) => {}
            Err(info) => self.fail(ctx, info),
        }
    }

    fn capture(
        &mut self,
        lua: &Lua,
        ctx: &RunContext,
        line: i32,
    ) -> Result<Option<ExecutionStep>, ErrorInfo> {
        if let Some(injected) = ctx.injected_fault(Checkpoint::StepCapture) {
            return Err(injected);
        }

        if self.introspection.is_none() {
            self.introspection = Some(Introspection::fetch(lua).map_err(hook_error)?);
        }
        let Some(introspection) = self.introspection.as_ref() else {
            return Ok(None);
        };

        let Some((level, frame)) = introspection.base_level().map_err(hook_error)? else {
            return Ok(None);
        };
        if frame.source != CHUNK_NAME {
            return Ok(None);
        }

        let call_stack = introspection.call_stack(level).map_err(hook_error)?;
        let locals = introspection
            .locals(level, self.max_value_chars)
            .map_err(hook_error)?;
        let line_text = usize::try_from(line - 1)
            .ok()
            .and_then(|index| self.source_lines.get(index))
            .map(|text| text.trim().to_string());

        Ok(Some(ExecutionStep {
            index: self.steps.len() + 1,
            source_line: u32::try_from(line).ok(),
            line_text,
            call_stack,
            locals,
            output_snapshot: ctx.output_snapshot(),
        }))
    }

    fn stop_at_cap(&mut self, ctx: &RunContext) {
        self.stopped = true;
        self.truncated = true;
        log::debug!(
            "session {} step recording capped at {} steps",
            ctx.correlation().session_id,
            self.steps.len()
        );
        metrics::get_metrics().record_limit_violation(LimitKind::Steps);
        audit::step_limit_reached(ctx.correlation().clone(), ctx.policy().max_step_count);
    }

    fn fail(&mut self, ctx: &RunContext, info: ErrorInfo) {
        self.stopped = true;
        log::warn!(
            "session {} step recording stopped: {}",
            ctx.correlation().session_id,
            info.message
        );
        metrics::get_metrics().hook_failures.inc();
        audit::internal_hook_failure(ctx.correlation().clone(), info.clone());
        self.hook_error = Some(info);
    }

    /// Append the synthetic end-of-program step
    pub fn push_terminal(&mut self, output_snapshot: Vec<String>) {
        self.steps.push(ExecutionStep {
            index: self.steps.len() + 1,
            source_line: None,
            line_text: None,
            call_stack: Vec::new(),
            locals: Vec::new(),
            output_snapshot,
        });
    }

    pub fn into_recorded(self) -> RecordedSteps {
        RecordedSteps {
            steps: self.steps,
            truncated: self.truncated,
            hook_error: self.hook_error,
        }
    }
}

fn hook_error(err: mlua::Error) -> ErrorInfo {
    ErrorInfo::internal_hook(format!(
        "introspection failed: {}",
        strip_traceback(&err.to_string())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::audit::CorrelationIds;
    use crate::testing::fault_injection::FaultPlan;
    use std::sync::Arc;

    fn context(policy: Policy) -> RunContext {
        RunContext::new(Arc::new(policy), FaultPlan::none(), CorrelationIds::new())
    }

    #[test]
    fn test_capacity_reserves_terminal_slot() {
        let policy = Policy {
            max_step_count: 3,
            ..Policy::default()
        };
        let recorder = StepRecorder::new(&policy, Vec::new());
        assert_eq!(recorder.line_capacity, 2);
    }

    #[test]
    fn test_cap_stops_recording() {
        let policy = Policy {
            max_step_count: 1,
            ..Policy::default()
        };
        let ctx = context(policy.clone());
        let lua = Lua::new();
        let mut recorder = StepRecorder::new(&policy, vec!["x = 1".into()]);
        recorder.on_line_boundary(&lua, &ctx, 1);
        assert!(recorder.stopped);

        recorder.push_terminal(Vec::new());
        let recorded = recorder.into_recorded();
        assert!(recorded.truncated);
        assert_eq!(recorded.steps.len(), 1);
        assert!(recorded.steps[0].is_terminal());
        assert_eq!(recorded.steps[0].index, 1);
    }

    #[test]
    fn test_missing_registry_is_a_hook_error() {
        let policy = Policy::default();
        let ctx = context(policy.clone());
        // Plain state: introspection functions were never captured
        let lua = Lua::new();
        let mut recorder = StepRecorder::new(&policy, Vec::new());
        recorder.on_line_boundary(&lua, &ctx, 1);

        assert!(recorder.stopped);
        let recorded = recorder.into_recorded();
        assert!(recorded.steps.is_empty());
        assert!(!recorded.truncated);
        assert!(recorded.hook_error.is_some());
    }

    #[test]
    fn test_non_positive_lines_are_skipped() {
        let policy = Policy::default();
        let ctx = context(policy.clone());
        let lua = Lua::new();
        let mut recorder = StepRecorder::new(&policy, Vec::new());
        recorder.on_line_boundary(&lua, &ctx, 0);
        recorder.on_line_boundary(&lua, &ctx, -1);
        assert!(!recorder.stopped);
        assert!(recorder.into_recorded().steps.is_empty());
    }
}
