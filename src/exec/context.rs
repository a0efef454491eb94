//! Per-session run state shared by the engine callbacks.
//!
//! The print override, the `_G` sentinel and the hooks all hold an
//! `Rc<RunContext>`. Every one of them reports limit breaches through
//! [`RunContext::raise`], which keeps the first breach so the session can
//! report it even when learner code catches the engine error.
//!
//! A breach raised from a native callback can be swallowed by a learner
//! `pcall`. [`RunContext::arm_unwind`] then re-raises it on every VM
//! instruction until an unprotected frame lets it unwind the chunk.

use crate::config::types::{ErrorInfo, LimitKind, Policy, SandboxError};
use crate::exec::guard::Guard;
use crate::observability::audit::{self, CorrelationIds};
use crate::testing::fault_injection::{Checkpoint, FaultCounters, FaultPlan};
use crate::utils::output::{OutputLimits, OutputSink, SinkWrite};
use mlua::{HookTriggers, Lua, VmState};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

pub struct RunContext {
    policy: Arc<Policy>,
    guard: Guard,
    sink: RefCell<OutputSink>,
    breach: RefCell<Option<ErrorInfo>>,
    faults: FaultPlan,
    fault_hits: RefCell<FaultCounters>,
    correlation: CorrelationIds,
    unwind_armed: Cell<bool>,
}

impl RunContext {
    pub fn new(policy: Arc<Policy>, faults: FaultPlan, correlation: CorrelationIds) -> Self {
        let sink = OutputSink::new(OutputLimits::from(policy.as_ref()));
        Self {
            guard: Guard::start(&policy),
            policy,
            sink: RefCell::new(sink),
            breach: RefCell::new(None),
            faults,
            fault_hits: RefCell::new(FaultCounters::default()),
            correlation,
            unwind_armed: Cell::new(false),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub fn correlation(&self) -> &CorrelationIds {
        &self.correlation
    }

    /// Consult the fault plan for `checkpoint` without touching the guard
    pub fn injected_fault(&self, checkpoint: Checkpoint) -> Option<ErrorInfo> {
        if self.faults.is_empty() {
            return None;
        }
        let fail = self.fault_hits.borrow_mut().hit(&self.faults, checkpoint);
        fail.then(|| FaultPlan::injected_error(checkpoint, self.guard.limit_millis()))
    }

    /// Budget check without raising
    pub fn check_budget(&self, checkpoint: Checkpoint) -> Result<(), ErrorInfo> {
        if let Some(breach) = self.breach.borrow().clone() {
            return Err(breach);
        }
        if let Some(injected) = self.injected_fault(checkpoint) {
            return Err(injected);
        }
        self.guard.check_budget(&self.sink.borrow())
    }

    /// Budget check at a checkpoint. A trip is recorded and raised.
    pub fn checkpoint(&self, checkpoint: Checkpoint) -> mlua::Result<()> {
        self.check_budget(checkpoint).map_err(|info| self.raise(info))
    }

    /// Record `info` as the session breach (first one wins) and turn it into
    /// an engine error that unwinds the learner chunk.
    pub fn raise(&self, info: ErrorInfo) -> mlua::Error {
        let mut breach = self.breach.borrow_mut();
        if breach.is_none() {
            log::debug!(
                "session {} breach recorded: {}",
                self.correlation.session_id,
                info
            );
            self.audit_breach(&info);
            *breach = Some(info.clone());
        }
        mlua::Error::external(SandboxError::Interrupted(info))
    }

    /// Replace any installed hook with one that raises the recorded breach on
    /// every instruction. Call from native callbacks only, never from a hook.
    pub fn arm_unwind(self: &Rc<Self>, lua: &Lua) {
        if self.breach.borrow().is_none() || self.unwind_armed.replace(true) {
            return;
        }
        log::debug!(
            "session {} unwinding after breach",
            self.correlation.session_id
        );
        let ctx = Rc::clone(self);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(1),
            move |_, _| match ctx.breach() {
                Some(info) => Err(mlua::Error::external(SandboxError::Interrupted(info))),
                None => Ok(VmState::Continue),
            },
        );
    }

    pub fn is_unwinding(&self) -> bool {
        self.unwind_armed.get()
    }

    fn audit_breach(&self, info: &ErrorInfo) {
        let Some(limit) = info.limit else {
            return;
        };
        let correlation = self.correlation.clone();
        match limit.limit {
            LimitKind::WallClock => audit::wall_clock_limit_violation(
                correlation,
                self.guard.elapsed_millis(),
                limit.threshold,
            ),
            LimitKind::OutputLines | LimitKind::OutputBytes => audit::output_limit_violation(
                correlation,
                limit.limit.policy_field(),
                limit.threshold,
            ),
            LimitKind::Memory => audit::memory_limit_violation(correlation, limit.threshold),
            LimitKind::SourceBytes | LimitKind::Steps => {}
        }
    }

    /// Append one printed line to the sink
    pub fn write_line(&self, line: String) -> SinkWrite {
        let written = self.sink.borrow_mut().push_line(line);
        if let SinkWrite::Truncated(limit) = written {
            if !self.policy.fail_on_output_overflow {
                audit::output_limit_violation(
                    self.correlation.clone(),
                    limit.policy_field(),
                    self.policy.threshold(limit),
                );
            }
        }
        written
    }

    pub fn output_snapshot(&self) -> Vec<String> {
        self.sink.borrow().snapshot()
    }

    pub fn sink(&self) -> std::cell::Ref<'_, OutputSink> {
        self.sink.borrow()
    }

    pub fn breach(&self) -> Option<ErrorInfo> {
        self.breach.borrow().clone()
    }

    pub fn take_breach(&self) -> Option<ErrorInfo> {
        self.breach.borrow_mut().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ErrorKind, OUTPUT_LIMIT_SENTINEL};

    fn context(policy: Policy, faults: FaultPlan) -> RunContext {
        RunContext::new(Arc::new(policy), faults, CorrelationIds::new())
    }

    #[test]
    fn test_checkpoint_passes_within_budget() {
        let ctx = context(Policy::default(), FaultPlan::none());
        assert!(ctx.checkpoint(Checkpoint::Output).is_ok());
        assert!(ctx.breach().is_none());
    }

    #[test]
    fn test_first_breach_wins_and_is_sticky() {
        let ctx = context(Policy::default(), FaultPlan::none());
        let _ = ctx.raise(ErrorInfo::capability_blocked());
        let _ = ctx.raise(ErrorInfo::resource_limit(LimitKind::WallClock, 1));

        assert_eq!(ctx.breach().unwrap().kind, ErrorKind::PolicyViolation);
        // Later checkpoints keep failing with the recorded breach
        assert!(ctx.checkpoint(Checkpoint::LineHook).is_err());
        assert_eq!(ctx.take_breach().unwrap().kind, ErrorKind::PolicyViolation);
        assert!(ctx.breach().is_none());
    }

    #[test]
    fn test_injected_fault_raises_timeout() {
        let ctx = context(
            Policy::default(),
            FaultPlan::none().fail_at(Checkpoint::Output, 1),
        );
        assert!(ctx.checkpoint(Checkpoint::Output).is_ok());
        assert!(ctx.checkpoint(Checkpoint::Output).is_err());
        assert!(ctx.breach().unwrap().is_guard_trip());
    }

    #[test]
    fn test_write_line_reports_truncation() {
        let policy = Policy {
            max_output_lines: 2,
            ..Policy::default()
        };
        let ctx = context(policy, FaultPlan::none());
        assert_eq!(ctx.write_line("one".into()), SinkWrite::Appended);
        assert_eq!(
            ctx.write_line("two".into()),
            SinkWrite::Truncated(LimitKind::OutputLines)
        );
        assert_eq!(ctx.output_snapshot(), vec!["one", OUTPUT_LIMIT_SENTINEL]);
        // Non-fatal overflow is not a breach
        assert!(ctx.checkpoint(Checkpoint::Output).is_ok());
    }

    #[test]
    fn test_arm_unwind_requires_a_breach() {
        let lua = Lua::new();
        let ctx = Rc::new(context(Policy::default(), FaultPlan::none()));
        ctx.arm_unwind(&lua);
        assert!(!ctx.is_unwinding());

        let _ = ctx.raise(ErrorInfo::capability_blocked());
        ctx.arm_unwind(&lua);
        assert!(ctx.is_unwinding());

        // Protected calls inside the chunk cannot outlast the breach
        let outcome: mlua::Result<()> = lua
            .load("for i = 1, 10 do pcall(function() end) end")
            .exec();
        assert!(outcome.is_err());
    }
}
