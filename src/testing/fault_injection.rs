/// Deterministic Checkpoint Fault Injection
/// Forces failures at named checkpoints so teardown and classification can be
/// exercised on every exit path without relying on timing.
use crate::config::types::{ErrorInfo, LimitKind};
use std::collections::BTreeMap;
use std::fmt;

/// Points at which a session consults the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Checkpoint {
    /// Once, before the chunk is compiled
    BeforeLoad,
    /// Every `print` call
    Output,
    /// Every line-hook invocation in stepwise mode
    LineHook,
    /// Every N instructions when preemption is enabled
    InstructionBudget,
    /// Frame and locals capture inside the line hook
    StepCapture,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 5] = [
        Checkpoint::BeforeLoad,
        Checkpoint::Output,
        Checkpoint::LineHook,
        Checkpoint::InstructionBudget,
        Checkpoint::StepCapture,
    ];
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Checkpoint::BeforeLoad => "before_load",
            Checkpoint::Output => "output",
            Checkpoint::LineHook => "line_hook",
            Checkpoint::InstructionBudget => "instruction_budget",
            Checkpoint::StepCapture => "step_capture",
        };
        write!(f, "{}", name)
    }
}

/// Set of planned failures, keyed by checkpoint.
///
/// A plan entry `(cp, n)` lets the first `n` hits of `cp` pass; every later
/// hit fails. An empty plan never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    fail_after: BTreeMap<Checkpoint, u32>,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    /// Fail `checkpoint` once it has been passed `after_hits` times
    pub fn fail_at(mut self, checkpoint: Checkpoint, after_hits: u32) -> Self {
        self.fail_after.insert(checkpoint, after_hits);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fail_after.is_empty()
    }

    /// Decide the outcome of hit number `hit` (0-based) at `checkpoint`
    pub fn should_fail(&self, checkpoint: Checkpoint, hit: u32) -> bool {
        self.fail_after
            .get(&checkpoint)
            .map_or(false, |after| hit >= *after)
    }

    /// Error an injected failure stands in for
    pub fn injected_error(checkpoint: Checkpoint, wall_clock_threshold: u64) -> ErrorInfo {
        match checkpoint {
            Checkpoint::StepCapture => {
                ErrorInfo::internal_hook(format!("injected fault at {}", checkpoint))
            }
            _ => ErrorInfo::resource_limit(LimitKind::WallClock, wall_clock_threshold),
        }
    }
}

/// Per-run hit counters for a plan
#[derive(Debug, Default)]
pub struct FaultCounters {
    hits: BTreeMap<Checkpoint, u32>,
}

impl FaultCounters {
    /// Count one hit and report whether the plan fails it
    pub fn hit(&mut self, plan: &FaultPlan, checkpoint: Checkpoint) -> bool {
        let count = self.hits.entry(checkpoint).or_insert(0);
        let fail = plan.should_fail(checkpoint, *count);
        *count = count.saturating_add(1);
        if fail {
            log::debug!("fault injected at {} (hit {})", checkpoint, *count);
        }
        fail
    }

    pub fn hits(&self, checkpoint: Checkpoint) -> u32 {
        self.hits.get(&checkpoint).copied().unwrap_or(0)
    }
}
