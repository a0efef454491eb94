//! Execution session lifecycle.
//!
//! A session owns exactly one engine instance from creation to teardown.
//! The lifecycle is a type-state chain so illegal orderings cannot compile:
//!
//! `Session<Created> --load--> Session<Loaded> --run / run_stepwise--> result`
//!
//! Each step consumes the prior state. Every terminal path closes the engine
//! instance before its result is returned.
//!
//! Running before loading does not compile:
//!
//! ```compile_fail
//! use luabox::{ExecutionMode, Policy, ScriptExecutor};
//!
//! let executor = ScriptExecutor::new(Policy::default()).unwrap();
//! let session = executor.open_session(ExecutionMode::Direct).unwrap();
//! let _ = session.run();
//! ```
//!
//! Neither does reusing a session after it ran:
//!
//! ```compile_fail
//! use luabox::{ExecutionMode, Policy, ScriptExecutor};
//!
//! let executor = ScriptExecutor::new(Policy::default()).unwrap();
//! let session = executor.open_session(ExecutionMode::Direct).unwrap();
//! let loaded = session.load("x = 1").unwrap();
//! let _ = loaded.run();
//! let _ = loaded.run();
//! ```
//!
//! Nor destroying one twice:
//!
//! ```compile_fail
//! use luabox::{ExecutionMode, Policy, ScriptExecutor};
//!
//! let executor = ScriptExecutor::new(Policy::default()).unwrap();
//! let session = executor.open_session(ExecutionMode::Direct).unwrap();
//! session.destroy();
//! session.destroy();
//! ```
//!
//! The legal chain:
//!
//! ```
//! use luabox::{ExecutionMode, ExecutionStatus, Policy, ScriptExecutor};
//!
//! let executor = ScriptExecutor::new(Policy::default()).unwrap();
//! let session = executor.open_session(ExecutionMode::Direct).unwrap();
//! let result = session.load("print(1 + 1)").unwrap().run();
//! assert_eq!(result.status, ExecutionStatus::Completed);
//! assert_eq!(result.output, vec!["2"]);
//! ```

use crate::config::types::{
    ErrorInfo, ErrorKind, ExecutionMode, ExecutionResult, LimitKind, Policy, Result,
    SessionState, StepwiseOutcome,
};
use crate::exec::context::RunContext;
use crate::exec::stepper::StepRecorder;
use crate::observability::audit::{self, CorrelationIds};
use crate::observability::metrics;
use crate::runtime::engine::EngineInstance;
use crate::runtime::environment;
use crate::safety::teardown::TeardownLedger;
use crate::testing::fault_injection::{Checkpoint, FaultPlan};
use crate::verdict::ErrorClassifier;
use mlua::{DebugEvent, Function, HookTriggers, Lua, VmState};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Chunk name given to learner code. Engine messages read `learner:LINE: ...`.
pub const CHUNK_NAME: &str = "=learner";

/// Type-state marker: instance and environment ready, nothing loaded
pub struct Created;

/// Type-state marker: learner chunk compiled and ready to run
pub struct Loaded {
    chunk: Function,
    source_lines: Vec<String>,
}

/// State every session carries regardless of its stage
struct SessionCore {
    mode: ExecutionMode,
    instance: EngineInstance,
    ctx: Rc<RunContext>,
    state: SessionState,
}

/// One learner execution. Not `Send`: the run state lives in `Rc`.
pub struct Session<S> {
    core: SessionCore,
    stage: S,
}

impl Session<Created> {
    /// Create a fresh engine instance and build the learner environment
    pub fn open(
        policy: Arc<Policy>,
        mode: ExecutionMode,
        ledger: TeardownLedger,
        faults: FaultPlan,
    ) -> Result<Self> {
        let mut instance = EngineInstance::new(ledger)?;

        let mut correlation = CorrelationIds::new().with_mode(mode);
        correlation.session_id = instance.id().to_string();
        let fingerprint = policy.fingerprint();
        let ctx = Rc::new(RunContext::new(policy, faults, correlation.clone()));

        let built = instance
            .lua()
            .and_then(|lua| environment::build(lua, &ctx));
        if let Err(err) = built {
            log::error!("environment build failed for {}: {}", instance.id(), err);
            if let Err(close_err) = instance.close() {
                log::error!("teardown after failed build: {}", close_err);
            }
            return Err(err);
        }

        audit::execution_started(correlation, fingerprint);
        log::debug!("session {} created ({})", instance.id(), mode);

        Ok(Session {
            core: SessionCore {
                mode,
                instance,
                ctx,
                state: SessionState::Created,
            },
            stage: Created,
        })
    }

    /// Compile the learner chunk.
    ///
    /// A syntax error, or a guard trip before compilation, ends the session
    /// and yields its final result.
    pub fn load(self, source: &str) -> std::result::Result<Session<Loaded>, ExecutionResult> {
        let Session { mut core, .. } = self;

        if let Err(err) = core.ctx.checkpoint(Checkpoint::BeforeLoad) {
            return Err(core.fail(&err));
        }

        match core.compile(source) {
            Ok(chunk) => {
                core.transition(SessionState::Loaded);
                Ok(Session {
                    core,
                    stage: Loaded {
                        chunk,
                        source_lines: source.lines().map(String::from).collect(),
                    },
                })
            }
            Err(err) => Err(core.fail(&err)),
        }
    }
}

impl Session<Loaded> {
    /// Run to completion in direct mode
    pub fn run(self) -> ExecutionResult {
        let Session { mut core, stage } = self;
        let Loaded { chunk, .. } = stage;
        core.transition(SessionState::Running);

        let outcome = core.install_preemption().and_then(|()| {
            let called: mlua::Result<()> = chunk.call(());
            called
        });
        drop(chunk);

        let error = core.outcome_error(outcome);
        core.finish(error)
    }

    /// Run with a line hook recording one step per learner source line
    pub fn run_stepwise(self) -> StepwiseOutcome {
        let Session { mut core, stage } = self;
        let Loaded {
            chunk,
            source_lines,
        } = stage;
        core.transition(SessionState::Running);

        let recorder = Rc::new(RefCell::new(StepRecorder::new(
            core.ctx.policy(),
            source_lines,
        )));

        let outcome = core
            .install_step_hook(Rc::clone(&recorder))
            .and_then(|()| {
                let called: mlua::Result<()> = chunk.call(());
                called
            });
        drop(chunk);

        let error = core.outcome_error(outcome);
        let mut recorder = std::mem::take(&mut *recorder.borrow_mut());
        if error.is_none() {
            recorder.push_terminal(core.ctx.output_snapshot());
        }
        let recorded = recorder.into_recorded();

        StepwiseOutcome {
            steps: recorded.steps,
            result: core.finish(error),
            steps_truncated: recorded.truncated,
            hook_error: recorded.hook_error,
        }
    }
}

impl<S> Session<S> {
    /// Engine instance identifier; also the audit session id
    pub fn id(&self) -> &str {
        self.core.instance.id()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.core.mode
    }

    pub fn state(&self) -> SessionState {
        self.core.state
    }

    /// Tear down a session that will not run
    pub fn destroy(self) {
        let Session { mut core, stage } = self;
        drop(stage);
        log::debug!("session {} destroyed in state {}", core.instance.id(), core.state);
        core.close();
    }
}

impl SessionCore {
    fn lua(&self) -> mlua::Result<&Lua> {
        self.instance.lua().map_err(mlua::Error::external)
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("session {}: {} -> {}", self.instance.id(), self.state, next);
        self.state = next;
    }

    fn compile(&self, source: &str) -> mlua::Result<Function> {
        self.lua()?.load(source).set_name(CHUNK_NAME).into_function()
    }

    /// Direct mode: consult the guard every N instructions when enabled
    fn install_preemption(&self) -> mlua::Result<()> {
        let Some(interval) = self.ctx.policy().instruction_check_interval else {
            return Ok(());
        };
        let ctx = Rc::clone(&self.ctx);
        self.lua()?.set_hook(
            HookTriggers::new().every_nth_instruction(interval),
            move |_, _| {
                ctx.checkpoint(Checkpoint::InstructionBudget)?;
                Ok(VmState::Continue)
            },
        );
        Ok(())
    }

    /// Stepwise mode: guard plus step capture on every line boundary
    fn install_step_hook(&self, recorder: Rc<RefCell<StepRecorder>>) -> mlua::Result<()> {
        let mut triggers = HookTriggers::EVERY_LINE;
        if let Some(interval) = self.ctx.policy().instruction_check_interval {
            triggers = triggers.every_nth_instruction(interval);
        }

        let ctx = Rc::clone(&self.ctx);
        self.lua()?.set_hook(triggers, move |lua, debug| {
            if matches!(debug.event(), DebugEvent::Count) {
                ctx.checkpoint(Checkpoint::InstructionBudget)?;
                return Ok(VmState::Continue);
            }

            ctx.checkpoint(Checkpoint::LineHook)?;
            match recorder.try_borrow_mut() {
                Ok(mut recorder) => recorder.on_line_boundary(lua, &ctx, debug.curr_line()),
                Err(_) => log::warn!(
                    "session {}: step recorder busy, line {} skipped",
                    ctx.correlation().session_id,
                    debug.curr_line()
                ),
            }
            Ok(VmState::Continue)
        });
        Ok(())
    }

    /// Error for a finished call. A recorded breach wins even after a clean return.
    fn outcome_error(&self, outcome: mlua::Result<()>) -> Option<ErrorInfo> {
        let breach = self.ctx.take_breach();
        match outcome {
            Ok(()) => breach,
            Err(err) => Some(ErrorClassifier::classify(&err, breach, self.ctx.policy())),
        }
    }

    fn fail(self, err: &mlua::Error) -> ExecutionResult {
        let breach = self.ctx.take_breach();
        let info = ErrorClassifier::classify(err, breach, self.ctx.policy());
        self.finish(Some(info))
    }

    fn close(&mut self) {
        if let Err(err) = self.instance.close() {
            log::error!("session teardown failed: {}", err);
        }
    }

    /// Close the instance, then build the one result for this session
    fn finish(mut self, error: Option<ErrorInfo>) -> ExecutionResult {
        let status = ErrorClassifier::status_for(error.as_ref());
        self.transition(status.session_state().unwrap_or(SessionState::Failed));
        self.close();

        let (output, output_integrity) = {
            let sink = self.ctx.sink();
            (sink.snapshot(), sink.integrity())
        };
        let result = ExecutionResult {
            status,
            output,
            error,
            elapsed_millis: self.ctx.guard().elapsed_millis(),
            output_integrity,
        };

        if let Some(info) = &result.error {
            if info.kind == ErrorKind::ResourceLimitExceeded
                && info.limit.map(|breach| breach.limit) == Some(LimitKind::Memory)
            {
                audit::memory_limit_violation(
                    self.ctx.correlation().clone(),
                    self.ctx.policy().threshold(LimitKind::Memory),
                );
            }
        }
        metrics::get_metrics().record_execution(&result);
        audit::execution_finished(
            self.ctx.correlation().clone(),
            result.status,
            result.error.clone(),
            result.elapsed_millis,
        );
        result
    }
}
