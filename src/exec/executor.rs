/// Script execution entry point
/// Screens source, opens one session per request and returns exactly one
/// result per request. Safe to share across threads; each call builds its
/// own engine instance.
use crate::config::policy::{ScreenRejection, SourceScreen};
use crate::config::types::{
    ExecutionMode, ExecutionOutcome, ExecutionRequest, ExecutionResult, ExecutionStatus,
    OutputIntegrity, Policy, Result, StepwiseOutcome,
};
use crate::config::validator::validate_policy;
use crate::exec::session::{Created, Session};
use crate::observability::audit::{self, CorrelationIds};
use crate::observability::metrics;
use crate::safety::teardown::TeardownLedger;
use crate::testing::fault_injection::FaultPlan;
use std::sync::Arc;
use std::time::Instant;

/// Executes learner scripts under one policy
pub struct ScriptExecutor {
    policy: Arc<Policy>,
    screen: SourceScreen,
    ledger: TeardownLedger,
    faults: FaultPlan,
}

impl ScriptExecutor {
    /// Validate the policy and compile its source screen.
    ///
    /// Policy errors are fatal here; warnings are logged.
    pub fn new(policy: Policy) -> Result<Self> {
        let validation = validate_policy(&policy, true)?;
        let screen = SourceScreen::compile(&policy)?;

        log::info!(
            "Script executor ready: policy {} ({} warnings, {} source patterns)",
            &policy.fingerprint()[..12],
            validation.warnings.len(),
            screen.pattern_count()
        );

        Ok(Self {
            policy: Arc::new(policy),
            screen,
            ledger: TeardownLedger::new(),
            faults: FaultPlan::none(),
        })
    }

    /// Record engine instances in a caller-owned ledger
    pub fn with_ledger(mut self, ledger: TeardownLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Inject deterministic checkpoint failures into every session
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn ledger(&self) -> &TeardownLedger {
        &self.ledger
    }

    /// Run `source` to completion.
    ///
    /// `Err` means the host is misconfigured; every learner-caused outcome,
    /// including rejection, is an `Ok` result.
    pub fn execute(&self, source: &str) -> Result<ExecutionResult> {
        let started = Instant::now();
        if let Err(rejection) = self.screen.check(source) {
            return Ok(self.reject(rejection, ExecutionMode::Direct, started));
        }

        let session = self.open_session(ExecutionMode::Direct)?;
        Ok(match session.load(source) {
            Ok(loaded) => loaded.run(),
            Err(result) => result,
        })
    }

    /// Run `source` recording one step per source line
    pub fn execute_stepwise(&self, source: &str) -> Result<StepwiseOutcome> {
        let started = Instant::now();
        if let Err(rejection) = self.screen.check(source) {
            return Ok(StepwiseOutcome {
                result: self.reject(rejection, ExecutionMode::Stepwise, started),
                ..StepwiseOutcome::default()
            });
        }

        let session = self.open_session(ExecutionMode::Stepwise)?;
        Ok(match session.load(source) {
            Ok(loaded) => loaded.run_stepwise(),
            Err(result) => StepwiseOutcome {
                result,
                ..StepwiseOutcome::default()
            },
        })
    }

    pub fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        match request.mode {
            ExecutionMode::Direct => self.execute(&request.source).map(ExecutionOutcome::Direct),
            ExecutionMode::Stepwise => self
                .execute_stepwise(&request.source)
                .map(ExecutionOutcome::Stepwise),
        }
    }

    /// Low-level lifecycle access. Screening is the caller's job here.
    pub fn open_session(&self, mode: ExecutionMode) -> Result<Session<Created>> {
        Session::open(
            Arc::clone(&self.policy),
            mode,
            self.ledger.clone(),
            self.faults.clone(),
        )
    }

    fn reject(
        &self,
        rejection: ScreenRejection,
        mode: ExecutionMode,
        started: Instant,
    ) -> ExecutionResult {
        log::info!("Source rejected before engine start: {}", rejection.error.kind);
        audit::source_rejected(
            CorrelationIds::new().with_mode(mode),
            rejection.error.clone(),
            rejection.pattern_index,
        );

        let result = ExecutionResult {
            status: ExecutionStatus::Rejected,
            output: Vec::new(),
            error: Some(rejection.error),
            elapsed_millis: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            output_integrity: OutputIntegrity::Complete,
        };
        metrics::get_metrics().record_execution(&result);
        result
    }
}
