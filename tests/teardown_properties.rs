//! Teardown accounting on every exit path
//!
//! Each session must close its engine instance exactly once and hand back
//! exactly one result, whichever checkpoint fails.

use luabox::{
    Checkpoint, ExecutionMode, ExecutionStatus, FaultPlan, Policy, ScriptExecutor, SessionState,
    TeardownLedger,
};
use proptest::prelude::*;

const SOURCE: &str = "local total = 0\nfor i = 1, 20 do\n  total = total + i\n  print(total)\nend";

fn faulty_executor(plan: FaultPlan) -> (ScriptExecutor, TeardownLedger) {
    let ledger = TeardownLedger::new();
    let policy = Policy {
        instruction_check_interval: Some(50),
        ..Policy::default()
    };
    let executor = ScriptExecutor::new(policy)
        .unwrap()
        .with_ledger(ledger.clone())
        .with_faults(plan);
    (executor, ledger)
}

fn assert_closed_once(ledger: &TeardownLedger) {
    assert_eq!(ledger.created_count(), 1);
    assert_eq!(ledger.closed_count(), 1);
    assert!(ledger.is_balanced());
    assert!(ledger.outstanding().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_direct_run_closes_once(
        checkpoint in proptest::sample::select(Checkpoint::ALL.to_vec()),
        after_hits in 0u32..30,
    ) {
        let (executor, ledger) = faulty_executor(FaultPlan::none().fail_at(checkpoint, after_hits));
        let result = executor.execute(SOURCE).unwrap();

        prop_assert_eq!(ledger.created_count(), 1);
        prop_assert_eq!(ledger.closed_count(), 1);
        prop_assert!(ledger.is_balanced());
        if result.status == ExecutionStatus::Completed {
            prop_assert!(result.error.is_none());
        } else {
            prop_assert!(result.error.is_some());
        }
    }

    #[test]
    fn prop_stepwise_run_closes_once(
        checkpoint in proptest::sample::select(Checkpoint::ALL.to_vec()),
        after_hits in 0u32..30,
    ) {
        let (executor, ledger) = faulty_executor(FaultPlan::none().fail_at(checkpoint, after_hits));
        let outcome = executor.execute_stepwise(SOURCE).unwrap();

        prop_assert_eq!(ledger.created_count(), 1);
        prop_assert_eq!(ledger.closed_count(), 1);
        prop_assert!(ledger.is_balanced());
        for (position, step) in outcome.steps.iter().enumerate() {
            prop_assert_eq!(step.index, position + 1);
        }
        // Capture failures never reach the learner-facing result
        if checkpoint == Checkpoint::StepCapture {
            prop_assert_eq!(outcome.result.status, ExecutionStatus::Completed);
        }
    }
}

#[test]
fn test_every_checkpoint_fails_immediately() {
    for checkpoint in Checkpoint::ALL {
        let (executor, ledger) = faulty_executor(FaultPlan::none().fail_at(checkpoint, 0));
        let outcome = executor.execute_stepwise(SOURCE).unwrap();
        assert_closed_once(&ledger);

        match checkpoint {
            Checkpoint::StepCapture => {
                assert!(outcome.hook_error.is_some());
                assert_eq!(outcome.result.status, ExecutionStatus::Completed);
            }
            _ => assert_eq!(
                outcome.result.status,
                ExecutionStatus::TimedOut,
                "checkpoint {}",
                checkpoint
            ),
        }
    }
}

#[test]
fn test_destroy_created_session() {
    let (executor, ledger) = faulty_executor(FaultPlan::none());
    let session = executor.open_session(ExecutionMode::Direct).unwrap();
    assert_eq!(session.state(), SessionState::Created);
    let id = session.id().to_string();
    session.destroy();

    assert_closed_once(&ledger);
    assert_eq!(ledger.entry(&id).unwrap().close_calls, 1);
}

#[test]
fn test_destroy_loaded_session() {
    let (executor, ledger) = faulty_executor(FaultPlan::none());
    let session = executor
        .open_session(ExecutionMode::Stepwise)
        .unwrap()
        .load(SOURCE)
        .unwrap();
    assert_eq!(session.state(), SessionState::Loaded);
    let id = session.id().to_string();
    session.destroy();

    assert_closed_once(&ledger);
    assert_eq!(ledger.entry(&id).unwrap().close_calls, 1);
}

#[test]
fn test_failed_load_closes_once() {
    let (executor, ledger) = faulty_executor(FaultPlan::none());
    let result = executor
        .open_session(ExecutionMode::Direct)
        .unwrap()
        .load("local = 1")
        .err()
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_closed_once(&ledger);
}

#[test]
fn test_rejected_source_opens_nothing() {
    let (executor, ledger) = faulty_executor(FaultPlan::none());
    let result = executor.execute("os.exit(1)").unwrap();

    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert_eq!(ledger.created_count(), 0);
    assert!(ledger.is_balanced());
}
