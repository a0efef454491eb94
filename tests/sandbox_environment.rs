//! Learner environment: removed capabilities and the `_G` sentinel

use luabox::config::policy::SourceScreen;
use luabox::config::types::{CAPABILITY_BLOCKED_MESSAGE, DEFAULT_BANNED_GLOBALS};
use luabox::{ErrorKind, ExecutionMode, ExecutionStatus, Policy, ScriptExecutor, TeardownLedger};
use proptest::prelude::*;

fn executor_with(policy: Policy) -> (ScriptExecutor, TeardownLedger) {
    let ledger = TeardownLedger::new();
    let executor = ScriptExecutor::new(policy)
        .unwrap()
        .with_ledger(ledger.clone());
    (executor, ledger)
}

#[test]
fn test_banned_globals_absent_in_every_fresh_session() {
    let (executor, ledger) = executor_with(Policy::default());

    for name in DEFAULT_BANNED_GLOBALS {
        let source = format!("print(type({}))", name);
        let result = executor
            .open_session(ExecutionMode::Direct)
            .unwrap()
            .load(&source)
            .unwrap()
            .run();
        assert_eq!(result.status, ExecutionStatus::Completed, "{}", name);
        assert_eq!(result.output, vec!["nil"], "{}", name);
    }

    assert_eq!(ledger.created_count(), DEFAULT_BANNED_GLOBALS.len());
    assert!(ledger.is_balanced());
}

#[test]
fn test_removal_does_not_leak_into_next_session() {
    let (executor, _) = executor_with(Policy::default());

    // Rebinding a removed name in one run must not survive into the next
    let first = executor.execute("rawget = 42\nprint(rawget)").unwrap();
    assert_eq!(first.output, vec!["42"]);
    let second = executor.execute("print(type(rawget))").unwrap();
    assert_eq!(second.output, vec!["nil"]);
}

#[test]
fn test_safe_library_remains() {
    let (executor, _) = executor_with(Policy::default());
    let result = executor
        .execute("print(string.upper('ok'), math.max(2, 7), table.concat({1, 2}, ','), tostring(nil))")
        .unwrap();
    assert_eq!(result.output, vec!["OK\t7\t1,2\tnil"]);
}

#[test]
fn test_global_table_operations_are_policy_violations() {
    let (executor, ledger) = executor_with(Policy::default());
    let operations = [
        "local v = _G.print",
        "_G.x = 1",
        "_G()",
        "local n = #_G",
        "for k in pairs(_G) do end",
    ];

    for operation in operations {
        let result = executor.execute(operation).unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed, "{}", operation);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::PolicyViolation, "{}", operation);
        assert_eq!(error.message, CAPABILITY_BLOCKED_MESSAGE, "{}", operation);
    }
    assert!(ledger.is_balanced());
}

#[test]
fn test_environment_upvalue_is_rejected_before_any_instance() {
    let (executor, ledger) = executor_with(Policy::default());
    let result = executor
        .execute("local n = 0\nfor k in pairs(_ENV) do n = n + 1 end\nprint(n, type(_ENV.print))")
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert_eq!(result.error.unwrap().kind, ErrorKind::PolicyViolation);
    assert!(result.output.is_empty());
    assert_eq!(ledger.created_count(), 0);
}

#[test]
fn test_global_table_reachable_when_unrestricted() {
    let (executor, _) = executor_with(Policy {
        restrict_global_table: false,
        ..Policy::default()
    });
    let result = executor.execute("print(_G.print == print)").unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.output, vec!["true"]);
}

#[test]
fn test_oversized_source_is_resource_limit() {
    let (executor, ledger) = executor_with(Policy {
        max_source_bytes: 16,
        ..Policy::default()
    });
    let result = executor.execute("print('this source is too long')").unwrap();

    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert_eq!(
        result.error.unwrap().kind,
        ErrorKind::ResourceLimitExceeded
    );
    assert_eq!(ledger.created_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_screen_never_panics(source in ".{0,200}") {
        let screen = SourceScreen::compile(&Policy::default()).unwrap();
        let _ = screen.check(&source);
    }

    #[test]
    fn prop_arbitrary_source_yields_one_result(source in "[a-z =+()0-9\n]{0,40}") {
        let (executor, ledger) = executor_with(Policy {
            max_wall_clock_millis: 200,
            instruction_check_interval: Some(1000),
            ..Policy::default()
        });
        let result = executor.execute(&source).unwrap();

        prop_assert!(ledger.created_count() <= 1);
        prop_assert!(ledger.is_balanced());
        prop_assert_eq!(result.status == ExecutionStatus::Completed, result.error.is_none());
    }
}
