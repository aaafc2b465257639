//! Engine integration tests
//!
//! These tests verify:
//! - Continuation rules (plain failure, critical, break_if_error)
//! - Level-wide failures discarding partial results
//! - Timing capture and the measure/transform value store
//! - Callback firing order and callback failure handling

use procrunner::{
    Action, Constraint, ErrorKind, Measure, Procedure, ProcedureEngine, ProcedureError,
    RunContext, StepContext, StepRegistry, TestResult, ValueStore,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

// =============================================================================
// Test steps
// =============================================================================

#[derive(Deserialize)]
struct Say {
    #[allow(dead_code)]
    msg: String,
    #[serde(default)]
    fail: bool,
    #[serde(default)]
    delay: u64,
}

impl Action for Say {
    fn run(&mut self, ctx: &StepContext<'_>) -> anyhow::Result<()> {
        if self.delay > 0 {
            std::thread::sleep(Duration::from_millis(self.delay));
        }
        if self.fail {
            return Err(ProcedureError::unexpected("I must fail !", ctx.path()).into());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct Fixed {
    value: Value,
    #[serde(default)]
    delay: u64,
}

impl Measure for Fixed {
    fn measure(&mut self, _ctx: &StepContext<'_>, _values: &mut ValueStore) -> anyhow::Result<Value> {
        if self.delay > 0 {
            std::thread::sleep(Duration::from_millis(self.delay));
        }
        Ok(self.value.clone())
    }
}

#[derive(Deserialize)]
struct CleanedParams {
    #[serde(default)]
    fail: bool,
}

/// Action counting its `clean` calls
struct Cleaned {
    fail: bool,
    cleaned: Rc<Cell<u32>>,
}

impl Action for Cleaned {
    fn run(&mut self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("fixture lost contact");
        }
        Ok(())
    }

    fn clean(&mut self) {
        self.cleaned.set(self.cleaned.get() + 1);
    }
}

fn engine() -> ProcedureEngine {
    let mut registry = StepRegistry::new();
    registry
        .register_action("say", |p: Say| Ok(p))
        .register_measure("fixed", |p: Fixed| Ok(p))
        .register_transform("identity", |_: procrunner::NoParams| Ok(procrunner::Identity));
    ProcedureEngine::new(registry)
}

fn say(fail: bool) -> Value {
    json!({"msg": "Hello world", "fail": fail})
}

fn three(middle: Value) -> Procedure {
    Procedure::new()
        .step("test1", "say", say(false))
        .step("test2", "say", middle)
        .step("test3", "say", say(false))
}

fn results(tests: &[TestResult]) -> Vec<Option<bool>> {
    tests.iter().map(TestResult::result).collect()
}

// =============================================================================
// Basic runs
// =============================================================================

#[test]
fn test_procedure_basic() {
    let engine = engine();
    for _ in 0..2 {
        let report = engine.run(&three(say(false)));
        assert_eq!(report.result.result, Some(true));
        assert!(report.result.err().is_none());
        assert_eq!(report.result.tests.len(), 3);
        assert!(report.errors.is_empty());
    }
}

#[test]
fn test_plain_failure_keeps_going() {
    let report = engine().run(&three(say(true)));
    let root = &report.result;

    assert_eq!(root.tests.len(), 3);
    assert_eq!(root.result, Some(false));
    assert!(root.err().is_none());
    assert_eq!(results(&root.tests), vec![Some(true), Some(false), Some(true)]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, vec!["test2"]);
}

#[test]
fn test_subprocedures() {
    let proc = Procedure::new()
        .sub("subproc1", three(say(false)))
        .sub("subproc2", three(say(true)));
    let report = engine().run(&proc);
    let root = &report.result;

    assert_eq!(root.tests.len(), 2);
    assert_eq!(root.tests[0].step_id(), "subproc1");
    assert_eq!(root.tests[1].step_id(), "subproc2");
    assert_eq!(root.tests[0].tests().len(), 3);
    assert_eq!(root.tests[1].tests().len(), 3);
    assert_eq!(results(&root.tests), vec![Some(true), Some(false)]);
    assert_eq!(root.result, Some(false));
    assert!(root.err().is_none());
    assert_eq!(report.errors[0].path, vec!["subproc2", "test2"]);
}

// =============================================================================
// Execution flow flags
// =============================================================================

#[test]
fn test_critical_flag_stops_the_run() {
    let subproc1 = Procedure::new()
        .step("test1", "say", json!({"msg": "a", "critical": true}))
        .step("test2", "say", json!({"msg": "b", "fail": true, "critical": true}))
        .step("test3", "say", say(false));
    let proc = Procedure::new()
        .sub("subproc1", subproc1)
        .sub("subproc2", Procedure::new().sub("error_subproc", three(say(false))));

    let engine = engine();
    for _ in 0..2 {
        let report = engine.run(&proc);
        let root = &report.result;

        assert_eq!(root.tests.len(), 1);
        assert_eq!(root.tests[0].step_id(), "subproc1");
        assert_eq!(root.tests[0].tests().len(), 2);
        assert_eq!(root.result, Some(false));
        assert_eq!(root.err().map(|e| e.kind()), Some(ErrorKind::Stop));
        assert_eq!(root.tests[0].err().map(|e| e.kind()), Some(ErrorKind::Stop));
    }
}

#[test]
fn test_critical_step_at_root() {
    let report = engine().run(&three(json!({"msg": "b", "fail": true, "critical": true})));
    assert_eq!(report.result.tests.len(), 2);
    assert_eq!(report.result.result, Some(false));
    assert_eq!(report.result.err().map(|e| e.kind()), Some(ErrorKind::Stop));
}

#[test]
fn test_break_if_error_truncates_its_level_only() {
    let subproc1 = Procedure::new()
        .step("test1", "say", json!({"msg": "a", "break_if_error": true}))
        .step("test2", "say", json!({"msg": "b", "fail": true, "break_if_error": true}))
        .step("test3", "say", say(false));
    let proc = Procedure::new()
        .sub("subproc1", subproc1)
        .sub("subproc2", three(say(false)));

    let report = engine().run(&proc);
    let root = &report.result;

    assert_eq!(root.tests.len(), 2);
    assert_eq!(root.tests[0].tests().len(), 2);
    assert_eq!(root.tests[1].tests().len(), 3);
    assert!(root.tests[0].err().is_none());
    assert_eq!(results(&root.tests), vec![Some(false), Some(true)]);
    assert_eq!(root.result, Some(false));
    assert!(root.err().is_none());
}

#[test]
fn test_critical_wins_over_break_if_error() {
    let middle = json!({"msg": "b", "fail": true, "critical": true, "break_if_error": true});
    let proc = Procedure::new().sub("sub", three(middle)).sub("next", three(say(false)));
    let report = engine().run(&proc);
    assert_eq!(report.result.tests.len(), 1);
    assert_eq!(report.result.err().map(|e| e.kind()), Some(ErrorKind::Stop));
}

#[test]
fn test_passing_flagged_steps_have_no_effect() {
    let proc = Procedure::new()
        .step("a", "say", json!({"msg": "a", "critical": true}))
        .step("b", "say", json!({"msg": "b", "break_if_error": true}))
        .step("c", "say", say(false));
    let report = engine().run(&proc);
    assert!(report.passed());
    assert_eq!(report.result.tests.len(), 3);
}

// =============================================================================
// Level-wide failures
// =============================================================================

#[test]
fn test_invalid_shape_discards_level() {
    let proc = Procedure::from_json(&json!([
        ["test1", "say", {"msg": "Hello world 1 !"}],
        ["test2", "12", {"msg": "Hello world 2 !"}],
        ["test3", "say", {"msg": "Hello world 3 !"}],
        ["test4", "kdjr"]
    ]));

    let engine = engine();
    for _ in 0..2 {
        let report = engine.run(&proc);
        assert_eq!(report.result.result, Some(false));
        assert_eq!(report.result.err().map(|e| e.kind()), Some(ErrorKind::Unexpected));
        assert!(report.result.tests.is_empty());
        assert_eq!(report.errors.len(), 1);
    }
}

#[test]
fn test_wrong_arity_discards_level() {
    let proc = Procedure::from_json(&json!([
        ["ok", "say", {"msg": "fine"}],
        ["bad", "say", {"msg": "x"}, "extra"]
    ]));
    let report = engine().run(&proc);
    assert!(report.result.tests.is_empty());
    assert_eq!(report.result.err().map(|e| e.kind()), Some(ErrorKind::Unexpected));
}

#[test]
fn test_malformed_sub_procedure_fails_only_that_level() {
    let inner = Procedure::from_json(&json!([
        ["a", "say", {"msg": "a"}],
        ["b", 12, {}]
    ]));
    let proc = Procedure::new().sub("broken", inner).step("after", "say", say(false));
    let report = engine().run(&proc);
    let root = &report.result;

    assert_eq!(root.tests.len(), 2);
    assert!(root.tests[0].tests().is_empty());
    assert_eq!(root.tests[0].err().map(|e| e.kind()), Some(ErrorKind::Unexpected));
    assert_eq!(root.tests[1].result(), Some(true));
    assert_eq!(root.result, Some(false));
    assert!(root.err().is_none());
}

#[test]
fn test_bad_step_arguments_fail_the_level() {
    let proc = Procedure::new()
        .step("a", "say", say(false))
        .step("b", "say", json!({"fail": true}));
    let report = engine().run(&proc);
    assert!(report.result.tests.is_empty());
    let message = report.result.err().unwrap().to_string();
    assert!(message.contains("cannot build step of type 'say'"), "{message}");
}

// =============================================================================
// Timing storage
// =============================================================================

#[test]
fn test_timing_storage() {
    let proc = Procedure::new()
        .step("test1", "say", json!({"msg": "1", "store_timestamp": true}))
        .step("test2", "fixed", json!({"value": 1, "store_timestamp": true}))
        .step("test3", "say", json!({"msg": "2", "delay": 200, "store_duration": true}))
        .step("test4", "fixed", json!({"value": 1, "delay": 200, "store_duration": true}))
        .step("test5", "say", json!({"msg": "3"}));

    let report = engine().run(&proc);
    let tests = &report.result.tests;

    assert!(report.passed());
    assert_eq!(tests.len(), 5);
    assert!(tests[0].meta().timestamp.is_some());
    assert!(tests[1].meta().timestamp.is_some());
    assert!(tests[0].meta().duration.is_none());
    assert!(tests[2].meta().duration.unwrap() >= 200);
    assert!(tests[3].meta().duration.unwrap() >= 200);
    assert!(tests[2].meta().timestamp.is_none());
    assert!(tests[4].meta().timestamp.is_none());
    assert!(tests[4].meta().duration.is_none());
}

// =============================================================================
// Measure store and transform
// =============================================================================

fn measure_then_transform(constraint: Constraint) -> Procedure {
    Procedure::new().sub(
        "sub",
        Procedure::new()
            .step("measure", "fixed", json!({"value": 2, "save_value": true}))
            .step(
                "transform",
                "identity",
                json!({"value_from": "^measure", "constraint": constraint}),
            ),
    )
}

#[test]
fn test_measure_values_through_transform() {
    let report = engine().run(&measure_then_transform(Constraint::Above { ref_value: 1.0 }));
    assert!(report.passed());

    let transformed = report.result.find("sub.transform").and_then(TestResult::as_measure).unwrap();
    assert_eq!(transformed.value, Some(json!(2)));
}

#[test]
fn test_transform_constraint_failure() {
    let report = engine().run(&measure_then_transform(Constraint::Above { ref_value: 3.0 }));
    assert_eq!(report.result.result, Some(false));
    assert!(report.result.err().is_none());

    let transform = report.result.find("sub.transform").unwrap();
    assert_eq!(transform.err().map(|e| e.kind()), Some(ErrorKind::ConstraintViolation));
}

#[test]
fn test_above_is_inclusive() {
    let report = engine().run(&measure_then_transform(Constraint::Above { ref_value: 2.0 }));
    assert!(report.passed());
}

#[test]
fn test_values_do_not_leak_between_runs() {
    let engine = engine();
    let first = Procedure::new().step("m", "fixed", json!({"value": 1, "save_value": true}));
    assert!(engine.run(&first).passed());

    let second = Procedure::new().step("t", "identity", json!({"value_from": "m"}));
    let report = engine.run(&second);
    assert_eq!(report.result.tests[0].err().map(|e| e.kind()), Some(ErrorKind::Unexpected));
}

#[test]
fn test_shared_context_across_procedure_runs() {
    let engine = engine();
    let mut run = RunContext::new();

    let first = Procedure::new().step("m", "fixed", json!({"value": 5, "save_value": true}));
    engine.procedure_run(&first, Some("setup"), &mut run).unwrap();
    assert!(run.values.contains("setup.m"));

    let second = Procedure::new().step("t", "identity", json!({"value_from": "setup.m"}));
    let result = engine.procedure_run(&second, None, &mut run).unwrap();
    assert!(result.passed());
    assert!(run.path.is_empty());
}

// =============================================================================
// Callbacks
// =============================================================================

type Log = Rc<RefCell<Vec<String>>>;

fn traced_engine() -> (ProcedureEngine, Log) {
    let log: Log = Rc::default();
    let mut engine = engine();

    let l = log.clone();
    engine.on_procedure_enter(move |path| {
        l.borrow_mut().push(format!("enter {path}"));
        Ok(())
    });
    let l = log.clone();
    engine.on_procedure_leave(move |path, result| {
        l.borrow_mut().push(format!("leave {path} {:?}", result.result));
        Ok(())
    });
    let l = log.clone();
    engine.on_step_enter(move |path| {
        l.borrow_mut().push(format!("step {path}"));
        Ok(())
    });
    let l = log.clone();
    engine.on_step_leave(move |path, result| {
        l.borrow_mut().push(format!("done {path} {:?}", result.result()));
        Ok(())
    });

    (engine, log)
}

#[test]
fn test_callbacks_see_path_stack() {
    let (engine, log) = traced_engine();
    let proc = Procedure::new()
        .step("a", "say", say(false))
        .sub("sub", Procedure::new().step("b", "say", say(true)));
    engine.run(&proc);

    assert_eq!(
        *log.borrow(),
        vec![
            "enter <root>",
            "step a",
            "done a Some(true)",
            "enter sub",
            "step sub.b",
            "done sub.b Some(false)",
            "leave sub Some(false)",
            "leave <root> Some(false)",
        ]
    );
}

#[test]
fn test_step_callback_failure_fails_enclosing_level() {
    let mut engine = engine();
    engine.on_step_leave(|path, _| {
        if path.joined() == "sub.b" {
            anyhow::bail!("listener crashed");
        }
        Ok(())
    });

    let proc = Procedure::new()
        .sub("sub", Procedure::new().step("a", "say", say(false)).step("b", "say", say(false)))
        .step("c", "say", say(false));
    let report = engine.run(&proc);
    let root = &report.result;

    assert_eq!(root.tests.len(), 2);
    assert!(root.tests[0].tests().is_empty());
    assert_eq!(root.tests[0].err().unwrap().to_string(), "listener crashed");
    assert_eq!(root.tests[1].result(), Some(true));
}

#[test]
fn test_procedure_callback_failure_fails_parent_level() {
    let mut engine = engine();
    engine.on_procedure_enter(|path| {
        if path.current() == Some("sub") {
            return Err(ProcedureError::abort(path).into());
        }
        Ok(())
    });

    let proc = Procedure::new()
        .step("a", "say", say(false))
        .sub("sub", three(say(false)))
        .step("c", "say", say(false));
    let report = engine.run(&proc);

    assert!(report.result.tests.is_empty());
    assert_eq!(report.result.err().map(|e| e.kind()), Some(ErrorKind::Abort));
}

#[test]
fn test_root_callback_failure_fails_root() {
    let mut engine = engine();
    engine.on_procedure_leave(|path, _| {
        if path.is_empty() {
            anyhow::bail!("cannot publish results");
        }
        Ok(())
    });

    let report = engine.run(&three(say(false)));
    assert_eq!(report.result.result, Some(false));
    assert!(report.result.tests.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error.to_string(), "cannot publish results");
}

// =============================================================================
// Single steps
// =============================================================================

#[test]
fn test_step_run_measure_fail() {
    let engine = engine();
    let mut run = RunContext::new();
    let mut step = engine
        .registry()
        .build(
            "fixed",
            &json!({"value": -1.0, "constraint": {"constraint_class": "above", "ref_value": 0.0}}),
            &[],
        )
        .unwrap();

    for _ in 0..2 {
        let result = engine.step_run("test", &mut step, &mut run).unwrap();
        assert_eq!(result.result(), Some(false));
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::ConstraintViolation));
    }
    assert_eq!(run.errors.len(), 2);
}

#[test]
fn test_step_run_measure_success() {
    let engine = engine();
    let mut run = RunContext::new();
    let mut step = engine
        .registry()
        .build(
            "fixed",
            &json!({"value": 1.0, "constraint": {"constraint_class": "above", "ref_value": 0.0}}),
            &[],
        )
        .unwrap();

    let result = engine.step_run("test", &mut step, &mut run).unwrap();
    assert_eq!(result.result(), Some(true));
    assert!(result.err().is_none());
    assert!(run.errors.is_empty());
}

// =============================================================================
// Step cleanup
// =============================================================================

fn cleaned_engine() -> (ProcedureEngine, Rc<Cell<u32>>) {
    let cleaned = Rc::new(Cell::new(0));
    let mut engine = engine();
    let counter = cleaned.clone();
    engine.registry_mut().register_action("cleaned", move |p: CleanedParams| {
        Ok(Cleaned {
            fail: p.fail,
            cleaned: counter.clone(),
        })
    });
    (engine, cleaned)
}

#[test]
fn test_clean_called_after_passing_step() {
    let (engine, cleaned) = cleaned_engine();
    let report = engine.run(&Procedure::new().step("ok", "cleaned", json!({})));
    assert!(report.passed());
    assert_eq!(cleaned.get(), 1);
}

#[test]
fn test_clean_called_after_failing_step() {
    let (engine, cleaned) = cleaned_engine();
    let report = engine.run(&Procedure::new().step("ko", "cleaned", json!({"fail": true})));
    assert_eq!(report.result.tests[0].result(), Some(false));
    assert_eq!(cleaned.get(), 1);
}

#[test]
fn test_clean_called_when_leave_callback_fails() {
    let (mut engine, cleaned) = cleaned_engine();
    engine.on_step_leave(|_, _| anyhow::bail!("listener crashed"));

    let report = engine.run(&Procedure::new().step("ok", "cleaned", json!({})));
    assert!(report.result.tests.is_empty());
    assert_eq!(report.result.err().unwrap().to_string(), "listener crashed");
    assert_eq!(cleaned.get(), 1);
}

#[test]
fn test_clean_called_once_per_step_run() {
    let (engine, cleaned) = cleaned_engine();
    let mut run = RunContext::new();
    let mut step = engine.registry().build("cleaned", &json!({"fail": true}), &[]).unwrap();

    for _ in 0..2 {
        engine.step_run("test", &mut step, &mut run).unwrap();
    }
    assert_eq!(cleaned.get(), 2);
}
