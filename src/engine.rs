//! Procedure Engine
//!
//! Walks a [`Procedure`] depth-first, runs each leaf step through the step
//! registry, and aggregates the results into a tree.
//!
//! # Level State Machine
//!
//! ```text
//! Enter (push id, enter callbacks)
//!     ↓
//! Running ──→ child done ──→ continue / break / propagate
//!     ↓
//! Leave (leave callbacks, pop id)
//! ```
//!
//! # Continuation Rules
//!
//! After each child, the first matching rule applies:
//!
//! | Child                                   | Effect on the current level            |
//! |-----------------------------------------|----------------------------------------|
//! | carries Abort or Stop                   | copy the error, fail, break            |
//! | failed leaf step flagged `critical`     | set a Stop error, fail, break          |
//! | failed leaf step with `break_if_error`  | fail, break without error              |
//! | failed for any other reason             | fail, keep going                       |
//!
//! A level that finishes without failing anything is marked successful.
//! An error raised by the walk itself (malformed entry, unknown step type,
//! callback failure) fails the level and discards the results collected so
//! far at that level.

use std::fmt;
use tracing::{debug, error, info};

use crate::context::{ErrorLog, ErrorRecord, RunContext, ValueStore};
use crate::error::ProcedureError;
use crate::path::PathStack;
use crate::procedure::{Entry, Procedure};
use crate::registry::StepRegistry;
use crate::result::{ProcedureResult, TestResult};
use crate::step::{Step, StepContext, StepOptions};

type EnterCallback = Box<dyn Fn(&PathStack) -> anyhow::Result<()>>;
type StepLeaveCallback = Box<dyn Fn(&PathStack, &TestResult) -> anyhow::Result<()>>;
type ProcedureLeaveCallback = Box<dyn Fn(&PathStack, &ProcedureResult) -> anyhow::Result<()>>;

#[derive(Default)]
struct Callbacks {
    step_enter: Vec<EnterCallback>,
    step_leave: Vec<StepLeaveCallback>,
    procedure_enter: Vec<EnterCallback>,
    procedure_leave: Vec<ProcedureLeaveCallback>,
}

/// Outcome of a top-level run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Root of the result tree
    pub result: ProcedureResult,
    /// Every error raised during the run, in order
    pub errors: Vec<ErrorRecord>,
}

impl RunReport {
    /// True when the root level passed
    pub fn passed(&self) -> bool {
        self.result.passed()
    }
}

/// Runs procedures.
///
/// Registered callbacks apply to every run. An engine holds no per-run
/// state: each [`ProcedureEngine::run`] gets a fresh [`RunContext`].
pub struct ProcedureEngine {
    registry: StepRegistry,
    callbacks: Callbacks,
}

impl fmt::Debug for ProcedureEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureEngine")
            .field("registry", &self.registry)
            .field("step_enter_callbacks", &self.callbacks.step_enter.len())
            .field("step_leave_callbacks", &self.callbacks.step_leave.len())
            .field("procedure_enter_callbacks", &self.callbacks.procedure_enter.len())
            .field("procedure_leave_callbacks", &self.callbacks.procedure_leave.len())
            .finish()
    }
}

impl ProcedureEngine {
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry,
            callbacks: Callbacks::default(),
        }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut StepRegistry {
        &mut self.registry
    }

    /// Called with the path stack (step id included) before each step runs
    pub fn on_step_enter<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&PathStack) -> anyhow::Result<()> + 'static,
    {
        self.callbacks.step_enter.push(Box::new(callback));
        self
    }

    /// Called with the path stack and the step result after each step runs
    pub fn on_step_leave<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&PathStack, &TestResult) -> anyhow::Result<()> + 'static,
    {
        self.callbacks.step_leave.push(Box::new(callback));
        self
    }

    /// Called with the path stack when entering the root or a sub-procedure
    pub fn on_procedure_enter<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&PathStack) -> anyhow::Result<()> + 'static,
    {
        self.callbacks.procedure_enter.push(Box::new(callback));
        self
    }

    /// Called with the path stack and the level result when leaving a level
    pub fn on_procedure_leave<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&PathStack, &ProcedureResult) -> anyhow::Result<()> + 'static,
    {
        self.callbacks.procedure_leave.push(Box::new(callback));
        self
    }

    /// Run `procedure` as the root of a fresh run.
    pub fn run(&self, procedure: &Procedure) -> RunReport {
        let mut run = RunContext::new();
        let result = match self.procedure_run(procedure, None, &mut run) {
            Ok(result) => result,
            Err(err) => {
                // Root enter/leave callback failure: nothing above to report to.
                let mut result = ProcedureResult::root();
                fail_level(&mut result, err, &run.path, &mut run.errors);
                result
            }
        };

        RunReport {
            result,
            errors: run.errors.into_records(),
        }
    }

    /// Run one procedure level inside an existing run.
    ///
    /// With an `id`, the level is a named sub-procedure and `id` is pushed on
    /// the path stack for its duration; without, it is a root level.
    ///
    /// # Errors
    ///
    /// Only procedure enter/leave callback failures are returned; they fail
    /// the caller's level. Everything else is recorded in the result.
    pub fn procedure_run(
        &self,
        procedure: &Procedure,
        id: Option<&str>,
        run: &mut RunContext,
    ) -> Result<ProcedureResult, ProcedureError> {
        self.run_level(procedure, id, &mut run.path, &mut run.errors, &mut run.values)
    }

    /// Run a single step inside an existing run.
    ///
    /// Pushes `id`, fires the step callbacks and always calls the step's
    /// `clean` hook afterwards.
    ///
    /// # Errors
    ///
    /// Step enter/leave callback failures.
    pub fn step_run(
        &self,
        id: &str,
        step: &mut Step,
        run: &mut RunContext,
    ) -> Result<TestResult, ProcedureError> {
        self.dispatch(id, step, &mut run.path, &mut run.errors, &mut run.values)
    }

    fn run_level(
        &self,
        procedure: &Procedure,
        id: Option<&str>,
        path: &mut PathStack,
        errors: &mut ErrorLog,
        values: &mut ValueStore,
    ) -> Result<ProcedureResult, ProcedureError> {
        match id {
            Some(id) => {
                let mut scoped = path.enter(id);
                info!("Entering subprocedure {}", scoped.joined());
                let outcome =
                    self.run_level_scoped(procedure, ProcedureResult::container(id), &mut scoped, errors, values);
                info!("Leaving subprocedure {}", scoped.joined());
                outcome
            }
            None => {
                info!("Starting root procedure");
                let outcome = self.run_level_scoped(procedure, ProcedureResult::root(), path, errors, values);
                info!("Leaving root procedure");
                outcome
            }
        }
    }

    fn run_level_scoped(
        &self,
        procedure: &Procedure,
        mut result: ProcedureResult,
        path: &mut PathStack,
        errors: &mut ErrorLog,
        values: &mut ValueStore,
    ) -> Result<ProcedureResult, ProcedureError> {
        for callback in &self.callbacks.procedure_enter {
            callback(path).map_err(|err| ProcedureError::from_anyhow(err, path))?;
        }

        if let Err(err) = self.walk(procedure, &mut result, path, errors, values) {
            fail_level(&mut result, err, path, errors);
        }

        for callback in &self.callbacks.procedure_leave {
            callback(path, &result).map_err(|err| ProcedureError::from_anyhow(err, path))?;
        }

        Ok(result)
    }

    /// Iterate the entries of one level, applying the continuation rules.
    fn walk(
        &self,
        procedure: &Procedure,
        level: &mut ProcedureResult,
        path: &mut PathStack,
        errors: &mut ErrorLog,
        values: &mut ValueStore,
    ) -> Result<(), ProcedureError> {
        for entry in procedure.entries() {
            debug!(path = %path, "Walking entry {:?}", entry.id().unwrap_or("?"));

            let (child, flags): (TestResult, Option<StepOptions>) = match entry {
                Entry::Procedure { id, procedure } => {
                    let child = self.run_level(procedure, Some(id.as_str()), path, errors, values)?;
                    (TestResult::Container(child), None)
                }
                Entry::Step {
                    id,
                    step_type,
                    args,
                } => {
                    let mut step = self.registry.build(step_type, args, path)?;
                    let child = self.dispatch(id, &mut step, path, errors, values)?;
                    (child, Some(step.options()))
                }
                Entry::Malformed { reason, .. } => {
                    return Err(ProcedureError::unexpected(reason.clone(), path));
                }
            };

            let failed = child.failed();
            let hard = child.err().filter(|err| err.is_hard()).cloned();
            level.tests.push(child);

            if !failed {
                continue;
            }
            level.result = Some(false);

            if let Some(err) = hard {
                level.meta.err = Some(err);
                break;
            }
            if let Some(flags) = flags {
                if flags.critical {
                    level.meta.err = Some(ProcedureError::stop(path));
                    break;
                }
                if flags.break_if_error {
                    break;
                }
            }
        }

        if level.result.is_none() {
            level.result = Some(true);
        }
        Ok(())
    }

    fn dispatch(
        &self,
        id: &str,
        step: &mut Step,
        path: &mut PathStack,
        errors: &mut ErrorLog,
        values: &mut ValueStore,
    ) -> Result<TestResult, ProcedureError> {
        let scoped = path.enter(id);
        let outcome = self.dispatch_scoped(step, &scoped, errors, values);
        step.clean();
        outcome
    }

    fn dispatch_scoped(
        &self,
        step: &mut Step,
        path: &PathStack,
        errors: &mut ErrorLog,
        values: &mut ValueStore,
    ) -> Result<TestResult, ProcedureError> {
        for callback in &self.callbacks.step_enter {
            callback(path).map_err(|err| ProcedureError::from_anyhow(err, path))?;
        }

        let ctx = StepContext::new(self, path);
        let result = step.run(&ctx, errors, values);

        for callback in &self.callbacks.step_leave {
            callback(path, &result).map_err(|err| ProcedureError::from_anyhow(err, path))?;
        }

        Ok(result)
    }
}

/// Level-wide failure: nothing collected at this level is kept.
fn fail_level(result: &mut ProcedureResult, err: ProcedureError, path: &PathStack, errors: &mut ErrorLog) {
    error!(path = %path, "Procedure level failed: {err}");
    errors.register(path, err.clone());
    result.result = Some(false);
    result.meta.err = Some(err);
    result.tests.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::NoParams;
    use crate::step::Action;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Flip {
        #[serde(default)]
        fail: bool,
    }

    impl Action for Flip {
        fn run(&mut self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("I must fail !");
            }
            Ok(())
        }
    }

    struct Halt;

    impl Action for Halt {
        fn run(&mut self, ctx: &StepContext<'_>) -> anyhow::Result<()> {
            Err(ProcedureError::abort(ctx.path()).into())
        }
    }

    fn engine() -> ProcedureEngine {
        let mut registry = StepRegistry::new();
        registry
            .register_action("flip", |p: Flip| Ok(p))
            .register_action("halt", |_: NoParams| Ok(Halt));
        ProcedureEngine::new(registry)
    }

    fn ok(id: &str) -> Entry {
        Entry::Step {
            id: id.to_string(),
            step_type: "flip".to_string(),
            args: json!({}),
        }
    }

    #[test]
    fn test_empty_procedure_passes() {
        let report = engine().run(&Procedure::new());
        assert_eq!(report.result.result, Some(true));
        assert!(report.result.tests.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_abort_propagates_to_root() {
        let proc = Procedure::new()
            .sub(
                "outer",
                Procedure::new().sub("inner", Procedure::new().push(ok("a")).step("stop", "halt", json!({}))),
            )
            .push(ok("never"));

        let report = engine().run(&proc);
        let root = &report.result;
        assert_eq!(root.result, Some(false));
        assert_eq!(root.err().map(|e| e.kind()), Some(ErrorKind::Abort));
        assert_eq!(root.tests.len(), 1);

        let outer = root.tests[0].as_container().unwrap();
        assert_eq!(outer.err().map(|e| e.kind()), Some(ErrorKind::Abort));
        let inner = outer.tests[0].as_container().unwrap();
        assert_eq!(inner.tests.len(), 2);

        // The abort is recorded where it was raised, once.
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, vec!["outer", "inner", "stop"]);
    }

    #[test]
    fn test_critical_sub_procedure_does_not_apply_flags() {
        // Flags belong to leaf steps; a failed container only fails its parent.
        let proc = Procedure::new()
            .sub("sub", Procedure::new().step("bad", "flip", json!({"fail": true})))
            .push(ok("after"));
        let report = engine().run(&proc);
        assert_eq!(report.result.tests.len(), 2);
        assert_eq!(report.result.result, Some(false));
        assert!(report.result.err().is_none());
    }

    #[test]
    fn test_unknown_step_type_discards_level() {
        let proc = Procedure::new().push(ok("a")).step("b", "nope", json!({}));
        let report = engine().run(&proc);
        assert_eq!(report.result.result, Some(false));
        assert!(report.result.tests.is_empty());
        assert_eq!(report.result.err().map(|e| e.kind()), Some(ErrorKind::Unexpected));
    }

    #[test]
    fn test_step_run_outside_procedure() {
        let engine = engine();
        let mut run = RunContext::new();
        for _ in 0..2 {
            let mut step = engine.registry().build("flip", &json!({"fail": true}), &[]).unwrap();
            let result = engine.step_run("test", &mut step, &mut run).unwrap();
            assert_eq!(result.result(), Some(false));
            assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Unexpected));
        }
        assert!(run.path.is_empty());
        assert_eq!(run.errors.len(), 2);
    }
}
