//! Step abstraction
//!
//! A [`Step`] is one unit of work in a procedure. Three variants exist:
//!
//! - **Action**: side-effecting; succeeds when its body returns `Ok`
//! - **Measure**: produces a scalar checked against a [`Constraint`]
//! - **Transform**: a measure whose scalar is derived from a value stored
//!   earlier in the run, looked up with `^` placeholder expansion
//!
//! The business logic of each variant is supplied through the [`Action`],
//! [`Measure`] and [`Transform`] traits. [`Step::run`] owns everything the
//! variants share: timing capture, error classification and registration,
//! and the snapshot of control-flow flags into the result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use strum::{Display, EnumString};
use tracing::error;

use crate::constraint::Constraint;
use crate::context::{ErrorLog, ValueStore};
use crate::engine::ProcedureEngine;
use crate::error::ProcedureError;
use crate::path::PathStack;
use crate::result::{ActionResult, MeasureResult, ResultMeta, TestResult};

/// Execution-control flags carried by every step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOptions {
    /// Execute even if already done. Reserved: parsed and reported only.
    pub phony: bool,
    /// A failure here stops the entire run
    pub critical: bool,
    /// A failure here skips the remaining siblings of this level only
    pub break_if_error: bool,
    /// Record the start time (ms since epoch) in the result
    pub store_timestamp: bool,
    /// Record the elapsed time (ms) in the result
    pub store_duration: bool,
}

/// Measure configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureSpec {
    /// Constraint to validate against; `None` means [`Constraint::None`]
    pub constraint: Option<Constraint>,
    /// Unit label reported with the value
    pub unit: String,
    /// Store the value under the step's path for later steps
    pub save_value: bool,
}

/// Measure-transform configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Key of the stored value to transform; `^` expands to the parent path
    pub value_from: String,
    #[serde(flatten)]
    pub measure: MeasureSpec,
}

/// Variant of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StepKind {
    Action,
    Measure,
    Transform,
}

/// What a step body sees of the run.
pub struct StepContext<'a> {
    engine: &'a ProcedureEngine,
    path: &'a PathStack,
}

impl<'a> StepContext<'a> {
    pub fn new(engine: &'a ProcedureEngine, path: &'a PathStack) -> Self {
        Self { engine, path }
    }

    /// Engine running this step
    pub fn engine(&self) -> &'a ProcedureEngine {
        self.engine
    }

    /// Path stack, including this step's id as the last segment
    pub fn path(&self) -> &'a PathStack {
        self.path
    }

    /// Id of the step being run
    pub fn step_id(&self) -> &'a str {
        self.path.current().unwrap_or_default()
    }
}

/// Body of an action step.
pub trait Action {
    /// Perform the action. Any error marks the step as failed.
    fn run(&mut self, ctx: &StepContext<'_>) -> anyhow::Result<()>;

    /// Release resources; called after every run, whatever the outcome.
    fn clean(&mut self) {}
}

/// Body of a measure step.
pub trait Measure {
    /// Produce the measured value.
    fn measure(&mut self, ctx: &StepContext<'_>, values: &mut ValueStore) -> anyhow::Result<Value>;

    fn clean(&mut self) {}
}

/// Body of a measure-transform step.
pub trait Transform {
    /// Derive the measured value from the stored one.
    fn transform(&mut self, ctx: &StepContext<'_>, value: Value) -> anyhow::Result<Value>;

    fn clean(&mut self) {}
}

/// Transform returning its input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn transform(&mut self, _ctx: &StepContext<'_>, value: Value) -> anyhow::Result<Value> {
        Ok(value)
    }
}

enum StepBody {
    Action(Box<dyn Action>),
    Measure {
        constraint: Constraint,
        unit: String,
        save_value: bool,
        measure: Box<dyn Measure>,
    },
    Transform {
        constraint: Constraint,
        unit: String,
        save_value: bool,
        value_from: String,
        transform: Box<dyn Transform>,
    },
}

/// A configured step, ready to run.
pub struct Step {
    options: StepOptions,
    body: StepBody,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("kind", &self.kind())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Step {
    pub fn action(options: StepOptions, action: impl Action + 'static) -> Self {
        Self {
            options,
            body: StepBody::Action(Box::new(action)),
        }
    }

    pub fn measure(options: StepOptions, spec: MeasureSpec, measure: impl Measure + 'static) -> Self {
        Self {
            options,
            body: StepBody::Measure {
                constraint: spec.constraint.unwrap_or_default(),
                unit: spec.unit,
                save_value: spec.save_value,
                measure: Box::new(measure),
            },
        }
    }

    pub fn transform(
        options: StepOptions,
        spec: TransformSpec,
        transform: impl Transform + 'static,
    ) -> Self {
        Self {
            options,
            body: StepBody::Transform {
                constraint: spec.measure.constraint.unwrap_or_default(),
                unit: spec.measure.unit,
                save_value: spec.measure.save_value,
                value_from: spec.value_from,
                transform: Box::new(transform),
            },
        }
    }

    pub fn kind(&self) -> StepKind {
        match self.body {
            StepBody::Action(_) => StepKind::Action,
            StepBody::Measure { .. } => StepKind::Measure,
            StepBody::Transform { .. } => StepKind::Transform,
        }
    }

    pub fn options(&self) -> StepOptions {
        self.options
    }

    /// Constraint used by measure and transform steps
    pub fn constraint(&self) -> Option<&Constraint> {
        match &self.body {
            StepBody::Action(_) => None,
            StepBody::Measure { constraint, .. } | StepBody::Transform { constraint, .. } => {
                Some(constraint)
            }
        }
    }

    /// Run the step body and build its result.
    ///
    /// Never fails: errors raised by the body are attached to the result and
    /// appended to `errors`. The caller has already pushed the step id onto
    /// the path stack seen by `ctx`.
    pub fn run(
        &mut self,
        ctx: &StepContext<'_>,
        errors: &mut ErrorLog,
        values: &mut ValueStore,
    ) -> TestResult {
        let path = ctx.path();
        let step_id = ctx.step_id().to_string();
        let started_at = SystemTime::now();
        let clock = Instant::now();

        let (mut result, outcome) = match &mut self.body {
            StepBody::Action(action) => {
                let outcome = action.run(ctx);
                let result = ActionResult {
                    step_id,
                    meta: ResultMeta::default(),
                    result: outcome.is_ok(),
                };
                (TestResult::Action(result), outcome)
            }
            StepBody::Measure {
                constraint,
                unit,
                save_value,
                measure,
            } => {
                let mut result = empty_measure(step_id, constraint, unit);
                let outcome = measure.measure(ctx, values).and_then(|value| {
                    record_value(&mut result, value, constraint, *save_value, path, values)
                });
                result.result = outcome.is_ok();
                (TestResult::Measure(result), outcome)
            }
            StepBody::Transform {
                constraint,
                unit,
                save_value,
                value_from,
                transform,
            } => {
                let mut result = empty_measure(step_id, constraint, unit);
                let outcome = values
                    .get(value_from, path)
                    .cloned()
                    .map_err(anyhow::Error::from)
                    .and_then(|stored| transform.transform(ctx, stored))
                    .and_then(|value| {
                        record_value(&mut result, value, constraint, *save_value, path, values)
                    });
                result.result = outcome.is_ok();
                (TestResult::Measure(result), outcome)
            }
        };

        let meta = result.meta_mut();
        if let Err(err) = outcome {
            let chain = format!("{err:?}");
            let err = ProcedureError::from_anyhow(err, path);
            if !err.is_domain() {
                error!(path = %path, "unexpected error in step: {chain}");
            }
            errors.register(path, err.clone());
            meta.err = Some(err);
        }
        if self.options.store_timestamp {
            meta.timestamp = Some(epoch_millis(started_at));
        }
        if self.options.store_duration {
            meta.duration = Some(clock.elapsed().as_millis() as u64);
        }
        meta.options = Some(self.options);

        result
    }

    /// Release resources held by the step body.
    pub fn clean(&mut self) {
        match &mut self.body {
            StepBody::Action(action) => action.clean(),
            StepBody::Measure { measure, .. } => measure.clean(),
            StepBody::Transform { transform, .. } => transform.clean(),
        }
    }
}

fn empty_measure(step_id: String, constraint: &Constraint, unit: &str) -> MeasureResult {
    MeasureResult {
        step_id,
        meta: ResultMeta::default(),
        constraint: constraint.snapshot(),
        unit: unit.to_string(),
        value: None,
        result: false,
    }
}

/// Store the measured value in the result (and the value store when asked),
/// then check it against the constraint.
fn record_value(
    result: &mut MeasureResult,
    value: Value,
    constraint: &Constraint,
    save_value: bool,
    path: &PathStack,
    values: &mut ValueStore,
) -> anyhow::Result<()> {
    result.value = Some(value.clone());
    if save_value {
        values.set(path, value.clone());
    }

    if !constraint.evaluate(Some(&value))? {
        return Err(
            ProcedureError::constraint_violation(result.constraint.clone(), value, path).into(),
        );
    }
    Ok(())
}

fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
