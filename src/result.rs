//! Result objects produced by a run
//!
//! Every step or sub-procedure invocation produces one result, owned by its
//! parent's `tests` list. The root of the tree is a [`ProcedureResult`] with
//! no `step_id`; named sub-procedures are [`ProcedureResult`]s with a
//! `step_id`, wrapped in [`TestResult::Container`].
//!
//! Serialized results skip absent optional fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constraint::ConstraintSnapshot;
use crate::error::ProcedureError;
use crate::step::StepOptions;

/// Fields shared by every result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Error raised while producing this result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ProcedureError>,

    /// Start time in milliseconds since the UNIX epoch (`store_timestamp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    /// Elapsed time in milliseconds (`store_duration`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    /// Snapshot of the step's control-flow flags (leaf steps only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<StepOptions>,
}

/// Result of the root procedure or of a named sub-procedure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureResult {
    /// Id of the sub-procedure; `None` for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    #[serde(flatten)]
    pub meta: ResultMeta,

    /// Child results, in execution order
    #[serde(default)]
    pub tests: Vec<TestResult>,

    /// Unset until the level completes or fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
}

impl ProcedureResult {
    /// Empty root result
    pub fn root() -> Self {
        Self::default()
    }

    /// Empty result for the sub-procedure `step_id`
    pub fn container(step_id: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            ..Self::default()
        }
    }

    pub fn err(&self) -> Option<&ProcedureError> {
        self.meta.err.as_ref()
    }

    /// True when the level finished with `result == true` and no error
    pub fn passed(&self) -> bool {
        self.result == Some(true) && self.meta.err.is_none()
    }

    /// Find a direct child by id
    pub fn child(&self, id: &str) -> Option<&TestResult> {
        self.tests.iter().find(|t| t.step_id() == id)
    }

    /// Find a descendant by dotted path relative to this level (`sub.step`)
    pub fn find(&self, path: &str) -> Option<&TestResult> {
        let mut segments = path.split(crate::path::SEPARATOR);
        let mut current = self.child(segments.next()?)?;
        for segment in segments {
            match current {
                TestResult::Container(level) => current = level.child(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Visit every leaf step result in depth-first order
    pub fn leaves(&self) -> Vec<&TestResult> {
        let mut out = Vec::new();
        collect_leaves(&self.tests, &mut out);
        out
    }
}

fn collect_leaves<'a>(tests: &'a [TestResult], out: &mut Vec<&'a TestResult>) {
    for test in tests {
        match test {
            TestResult::Container(level) => collect_leaves(&level.tests, out),
            leaf => out.push(leaf),
        }
    }
}

/// Result of an action step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub step_id: String,

    #[serde(flatten)]
    pub meta: ResultMeta,

    pub result: bool,
}

/// Result of a measure (or measure-transform) step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureResult {
    pub step_id: String,

    #[serde(flatten)]
    pub meta: ResultMeta,

    /// Constraint actually used, detached from the live object
    pub constraint: ConstraintSnapshot,

    #[serde(default)]
    pub unit: String,

    /// Absent when the measurement failed before producing a value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    pub result: bool,
}

/// A child entry of a procedure's `tests` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum TestResult {
    Container(ProcedureResult),
    Action(ActionResult),
    Measure(MeasureResult),
}

impl TestResult {
    pub fn step_id(&self) -> &str {
        match self {
            Self::Container(r) => r.step_id.as_deref().unwrap_or_default(),
            Self::Action(r) => &r.step_id,
            Self::Measure(r) => &r.step_id,
        }
    }

    pub fn meta(&self) -> &ResultMeta {
        match self {
            Self::Container(r) => &r.meta,
            Self::Action(r) => &r.meta,
            Self::Measure(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ResultMeta {
        match self {
            Self::Container(r) => &mut r.meta,
            Self::Action(r) => &mut r.meta,
            Self::Measure(r) => &mut r.meta,
        }
    }

    pub fn err(&self) -> Option<&ProcedureError> {
        self.meta().err.as_ref()
    }

    /// Tri-state outcome; only containers can be unset
    pub fn result(&self) -> Option<bool> {
        match self {
            Self::Container(r) => r.result,
            Self::Action(r) => Some(r.result),
            Self::Measure(r) => Some(r.result),
        }
    }

    /// A child failed when its result is not `true` or it carries an error
    pub fn failed(&self) -> bool {
        self.result() != Some(true) || self.err().is_some()
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, Self::Container(_))
    }

    /// Flags of the step that produced this result (leaf steps only)
    pub fn options(&self) -> Option<&StepOptions> {
        self.meta().options.as_ref()
    }

    /// Child results of a container, empty for leaves
    pub fn tests(&self) -> &[TestResult] {
        match self {
            Self::Container(r) => &r.tests,
            _ => &[],
        }
    }

    pub fn as_measure(&self) -> Option<&MeasureResult> {
        match self {
            Self::Measure(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&ProcedureResult> {
        match self {
            Self::Container(r) => Some(r),
            _ => None,
        }
    }
}
