//! procrunner
//!
//! Execution engine for hierarchical test procedures: trees of named steps
//! and sub-procedures, run depth-first, producing a tree of pass/fail results
//! with measured values, constraint checks and a flat error log.

pub mod builtin;
pub mod cli;
pub mod constraint;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod path;
pub mod procedure;
pub mod registry;
pub mod report;
pub mod result;
pub mod step;

// Re-export main types for convenience
pub use constraint::{Constraint, ConstraintSnapshot};
pub use context::{ErrorRecord, RunContext, ValueStore};
pub use definition::ProcedureFile;
pub use engine::{ProcedureEngine, RunReport};
pub use error::{ErrorKind, ProcedureError, ProcrunnerError};
pub use path::PathStack;
pub use procedure::{Entry, Procedure};
pub use registry::{NoParams, StepRegistry};
pub use result::{ActionResult, MeasureResult, ProcedureResult, TestResult};
pub use step::{
    Action, Identity, Measure, MeasureSpec, Step, StepContext, StepKind, StepOptions, Transform,
    TransformSpec,
};
