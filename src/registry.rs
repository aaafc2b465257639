//! Step type registry
//!
//! Procedure definitions name their leaf steps by type (`"set_voltage"`) and
//! pass a mapping of arguments. The registry turns that pair into a [`Step`]:
//! the shared flags ([`StepOptions`]), the variant configuration
//! ([`MeasureSpec`] / [`TransformSpec`]) and the step type's own parameters
//! are all deserialized from the same mapping.
//!
//! ```
//! use procrunner::registry::StepRegistry;
//! use procrunner::step::{Action, StepContext};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Greet {
//!     msg: String,
//! }
//!
//! impl Action for Greet {
//!     fn run(&mut self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
//!         println!("{}", self.msg);
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = StepRegistry::new();
//! registry.register_action("greet", |params: Greet| Ok(params));
//! assert!(registry.contains("greet"));
//! ```

use anyhow::Context;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProcedureError;
use crate::step::{Action, Measure, MeasureSpec, Step, StepKind, StepOptions, Transform, TransformSpec};

type Factory = Box<dyn Fn(&Value) -> anyhow::Result<Step>>;

/// Parameters of a step type that takes none of its own.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NoParams {}

struct Registration {
    kind: StepKind,
    factory: Factory,
}

/// Maps step type names to step factories.
#[derive(Default)]
pub struct StepRegistry {
    types: BTreeMap<String, Registration>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.types.iter().map(|(name, r)| (name, r.kind)))
            .finish()
    }
}

/// Deserialize a typed view of the step arguments.
fn parse<T: DeserializeOwned>(args: &Value, what: &str) -> anyhow::Result<T> {
    serde_json::from_value(args.clone()).with_context(|| format!("invalid {what}"))
}

impl StepRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in step library
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register(&mut registry);
        registry
    }

    fn insert(&mut self, name: &str, kind: StepKind, factory: Factory) -> &mut Self {
        if self.types.insert(name.to_string(), Registration { kind, factory }).is_some() {
            tracing::warn!("Step type '{}' registered twice, keeping the last one", name);
        }
        self
    }

    /// Register an action step type built from parameters `P`.
    pub fn register_action<P, A, F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        P: DeserializeOwned,
        A: Action + 'static,
        F: Fn(P) -> anyhow::Result<A> + 'static,
    {
        self.insert(
            name,
            StepKind::Action,
            Box::new(move |args: &Value| {
                let options: StepOptions = parse(args, "step options")?;
                let params: P = parse(args, "step parameters")?;
                Ok(Step::action(options, factory(params)?))
            }),
        )
    }

    /// Register a measure step type built from parameters `P`.
    pub fn register_measure<P, M, F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        P: DeserializeOwned,
        M: Measure + 'static,
        F: Fn(P) -> anyhow::Result<M> + 'static,
    {
        self.insert(
            name,
            StepKind::Measure,
            Box::new(move |args: &Value| {
                let options: StepOptions = parse(args, "step options")?;
                let spec: MeasureSpec = parse(args, "measure configuration")?;
                let params: P = parse(args, "step parameters")?;
                Ok(Step::measure(options, spec, factory(params)?))
            }),
        )
    }

    /// Register a measure-transform step type built from parameters `P`.
    ///
    /// The arguments must contain `value_from`.
    pub fn register_transform<P, T, F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        P: DeserializeOwned,
        T: Transform + 'static,
        F: Fn(P) -> anyhow::Result<T> + 'static,
    {
        self.insert(
            name,
            StepKind::Transform,
            Box::new(move |args: &Value| {
                let options: StepOptions = parse(args, "step options")?;
                let spec: TransformSpec = parse(args, "transform configuration")?;
                let params: P = parse(args, "step parameters")?;
                Ok(Step::transform(options, spec, factory(params)?))
            }),
        )
    }

    /// Instantiate a step of type `step_type` from its argument mapping.
    ///
    /// `null` arguments are treated as an empty mapping.
    ///
    /// # Errors
    ///
    /// Unknown step types, non-mapping arguments and arguments that do not
    /// deserialize are `Unexpected` errors raised at `path`.
    pub fn build(&self, step_type: &str, args: &Value, path: &[String]) -> Result<Step, ProcedureError> {
        let registration = self.types.get(step_type).ok_or_else(|| {
            ProcedureError::unexpected(format!("unknown step type '{step_type}'"), path)
        })?;

        let args = match args {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => args.clone(),
            other => {
                return Err(ProcedureError::unexpected(
                    format!("arguments of step type '{step_type}' must be a mapping, got {other}"),
                    path,
                ));
            }
        };

        (registration.factory)(&args)
            .with_context(|| format!("cannot build step of type '{step_type}'"))
            .map_err(|err| ProcedureError::from_anyhow(err, path))
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.types.contains_key(step_type)
    }

    /// Kind of a registered step type
    pub fn kind_of(&self, step_type: &str) -> Option<StepKind> {
        self.types.get(step_type).map(|r| r.kind)
    }

    /// Registered step types in name order
    pub fn names(&self) -> impl Iterator<Item = (&str, StepKind)> {
        self.types.iter().map(|(name, r)| (name.as_str(), r.kind))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
