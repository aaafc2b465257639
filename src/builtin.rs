//! Built-in step library
//!
//! Generic step types available to every definition file run by the CLI:
//!
//! | Type       | Kind      | Parameters                         |
//! |------------|-----------|------------------------------------|
//! | `log`      | action    | `message`                          |
//! | `sleep`    | action    | `ms`                               |
//! | `fail`     | action    | `message` (optional)               |
//! | `abort`    | action    |                                    |
//! | `constant` | measure   | `value`                            |
//! | `scale`    | transform | `factor` (1), `offset` (0)         |

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::context::ValueStore;
use crate::error::ProcedureError;
use crate::registry::{NoParams, StepRegistry};
use crate::step::{Action, Measure, StepContext, Transform};

/// Register every built-in step type.
pub fn register(registry: &mut StepRegistry) {
    registry
        .register_action("log", |p: Log| Ok(p))
        .register_action("sleep", |p: Sleep| Ok(p))
        .register_action("fail", |p: Fail| Ok(p))
        .register_action("abort", |_: NoParams| Ok(Abort))
        .register_measure("constant", |p: Constant| Ok(p))
        .register_transform("scale", |p: Scale| Ok(p));
}

/// Write a message to the log
#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub message: String,
}

impl Action for Log {
    fn run(&mut self, ctx: &StepContext<'_>) -> anyhow::Result<()> {
        info!(path = %ctx.path(), "{}", self.message);
        Ok(())
    }
}

/// Block for a fixed number of milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct Sleep {
    pub ms: u64,
}

impl Action for Sleep {
    fn run(&mut self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(self.ms));
        Ok(())
    }
}

fn default_fail_message() -> String {
    "step failed on request".to_string()
}

/// Always fails
#[derive(Debug, Clone, Deserialize)]
pub struct Fail {
    #[serde(default = "default_fail_message")]
    pub message: String,
}

impl Action for Fail {
    fn run(&mut self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.message)
    }
}

/// Aborts the whole run
#[derive(Debug, Clone, Copy, Default)]
pub struct Abort;

impl Action for Abort {
    fn run(&mut self, ctx: &StepContext<'_>) -> anyhow::Result<()> {
        Err(ProcedureError::abort(ctx.path()).into())
    }
}

/// Measures a fixed value
#[derive(Debug, Clone, Deserialize)]
pub struct Constant {
    pub value: Value,
}

impl Measure for Constant {
    fn measure(&mut self, _ctx: &StepContext<'_>, _values: &mut ValueStore) -> anyhow::Result<Value> {
        Ok(self.value.clone())
    }
}

fn one() -> f64 {
    1.0
}

/// Linear transform: `value * factor + offset`
#[derive(Debug, Clone, Deserialize)]
pub struct Scale {
    #[serde(default = "one")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Transform for Scale {
    fn transform(&mut self, _ctx: &StepContext<'_>, value: Value) -> anyhow::Result<Value> {
        let Some(x) = value.as_f64() else {
            anyhow::bail!("cannot scale non-numeric value {value}");
        };
        Ok(Value::from(x * self.factor + self.offset))
    }
}
