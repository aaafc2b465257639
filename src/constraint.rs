//! Measurement constraints
//!
//! A [`Constraint`] is an immutable predicate over a measured scalar. An
//! absent value (`None` or JSON `null`) never satisfies any constraint.
//!
//! | Class       | Passes when                                   |
//! |-------------|-----------------------------------------------|
//! | `none`      | any present value                             |
//! | `boolean`   | `value == ref_value`                          |
//! | `below`     | `value <= ref_value`                          |
//! | `above`     | `value >= ref_value`                          |
//! | `tolerance` | `abs(value - ref_value) / ref_value < pct/100` |
//! | `range`     | `ref_min <= value <= ref_max`                 |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Tag key used in serialized constraints and snapshots
pub const CLASS_KEY: &str = "constraint_class";

/// Predicate validating a measured value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "constraint_class", rename_all = "snake_case")]
pub enum Constraint {
    /// Accepts anything that is present
    #[default]
    None,
    /// Equality against a reference boolean
    Boolean { ref_value: bool },
    /// Inclusive upper bound
    Below { ref_value: f64 },
    /// Inclusive lower bound
    Above { ref_value: f64 },
    /// Relative deviation from `ref_value`, in percent (exclusive)
    Tolerance { ref_value: f64, tolerance_pcent: f64 },
    /// Inclusive range
    Range { ref_min: f64, ref_max: f64 },
}

/// A constraint that cannot be evaluated at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintFault {
    #[error("tolerance constraint has a zero reference value (division by zero)")]
    ZeroReference,
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64()
}

impl Constraint {
    /// Class name of this constraint (`none`, `boolean`, `below`, ...)
    pub const fn class_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Boolean { .. } => "boolean",
            Self::Below { .. } => "below",
            Self::Above { .. } => "above",
            Self::Tolerance { .. } => "tolerance",
            Self::Range { .. } => "range",
        }
    }

    /// Evaluate the predicate.
    ///
    /// Non-numeric values fail numeric constraints. A tolerance constraint
    /// around zero cannot be evaluated and returns [`ConstraintFault`].
    pub fn evaluate(&self, value: Option<&Value>) -> Result<bool, ConstraintFault> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(false);
        };

        let passed = match self {
            Self::None => true,
            Self::Boolean { ref_value } => value.as_bool() == Some(*ref_value),
            Self::Below { ref_value } => number(value).is_some_and(|v| v <= *ref_value),
            Self::Above { ref_value } => number(value).is_some_and(|v| v >= *ref_value),
            Self::Tolerance {
                ref_value,
                tolerance_pcent,
            } => {
                if *ref_value == 0.0 {
                    return Err(ConstraintFault::ZeroReference);
                }
                number(value)
                    .is_some_and(|v| (v - ref_value).abs() / ref_value < tolerance_pcent / 100.0)
            }
            Self::Range { ref_min, ref_max } => {
                number(value).is_some_and(|v| v >= *ref_min && v <= *ref_max)
            }
        };

        Ok(passed)
    }

    /// Validate a value; faults count as a failed validation.
    pub fn validate(&self, value: Option<&Value>) -> bool {
        self.evaluate(value).unwrap_or(false)
    }

    /// Detached, serializable description of this constraint.
    pub fn snapshot(&self) -> ConstraintSnapshot {
        let mut options = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        options.remove(CLASS_KEY);

        ConstraintSnapshot {
            constraint_class: self.class_name().to_string(),
            options,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Boolean { ref_value } => write!(f, "== {ref_value}"),
            Self::Below { ref_value } => write!(f, "<= {ref_value}"),
            Self::Above { ref_value } => write!(f, ">= {ref_value}"),
            Self::Tolerance {
                ref_value,
                tolerance_pcent,
            } => write!(f, "{ref_value} ±{tolerance_pcent}%"),
            Self::Range { ref_min, ref_max } => write!(f, "[{ref_min}, {ref_max}]"),
        }
    }
}

/// Constraint description stored in results: the class name plus a flat
/// mapping of its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSnapshot {
    pub constraint_class: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ConstraintSnapshot {
    /// Rebuild the live constraint this snapshot was taken from.
    pub fn restore(&self) -> serde_json::Result<Constraint> {
        let mut map = self.options.clone();
        map.insert(
            CLASS_KEY.to_string(),
            Value::String(self.constraint_class.clone()),
        );
        serde_json::from_value(Value::Object(map))
    }
}

impl From<&Constraint> for ConstraintSnapshot {
    fn from(constraint: &Constraint) -> Self {
        constraint.snapshot()
    }
}

impl fmt::Display for ConstraintSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.restore() {
            Ok(constraint) => write!(f, "{constraint}"),
            Err(_) => write!(
                f,
                "{} {}",
                self.constraint_class,
                Value::Object(self.options.clone())
            ),
        }
    }
}
