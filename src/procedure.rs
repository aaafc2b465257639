//! Procedure definitions
//!
//! A procedure is an ordered list of entries. In JSON, each entry is a
//! positional array:
//!
//! ```text
//! ["cont1", [ ...entries... ]]                  sub-procedure
//! ["vbat", "read_voltage", { "unit": "V" }]     leaf step: id, step type, arguments
//! ```
//!
//! Conversion from JSON never fails. An entry that cannot be understood is
//! kept as [`Entry::Malformed`] and reported by the engine when the walk
//! reaches it, so it fails the level that contains it.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::{Value, json};

/// One entry of a procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Named sub-procedure
    Procedure { id: String, procedure: Procedure },
    /// Leaf step, instantiated through the step registry when reached
    Step {
        id: String,
        step_type: String,
        args: Value,
    },
    /// An entry with an unusable shape
    Malformed { raw: Value, reason: String },
}

impl Entry {
    /// Convert one positional JSON entry.
    pub fn from_json(raw: &Value) -> Self {
        let malformed = |reason: String| Entry::Malformed {
            raw: raw.clone(),
            reason,
        };

        let Some(items) = raw.as_array() else {
            return malformed(format!("procedure entry must be a list, got {raw}"));
        };
        let Some(id) = items.first().and_then(Value::as_str) else {
            return malformed(format!("procedure entry {raw} must start with a string id"));
        };

        match items.as_slice() {
            [_, Value::Array(_)] => Entry::Procedure {
                id: id.to_string(),
                procedure: Procedure::from_json(&items[1]),
            },
            [_, Value::String(step_type), args @ (Value::Object(_) | Value::Null)] => Entry::Step {
                id: id.to_string(),
                step_type: step_type.clone(),
                args: args.clone(),
            },
            [_, Value::String(_), args] => {
                malformed(format!("arguments of step '{id}' must be a mapping, got {args}"))
            }
            [_, Value::String(step_type)] => malformed(format!(
                "step '{id}' of type '{step_type}' has no argument mapping"
            )),
            [_, other] | [_, other, _] => malformed(format!(
                "entry '{id}' must hold a sub-procedure list or a step type, got {other}"
            )),
            _ => malformed(format!(
                "entry '{id}' has {} elements, expected 2 or 3",
                items.len()
            )),
        }
    }

    /// Positional JSON form of this entry
    pub fn to_json(&self) -> Value {
        match self {
            Entry::Procedure { id, procedure } => json!([id, procedure.to_json()]),
            Entry::Step {
                id,
                step_type,
                args,
            } => json!([id, step_type, args]),
            Entry::Malformed { raw, .. } => raw.clone(),
        }
    }

    /// Id of the entry, if it has one
    pub fn id(&self) -> Option<&str> {
        match self {
            Entry::Procedure { id, .. } | Entry::Step { id, .. } => Some(id),
            Entry::Malformed { raw, .. } => raw.get(0).and_then(Value::as_str),
        }
    }
}

/// Ordered sequence of entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Procedure {
    entries: Vec<Entry>,
}

impl Procedure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf step
    pub fn step(mut self, id: impl Into<String>, step_type: impl Into<String>, args: Value) -> Self {
        self.entries.push(Entry::Step {
            id: id.into(),
            step_type: step_type.into(),
            args,
        });
        self
    }

    /// Append a named sub-procedure
    pub fn sub(mut self, id: impl Into<String>, procedure: Procedure) -> Self {
        self.entries.push(Entry::Procedure {
            id: id.into(),
            procedure,
        });
        self
    }

    /// Append an arbitrary entry
    pub fn push(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Convert a JSON list of positional entries.
    ///
    /// Anything other than a list yields a single malformed entry.
    pub fn from_json(raw: &Value) -> Self {
        let entries = match raw.as_array() {
            Some(items) => items.iter().map(Entry::from_json).collect(),
            None => vec![Entry::Malformed {
                raw: raw.clone(),
                reason: format!("procedure must be a list of entries, got {raw}"),
            }],
        };
        Self { entries }
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.entries.iter().map(Entry::to_json).collect())
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Entry> for Procedure {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Procedure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Procedure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&raw))
    }
}
