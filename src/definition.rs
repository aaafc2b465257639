//! Procedure definition files
//!
//! A definition file is a JSON document naming a procedure:
//!
//! ```text
//! {
//!   "name": "board_bringup",
//!   "description": "Power rails then audio path",
//!   "procedure": [
//!     ["vbat", "constant", {"value": 3.3, "unit": "V"}],
//!     ["audio", [
//!       ["beep", "log", {"message": "beep"}]
//!     ]]
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::ProcrunnerError;
use crate::procedure::{Entry, Procedure};
use crate::registry::StepRegistry;

/// A named procedure, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub procedure: Procedure,
}

impl ProcedureFile {
    pub fn new(name: impl Into<String>, procedure: Procedure) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            procedure,
        }
    }

    /// Save the definition to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize procedure definition to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write procedure definition to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load a definition from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read procedure definition from {:?}", path.as_ref()))?;

        let file: Self =
            serde_json::from_str(&content).context("Failed to parse procedure definition JSON")?;

        Ok(file)
    }

    /// Every problem found in the definition, as dotted-path messages.
    ///
    /// Steps are instantiated to check their arguments, so factories with
    /// side effects run here too.
    pub fn problems(&self, registry: &StepRegistry) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("procedure name must not be empty".to_string());
        }
        collect_problems(&self.procedure, &mut Vec::new(), registry, &mut problems);
        problems
    }

    /// Check the definition against `registry`.
    ///
    /// Advisory only: running an invalid definition still works and reports
    /// the faulty levels in the result tree.
    pub fn validate(&self, registry: &StepRegistry) -> crate::error::Result<()> {
        let problems = self.problems(registry);
        if problems.is_empty() {
            return Ok(());
        }
        Err(ProcrunnerError::definition(problems.join("; ")))
    }
}

fn here(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(crate::path::SEPARATOR)
    }
}

fn collect_problems(
    procedure: &Procedure,
    path: &mut Vec<String>,
    registry: &StepRegistry,
    problems: &mut Vec<String>,
) {
    let mut seen = HashSet::new();

    for entry in procedure.entries() {
        if let Some(id) = entry.id() {
            if id.trim().is_empty() {
                problems.push(format!("{}: empty step id", here(path)));
            } else if !seen.insert(id) {
                problems.push(format!("{}: duplicate id '{id}'", here(path)));
            }
        }

        match entry {
            Entry::Procedure { id, procedure } => {
                path.push(id.clone());
                collect_problems(procedure, path, registry, problems);
                path.pop();
            }
            Entry::Step {
                id,
                step_type,
                args,
            } => {
                path.push(id.clone());
                if !registry.contains(step_type) {
                    problems.push(format!("{}: unknown step type '{step_type}'", here(path)));
                } else if let Err(err) = registry.build(step_type, args, path) {
                    problems.push(format!("{}: {err}", here(path)));
                }
                path.pop();
            }
            Entry::Malformed { reason, .. } => {
                problems.push(format!("{}: {reason}", here(path)));
            }
        }
    }
}
