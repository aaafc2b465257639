//! Per-run shared state
//!
//! A [`RunContext`] is created once per top-level run and threaded by
//! `&mut` through every recursive level and every step. It holds:
//!
//! - the [`PathStack`] of the node currently executing
//! - the [`ValueStore`] used to pass measured values between steps
//! - the [`ErrorLog`], a flat record of every error raised during the run
//!
//! Execution is single-threaded; none of these types synchronize.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ProcedureError;
use crate::path::{PathStack, SEPARATOR};

/// Placeholder replaced at lookup time by the current parent path (plus a
/// trailing separator when that path is not empty).
pub const PLACEHOLDER: char = '^';

/// Values stored by measures, keyed by dotted step path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueStore {
    values: BTreeMap<String, Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every stored value.
    ///
    /// Meant for tests and tooling; steps should not rely on it mid-run.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Store `value` under the dotted form of `path`.
    pub fn set(&mut self, path: &[String], value: Value) {
        self.values.insert(path.join(SEPARATOR), value);
    }

    /// Expand the `^` placeholder in `key` relative to `path`.
    ///
    /// With a current path of `audio.left.rms`, `^record` becomes
    /// `audio.left.record`. At the root level no separator is added.
    pub fn resolve_key(key: &str, path: &PathStack) -> String {
        let parent = path.parent();
        let prefix = if parent.is_empty() {
            parent
        } else {
            format!("{parent}{SEPARATOR}")
        };
        key.replace(PLACEHOLDER, &prefix)
    }

    /// Look up `key` (after placeholder expansion relative to `path`).
    ///
    /// # Errors
    ///
    /// A missing key is an `Unexpected` error raised at `path`.
    pub fn get(&self, key: &str, path: &PathStack) -> Result<&Value, ProcedureError> {
        let resolved = Self::resolve_key(key, path);
        self.values.get(&resolved).ok_or_else(|| {
            ProcedureError::unexpected(format!("no stored value for key '{resolved}'"), path)
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over stored values in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One entry of the flat error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub path: Vec<String>,
    pub error: ProcedureError,
}

/// Ordered, append-only log of every error raised during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorLog {
    records: Vec<ErrorRecord>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `error`, raised at `path`.
    pub fn register(&mut self, path: &[String], error: ProcedureError) {
        self.records.push(ErrorRecord {
            path: path.to_vec(),
            error,
        });
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ErrorRecord> {
        self.records
    }
}

/// Mutable state shared by every level of one run.
#[derive(Debug, Default)]
pub struct RunContext {
    pub path: PathStack,
    pub errors: ErrorLog,
    pub values: ValueStore,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }
}
