//! Path stack tracking
//!
//! The path stack is the list of procedure/step ids from the run root down
//! to the node currently executing. Joined with `.` it forms the key under
//! which measured values are stored.
//!
//! Pushes go through [`PathGuard`], which pops its id on drop so the stack
//! stays balanced on every exit path.

use std::fmt;
use std::ops::{Deref, DerefMut};

/// Separator used when joining path segments
pub const SEPARATOR: &str = ".";

/// Ordered ids from the run root to the current node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathStack {
    segments: Vec<String>,
}

impl PathStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `id` for the lifetime of the returned guard.
    pub fn enter(&mut self, id: impl Into<String>) -> PathGuard<'_> {
        self.segments.push(id.into());
        PathGuard { stack: self }
    }

    /// Dotted form of the whole stack (`audio.left.rms`)
    pub fn joined(&self) -> String {
        self.segments.join(SEPARATOR)
    }

    /// Dotted form of everything but the last segment
    pub fn parent(&self) -> String {
        match self.segments.split_last() {
            Some((_, parent)) => parent.join(SEPARATOR),
            None => String::new(),
        }
    }

    /// Last segment, i.e. the id of the node currently executing
    pub fn current(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for PathStack {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl Deref for PathStack {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for PathStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.joined())
        }
    }
}

/// Scoped push on a [`PathStack`]; pops on drop.
#[derive(Debug)]
pub struct PathGuard<'a> {
    stack: &'a mut PathStack,
}

impl Deref for PathGuard<'_> {
    type Target = PathStack;

    fn deref(&self) -> &PathStack {
        self.stack
    }
}

impl DerefMut for PathGuard<'_> {
    fn deref_mut(&mut self) -> &mut PathStack {
        self.stack
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.stack.segments.pop();
    }
}
