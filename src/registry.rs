//! the operation vocabulary against which capabilities are validated.
//!
//! the registry is an explicit configuration value, passed by reference into
//! every parse and mutation that needs to validate raw operation names. there
//! is no global state; two registries can coexist with different
//! vocabularies. changing a registry never re-validates capabilities that
//! were built against an earlier snapshot of it.

use serde::{Deserialize, Serialize};

/// the baseline operation vocabulary.
pub const DEFAULT_OPERATIONS: &[&str] = &["read", "write", "delete", "destroy"];

/// an ordered set of valid operation names.
///
/// names are case-sensitive, non-empty and unique; insertion order is
/// preserved and is the order [`Capability::remove`](crate::Capability::remove)
/// materialises the complement of "any" in.
///
/// # Example
/// ```
/// use capgrants::OperationRegistry;
///
/// let mut registry = OperationRegistry::new();
/// assert_eq!(registry.operations(), ["read", "write", "delete", "destroy"]);
///
/// registry.add("publish");
/// assert!(registry.is_valid("publish"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRegistry {
    operations: Vec<String>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self {
            operations: DEFAULT_OPERATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl OperationRegistry {
    /// create a registry with the default vocabulary
    /// (`read`, `write`, `delete`, `destroy`).
    pub fn new() -> Self {
        Self::default()
    }

    /// create a registry with the given vocabulary.
    ///
    /// empty names are dropped; for duplicates the first occurrence wins.
    pub fn with_operations<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self { operations: vec![] };
        registry.set(operations);
        registry
    }

    /// replace the vocabulary wholesale.
    pub fn set<I, S>(&mut self, operations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations.clear();
        for op in operations {
            self.add(op);
        }
    }

    /// append an operation if absent; no-op if already present or empty.
    pub fn add(&mut self, operation: impl Into<String>) {
        let operation = operation.into();
        if !operation.is_empty() && !self.operations.contains(&operation) {
            self.operations.push(operation);
        }
    }

    /// remove an operation from the vocabulary.
    pub fn remove(&mut self, operation: &str) {
        self.operations.retain(|op| op != operation);
    }

    /// the current vocabulary, order-preserving.
    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    /// true if `operation` is in the vocabulary (exact, case-sensitive match).
    pub fn is_valid(&self, operation: &str) -> bool {
        self.operations.iter().any(|op| op == operation)
    }

    /// true iff every registry operation is present in `candidate`
    /// (candidate ⊇ vocabulary).
    ///
    /// this is the any-collapse test: a capability whose operation set covers
    /// the full vocabulary is indistinguishable from one allowing "any".
    pub fn has_all<S: AsRef<str>>(&self, candidate: &[S]) -> bool {
        self.operations
            .iter()
            .all(|op| candidate.iter().any(|c| c.as_ref() == op))
    }

    /// the first name in `candidate` that is not in the vocabulary, if any.
    pub fn first_invalid<'a, S: AsRef<str>>(&self, candidate: &'a [S]) -> Option<&'a str> {
        candidate
            .iter()
            .map(|c| c.as_ref())
            .find(|c| !self.is_valid(c))
    }
}
