//! Aggregating validator.
//!
//! Rules are checked exhaustively so a caller can fix every problem in one pass.

use xnat_jupyter_core::{Scope, ScopeEngine, ScopeMap};

use crate::error::{ComputeError, Result};

/// Collects rule violations for one record.
#[derive(Debug)]
pub struct Violations {
    kind: &'static str,
    errors: Vec<String>,
}

impl Violations {
    /// Start validating a record of the given kind.
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            errors: Vec::new(),
        }
    }

    /// Record `message` unless `ok` holds.
    pub fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.errors.push(message.into());
        }
    }

    /// Record `message` when `value` is empty or whitespace.
    pub fn not_blank(&mut self, value: &str, message: impl Into<String>) {
        self.check(!value.trim().is_empty(), message);
    }

    /// Check that `scopes` is non-empty and defines every dimension `engine` requires.
    pub fn scopes(&mut self, engine: &ScopeEngine, scopes: &ScopeMap) {
        if scopes.is_empty() {
            self.errors.push("must have at least one scope".to_string());
            return;
        }
        for scope in engine.missing_scopes(scopes) {
            self.errors.push(format!("must have a {} scope", label(scope)));
        }
    }

    /// Finish, returning every collected violation as one error.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` if any rule was violated.
    pub fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ComputeError::Validation {
                kind: self.kind,
                violations: self.errors,
            })
        }
    }
}

const fn label(scope: Scope) -> &'static str {
    match scope {
        Scope::Site => "site",
        Scope::Project => "project",
        Scope::User => "user",
        Scope::DataType => "data type",
    }
}
