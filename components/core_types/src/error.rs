//! Error classification shared across the runtime components.
//!
//! Errors raised while reconstructing frames are either contract violations
//! between the compiler, the code generator and the deoptimizer, or transient
//! resource shortages. Each component's error type reports which through
//! [`Severity`].

use serde::{Deserialize, Serialize};

/// How an error must be handled by the owning execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Continuing would run on corrupted frame state; the context is aborted.
    Fatal,
    /// The operation may be retried (e.g. after a garbage collection).
    Recoverable,
}

impl ErrorSeverity {
    /// Returns true for [`ErrorSeverity::Fatal`].
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorSeverity::Fatal)
    }
}

/// Implemented by error types that participate in abort decisions.
pub trait Severity {
    /// Classifies this error.
    fn severity(&self) -> ErrorSeverity;

    /// Shorthand for `self.severity().is_fatal()`.
    fn is_fatal(&self) -> bool {
        self.severity().is_fatal()
    }
}
