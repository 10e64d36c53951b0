//! Allocation errors

use core_types::{ErrorSeverity, HeapRef, Severity};
use thiserror::Error;

/// Errors raised by the heap.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    /// The heap stayed full after every permitted collection.
    #[error("out of memory: requested {requested} bytes with {used} of {capacity} in use after {retries} collections")]
    OutOfMemory {
        /// Bytes requested
        requested: usize,
        /// Bytes live after the last collection
        used: usize,
        /// Configured capacity
        capacity: usize,
        /// Collections attempted
        retries: u32,
    },
    /// A reference did not name a live object.
    #[error("dangling heap reference {0}")]
    Dangling(HeapRef),
}

impl Severity for AllocationError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Fatal
    }
}
