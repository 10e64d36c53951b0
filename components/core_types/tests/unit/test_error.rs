//! Unit tests for error classification

use core_types::{ErrorSeverity, Severity};

#[derive(Debug)]
enum SampleError {
    Corrupt,
    Busy,
}

impl Severity for SampleError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            SampleError::Corrupt => ErrorSeverity::Fatal,
            SampleError::Busy => ErrorSeverity::Recoverable,
        }
    }
}

#[test]
fn test_fatal_classification() {
    assert!(SampleError::Corrupt.is_fatal());
    assert!(!SampleError::Busy.is_fatal());
}

#[test]
fn test_severity_is_fatal() {
    assert!(ErrorSeverity::Fatal.is_fatal());
    assert!(!ErrorSeverity::Recoverable.is_fatal());
}
