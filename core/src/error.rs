//! Error taxonomy for a contract run.
//!
//! # Design
//! Every failure terminates the run, so the variants exist to tell a human or
//! CI log *what kind* of failure happened: a bad target, an unreachable
//! service, a response that could not be read, or a response that was read
//! fine but broke the contract. `ReadinessTimeout` is the only variant produced
//! after retrying.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while checking the simulator contract.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Bad base URL, empty flag or environment value, or a scheme the operation does
    /// not support.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection refused, reset, DNS failure or timeout.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The peer answered but the answer could not be interpreted (bad status
    /// line, non-JSON body where JSON was expected).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Status code or body shape differs from the contract.
    #[error("{step}: expected {expected}, got {observed}")]
    ContractViolation {
        step: String,
        expected: String,
        observed: String,
    },

    /// The info endpoint never became healthy before the deadline.
    #[error("simulator did not become ready after {attempts} attempts in {waited:?}: {last_error}")]
    ReadinessTimeout {
        attempts: u32,
        waited: Duration,
        last_error: String,
    },
}

impl CheckError {
    pub fn violation(
        step: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        CheckError::ContractViolation {
            step: step.into(),
            expected: expected.into(),
            observed: observed.into(),
        }
    }

    /// Process exit code for this failure. Configuration problems are
    /// distinguished from run failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            CheckError::Configuration(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_message_names_step_expected_and_observed() {
        let err = CheckError::violation("GET /api/v1/retropie", "200", "409");
        assert_eq!(err.to_string(), "GET /api/v1/retropie: expected 200, got 409");
    }

    #[test]
    fn readiness_timeout_carries_last_error() {
        let err = CheckError::ReadinessTimeout {
            attempts: 3,
            waited: Duration::from_millis(300),
            last_error: "unexpected status 503".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"), "{msg}");
        assert!(msg.ends_with("unexpected status 503"), "{msg}");
    }

    #[test]
    fn configuration_errors_exit_with_two() {
        assert_eq!(CheckError::Configuration("empty".into()).exit_code(), 2);
        assert_eq!(CheckError::Protocol("bad".into()).exit_code(), 1);
        assert_eq!(CheckError::violation("s", "a", "b").exit_code(), 1);
    }
}
