//! Test-failure channel.
//!
//! Nothing that goes wrong while serving a request aborts the router. Each
//! problem becomes a [`Failure`] handed to the router's [`Reporter`]; the
//! default [`FailureLog`] keeps them so a test can assert on them.

use parking_lot::RwLock;
use std::fmt;
use tracing::error;

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No matcher's predicate chain passed.
    Unmatched,
    /// The request does not conform to the contract.
    RequestViolation,
    /// The response does not conform to the contract.
    ResponseViolation,
    /// A contract-driven response could not be produced.
    Synthesis,
    /// A handler could not produce its response.
    Handler,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Unmatched => "unmatched request",
            FailureKind::RequestViolation => "request violation",
            FailureKind::ResponseViolation => "response violation",
            FailureKind::Synthesis => "synthesis error",
            FailureKind::Handler => "handler error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rift-stub {}: {}", self.kind, self.message)
    }
}

/// Receiver of per-request failures.
pub trait Reporter: Send + Sync {
    fn report(&self, failure: Failure);

    /// Failures collected so far, if this reporter keeps them.
    fn failures(&self) -> Vec<Failure> {
        Vec::new()
    }

    fn clear(&self) {}
}

/// Default reporter: logs every failure and keeps it in arrival order.
#[derive(Default)]
pub struct FailureLog {
    failures: RwLock<Vec<Failure>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for FailureLog {
    fn report(&self, failure: Failure) {
        error!("{}", failure);
        self.failures.write().push(failure);
    }

    fn failures(&self) -> Vec<Failure> {
        self.failures.read().clone()
    }

    fn clear(&self) {
        self.failures.write().clear();
    }
}
