//! Error types for the stub router.
//!
//! Setup problems surface as [`StubError`] before any traffic is accepted.
//! Per-request problems ([`SynthesisError`], contract violations, unmatched
//! requests) are reported through the failure channel instead.

/// Errors raised while loading or resolving a contract document.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("failed to read contract '{0}': {1}")]
    Io(String, std::io::Error),
    #[error("failed to fetch contract from {0}: {1}")]
    Fetch(String, String),
    #[error("failed to parse contract: {0}")]
    Parse(String),
    #[error("invalid contract document: {0}")]
    Structure(String),
    #[error("unresolved reference: {0}")]
    UnresolvedRef(String),
    #[error("circular reference detected: {0}")]
    CircularReference(String),
}

/// Errors raised by the schema-driven value generator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerateError {
    #[error("max generation depth exceeded at depth {0}")]
    DepthExceeded(usize),
    #[error("unsupported schema type: {0}")]
    UnsupportedType(String),
    #[error("unresolved schema reference: {0}")]
    UnresolvedRef(String),
    #[error("unsatisfiable schema constraints: {0}")]
    Unsatisfiable(String),
}

/// Errors raised while synthesizing a response from the contract.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("failed to find route for {method} {path}")]
    NoRoute { method: String, path: String },
    #[error("failed to find response matching pattern: {0}")]
    NoMatchingStatus(String),
    #[error("invalid status code: {0}")]
    InvalidStatus(String),
    #[error("failed to find example")]
    NoExample,
    #[error("failed to find schema")]
    NoSchema,
    #[error("failed to generate value: {0}")]
    Generate(#[from] GenerateError),
    #[error("failed to serialize body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while building, starting or driving a [`crate::Router`].
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("invalid base path '{0}': must start with '/' and must not end with '/'")]
    InvalidBasePath(String),
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("no OpenAPI v3 document is set")]
    NoContract,
    #[error("server is not started yet")]
    ServerNotStarted,
    #[error("server is already started")]
    ServerAlreadyStarted,
    #[error("failed to build client: {0}")]
    Client(String),
    #[error("failed to load options: {0}")]
    Options(String),
    #[error("request did not match: {method} {path}")]
    Unmatched { method: String, path: String },
}
