//! Rift stub: a programmable HTTP test double.
//!
//! Register matchers on a [`Router`], start it, and point the code under
//! test at [`Router::url`]. With an OpenAPI 3 contract loaded, responses can
//! be served from declared examples or synthesized from schemas, and every
//! exchange is checked against the contract.

// ===== Dispatch =====
pub mod matcher;
pub mod middleware;
pub mod request;
pub mod responder;
pub mod response;
pub mod router;
pub mod server;

// ===== Contract-driven responses =====
pub mod contract;
pub mod generate;
pub mod synthesize;

// ===== Support =====
pub mod config;
pub mod error;
pub mod glob;
pub mod reporter;
pub mod rng;
pub mod tls;

pub use config::{ContractSource, PemPair, ResponseMode, StubOptions};
pub use error::{ContractError, GenerateError, StubError, SynthesisError};
pub use matcher::{Matcher, Predicate};
pub use middleware::{compose, handler, header_middleware, middleware, Handler, Middleware};
pub use reporter::{Failure, FailureKind, FailureLog, Reporter};
pub use request::StubRequest;
pub use responder::Responder;
pub use response::StubResponse;
pub use router::Router;
pub use server::{new_server, new_tls_server};
