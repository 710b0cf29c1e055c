//! OpenAPI 3 contract support.
//!
//! - [`loader`]: read a document from a path, URL or bytes, decode it into
//!   `openapiv3` types and resolve its references
//! - [`model`]: operations, responses and media types with route lookup
//! - [`schema`]: schema constraints flattened for generation and validation
//! - [`validate`]: request and response conformance checks

pub mod loader;
pub mod model;
pub mod schema;
pub mod validate;

pub use loader::{from_openapi, load, parse};
pub use model::{
    Contract, MediaSpec, Operation, Parameter, ParameterLocation, RequestBody, ResponseSpec,
    RouteMatch,
};
pub use schema::{Pattern, Schema, SchemaRegistry};
pub use validate::Violation;
