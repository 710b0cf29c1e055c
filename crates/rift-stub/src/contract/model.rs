//! Loaded contract: operations, media types and route lookup.

use super::schema::{Schema, SchemaRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Where a parameter is carried in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Query => "query",
            ParameterLocation::Header => "header",
            ParameterLocation::Cookie => "cookie",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Option<Schema>,
}

/// Schema and examples declared for one content type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSpec {
    pub schema: Option<Schema>,
    /// `example` first, then every `examples.*.value`, in declaration order.
    pub examples: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBody {
    pub required: bool,
    pub content: Vec<(String, MediaSpec)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSpec {
    /// Content types in declaration order.
    pub content: Vec<(String, MediaSpec)>,
}

impl ResponseSpec {
    pub fn media(&self, content_type: &str) -> Option<&MediaSpec> {
        find_media(&self.content, content_type)
    }
}

/// Find the media entry for `content_type`, honoring `type/*` and `*/*`
/// declarations. Parameters such as `; charset=utf-8` are ignored.
pub(crate) fn find_media<'a>(
    content: &'a [(String, MediaSpec)],
    content_type: &str,
) -> Option<&'a MediaSpec> {
    let wanted = essence(content_type);
    content
        .iter()
        .find(|(declared, _)| essence(declared) == wanted)
        .or_else(|| {
            content.iter().find(|(declared, _)| {
                let declared = essence(declared);
                declared == "*/*"
                    || declared
                        .strip_suffix("/*")
                        .is_some_and(|major| wanted.split('/').next() == Some(major))
            })
        })
        .map(|(_, media)| media)
}

/// Media type without parameters, lowercased.
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// One `{method, path}` entry of the contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Uppercase HTTP method.
    pub method: String,
    /// Path template as declared, e.g. `/users/{id}`.
    pub path: String,
    pub operation_id: Option<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    /// Status keys (`"200"`, `"4XX"`, `"default"`) in declaration order.
    pub responses: Vec<(String, ResponseSpec)>,
}

impl Operation {
    pub fn response(&self, status: &str) -> Option<&ResponseSpec> {
        self.responses
            .iter()
            .find(|(code, _)| code == status)
            .map(|(_, spec)| spec)
    }

    /// Response declared for a concrete status code, falling back to the
    /// `NXX` range and then to `default`.
    pub fn response_for_status(&self, status: u16) -> Option<&ResponseSpec> {
        let exact = status.to_string();
        let range = format!("{}XX", status / 100);
        self.response(&exact)
            .or_else(|| {
                self.responses
                    .iter()
                    .find(|(code, _)| code.eq_ignore_ascii_case(&range))
                    .map(|(_, spec)| spec)
            })
            .or_else(|| self.response("default"))
    }
}

/// A resolved route: the operation plus the path parameters bound by the template.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub operation: &'a Operation,
    pub path_params: Vec<(String, String)>,
}

impl RouteMatch<'_> {
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A loaded OpenAPI 3 document.
pub struct Contract {
    pub(crate) version: String,
    pub(crate) operations: Vec<Operation>,
    /// Per-method radix tries over path templates; values index `operations`.
    pub(crate) routes: HashMap<String, matchit::Router<usize>>,
    /// Operations whose template the trie rejected (conflicting parameter names).
    pub(crate) fallback: Vec<usize>,
    /// Path components of `servers[].url`, without trailing slash.
    pub(crate) server_prefixes: Vec<String>,
    pub(crate) registry: SchemaRegistry,
}

impl Contract {
    pub(crate) fn new(
        version: String,
        operations: Vec<Operation>,
        server_prefixes: Vec<String>,
        registry: SchemaRegistry,
    ) -> Self {
        let mut routes: HashMap<String, matchit::Router<usize>> = HashMap::new();
        let mut fallback = Vec::new();
        for (index, op) in operations.iter().enumerate() {
            let router = routes
                .entry(op.method.clone())
                .or_insert_with(matchit::Router::new);
            if router.insert(op.path.as_str(), index).is_err() {
                fallback.push(index);
            }
        }
        Self {
            version,
            operations,
            routes,
            fallback,
            server_prefixes,
            registry,
        }
    }

    /// The declared `openapi` version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn server_prefixes(&self) -> &[String] {
        &self.server_prefixes
    }

    /// Find the operation for `method` and `path`.
    ///
    /// The path is tried as-is first, then with each declared server prefix removed.
    pub fn find_route(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        let method = method.to_ascii_uppercase();
        if let Some(found) = self.lookup(&method, path) {
            return Some(found);
        }
        self.server_prefixes.iter().find_map(|prefix| {
            let rest = path.strip_prefix(prefix.as_str())?;
            if rest.starts_with('/') {
                self.lookup(&method, rest)
            } else {
                None
            }
        })
    }

    fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        if let Some(router) = self.routes.get(method) {
            if let Ok(found) = router.at(path) {
                let path_params = found
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                return Some(RouteMatch {
                    operation: &self.operations[*found.value],
                    path_params,
                });
            }
        }
        self.fallback.iter().find_map(|&index| {
            let operation = &self.operations[index];
            if operation.method != method {
                return None;
            }
            match_template(&operation.path, path).map(|path_params| RouteMatch {
                operation,
                path_params,
            })
        })
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("version", &self.version)
            .field("operations", &self.operations.len())
            .field("server_prefixes", &self.server_prefixes)
            .finish()
    }
}

/// Segment-wise template match; `{name}` binds one non-empty segment.
fn match_template(template: &str, path: &str) -> Option<Vec<(String, String)>> {
    let template_segments: Vec<&str> = template.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if template_segments.len() != path_segments.len() {
        return None;
    }
    let mut params = Vec::new();
    for (t, p) in template_segments.iter().zip(&path_segments) {
        match t.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            Some(name) if !p.is_empty() => params.push((name.to_string(), p.to_string())),
            Some(_) => return None,
            None if t == p => {}
            None => return None,
        }
    }
    Some(params)
}
