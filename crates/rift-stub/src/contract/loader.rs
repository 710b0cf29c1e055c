//! Contract loading: fetch, decode into `openapiv3`, structural checks,
//! reference resolution.

use super::model::{
    Contract, MediaSpec, Operation, Parameter, ParameterLocation, RequestBody, ResponseSpec,
};
use super::schema::{Schema, SchemaRegistry};
use crate::config::ContractSource;
use crate::error::ContractError;
use openapiv3::{Components, OpenAPI, ParameterSchemaOrContent, ReferenceOr, StatusCode};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Upper bound on `$ref -> $ref` hops for parameters, bodies and responses.
const MAX_REF_HOPS: usize = 32;

/// Load a contract from any [`ContractSource`].
pub async fn load(
    source: &ContractSource,
    skip_circular_reference_check: bool,
) -> Result<Contract, ContractError> {
    let data = match source {
        ContractSource::Path(path) => tokio::fs::read(path)
            .await
            .map_err(|e| ContractError::Io(path.display().to_string(), e))?,
        ContractSource::Url(url) => fetch(url).await?,
        ContractSource::Bytes(bytes) => bytes.clone(),
    };
    let contract = parse(&data, skip_circular_reference_check)?;
    info!(
        "Loaded OpenAPI {} contract from {} ({} operations)",
        contract.version(),
        source.describe(),
        contract.operations().len()
    );
    Ok(contract)
}

async fn fetch(url: &str) -> Result<Vec<u8>, ContractError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| ContractError::Fetch(url.to_string(), e.to_string()))?;
    if !response.status().is_success() {
        return Err(ContractError::Fetch(
            url.to_string(),
            format!("unexpected status {}", response.status()),
        ));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ContractError::Fetch(url.to_string(), e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Decode a JSON or YAML document and build the contract.
pub fn parse(data: &[u8], skip_circular_reference_check: bool) -> Result<Contract, ContractError> {
    let mut doc: Value = match serde_json::from_slice(data) {
        Ok(doc) => doc,
        Err(_) => {
            // through serde_yaml::Value so unquoted numeric keys like `200:` become strings
            let yaml: serde_yaml::Value =
                serde_yaml::from_slice(data).map_err(|e| ContractError::Parse(e.to_string()))?;
            serde_json::to_value(yaml).map_err(|e| ContractError::Parse(e.to_string()))?
        }
    };
    check_structure(&mut doc)?;
    normalize_schema_keywords(&mut doc);
    let spec: OpenAPI =
        serde_json::from_value(doc).map_err(|e| ContractError::Parse(e.to_string()))?;
    from_openapi(&spec, skip_circular_reference_check)
}

/// Reject documents that are not OpenAPI 3 before the typed decode, which
/// would only report a missing field.
fn check_structure(doc: &mut Value) -> Result<(), ContractError> {
    let root = doc
        .as_object_mut()
        .ok_or_else(|| ContractError::Structure("document root must be a mapping".to_string()))?;

    let version = match root.get("openapi") {
        Some(Value::String(v)) => v.clone(),
        Some(other) => other.to_string(),
        None => {
            return Err(ContractError::Structure(
                "missing 'openapi' version field".to_string(),
            ))
        }
    };
    if !version.starts_with("3.") {
        return Err(ContractError::Structure(format!(
            "unsupported OpenAPI version '{version}', expected 3.x"
        )));
    }
    // an unquoted YAML `openapi: 3.0` arrives as a number
    root.insert("openapi".to_string(), Value::String(version));

    if !root.get("paths").is_some_and(Value::is_object) {
        return Err(ContractError::Structure("missing 'paths' mapping".to_string()));
    }
    Ok(())
}

/// Keywords whose values are instance data, never schemas.
const OPAQUE_KEYWORDS: [&str; 4] = ["example", "examples", "enum", "const"];

const EXCLUSIVE_BOUNDS: [(&str, &str); 2] = [
    ("exclusiveMinimum", "minimum"),
    ("exclusiveMaximum", "maximum"),
];

/// Rewrite OpenAPI 3.1 schema spellings into the 3.0 forms `openapiv3`
/// decodes: `type: [T, "null"]` becomes `type: T` plus `nullable`, and a
/// numeric `exclusiveMinimum`/`exclusiveMaximum` becomes the bound plus a flag.
pub(crate) fn normalize_schema_keywords(node: &mut Value) {
    normalize(node, false);
}

/// `names` marks a map keyed by property names rather than keywords.
fn normalize(node: &mut Value, names: bool) {
    match node {
        Value::Object(map) => {
            if !names {
                rewrite_type_list(map);
                for (keyword, bound) in EXCLUSIVE_BOUNDS {
                    if let Some(limit) = map.get(keyword).filter(|v| v.is_number()).cloned() {
                        map.insert(bound.to_string(), limit);
                        map.insert(keyword.to_string(), Value::Bool(true));
                    }
                }
            }
            for (key, child) in map.iter_mut() {
                if !names && OPAQUE_KEYWORDS.contains(&key.as_str()) {
                    continue;
                }
                normalize(child, !names && key == "properties");
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize(item, false);
            }
        }
        _ => {}
    }
}

fn rewrite_type_list(map: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = map.get("type") else {
        return;
    };
    let nullable = types.iter().any(|t| t == "null");
    let first = types
        .iter()
        .filter_map(Value::as_str)
        .find(|t| *t != "null")
        .map(str::to_string);
    match first {
        Some(t) => map.insert("type".to_string(), Value::String(t)),
        None => map.remove("type"),
    };
    if nullable {
        map.insert("nullable".to_string(), Value::Bool(true));
    }
}

/// Build a contract from a decoded `openapiv3` document.
pub fn from_openapi(
    spec: &OpenAPI,
    skip_circular_reference_check: bool,
) -> Result<Contract, ContractError> {
    let components = spec.components.as_ref();

    let mut operations = Vec::new();
    for (path, item) in &spec.paths.paths {
        let item = match item {
            ReferenceOr::Item(item) => item,
            ReferenceOr::Reference { reference } => {
                return Err(ContractError::UnresolvedRef(reference.clone()))
            }
        };
        let shared_params = parameters(components, &item.parameters)?;
        let methods = [
            ("GET", &item.get),
            ("PUT", &item.put),
            ("POST", &item.post),
            ("DELETE", &item.delete),
            ("OPTIONS", &item.options),
            ("HEAD", &item.head),
            ("PATCH", &item.patch),
            ("TRACE", &item.trace),
        ];
        for (method, op) in methods {
            if let Some(op) = op {
                operations.push(operation(components, method, path, op, &shared_params)?);
            }
        }
    }

    let registry = build_registry(components, &operations)?;
    if skip_circular_reference_check {
        debug!("Skipping circular reference check");
    } else {
        check_cycles(&registry)?;
    }

    let server_prefixes = spec
        .servers
        .iter()
        .filter_map(|server| server_path(&server.url))
        .collect();

    Ok(Contract::new(
        spec.openapi.clone(),
        operations,
        server_prefixes,
        registry,
    ))
}

fn operation(
    components: Option<&Components>,
    method: &str,
    path: &str,
    op: &openapiv3::Operation,
    shared_params: &[Parameter],
) -> Result<Operation, ContractError> {
    // operation-level parameters override path-level ones with the same name and location
    let own_params = parameters(components, &op.parameters)?;
    let mut params: Vec<Parameter> = shared_params
        .iter()
        .filter(|shared| {
            !own_params
                .iter()
                .any(|p| p.name == shared.name && p.location == shared.location)
        })
        .cloned()
        .collect();
    params.extend(own_params);

    let request_body = match &op.request_body {
        Some(node) => {
            let body = resolve(node, "requestBodies", |name| {
                components.and_then(|c| c.request_bodies.get(name))
            })?;
            Some(RequestBody {
                required: body.required,
                content: content(components, &body.content)?,
            })
        }
        None => None,
    };

    let mut responses = Vec::new();
    let declared = op
        .responses
        .responses
        .iter()
        .map(|(code, node)| (status_key(code), node))
        .chain(
            op.responses
                .default
                .iter()
                .map(|node| ("default".to_string(), node)),
        );
    for (code, node) in declared {
        let response = resolve(node, "responses", |name| {
            components.and_then(|c| c.responses.get(name))
        })?;
        responses.push((
            code,
            ResponseSpec {
                content: content(components, &response.content)?,
            },
        ));
    }

    Ok(Operation {
        method: method.to_string(),
        path: path.to_string(),
        operation_id: op.operation_id.clone(),
        parameters: params,
        request_body,
        responses,
    })
}

fn status_key(code: &StatusCode) -> String {
    match code {
        StatusCode::Code(c) => c.to_string(),
        StatusCode::Range(r) => format!("{r}XX"),
    }
}

fn parameters(
    components: Option<&Components>,
    list: &[ReferenceOr<openapiv3::Parameter>],
) -> Result<Vec<Parameter>, ContractError> {
    let mut out = Vec::with_capacity(list.len());
    for node in list {
        let param = resolve(node, "parameters", |name| {
            components.and_then(|c| c.parameters.get(name))
        })?;
        let (data, location) = match param {
            openapiv3::Parameter::Query { parameter_data, .. } => {
                (parameter_data, ParameterLocation::Query)
            }
            openapiv3::Parameter::Header { parameter_data, .. } => {
                (parameter_data, ParameterLocation::Header)
            }
            openapiv3::Parameter::Path { parameter_data, .. } => {
                (parameter_data, ParameterLocation::Path)
            }
            openapiv3::Parameter::Cookie { parameter_data, .. } => {
                (parameter_data, ParameterLocation::Cookie)
            }
        };
        // `content` is the alternative to `schema` for complex parameters
        let schema = match &data.format {
            ParameterSchemaOrContent::Schema(schema) => Some(Schema::from_openapi(schema)),
            ParameterSchemaOrContent::Content(content) => content
                .values()
                .next()
                .and_then(|media| media.schema.as_ref())
                .map(Schema::from_openapi),
        };
        out.push(Parameter {
            name: data.name.clone(),
            location,
            // path parameters are always required
            required: location == ParameterLocation::Path || data.required,
            schema,
        });
    }
    Ok(out)
}

fn content(
    components: Option<&Components>,
    declared: &openapiv3::Content,
) -> Result<Vec<(String, MediaSpec)>, ContractError> {
    let mut out = Vec::with_capacity(declared.len());
    for (content_type, media) in declared {
        let mut examples: Vec<Value> = media.example.iter().cloned().collect();
        for node in media.examples.values() {
            let example = resolve(node, "examples", |name| {
                components.and_then(|c| c.examples.get(name))
            })?;
            if let Some(value) = &example.value {
                examples.push(value.clone());
            }
        }
        out.push((
            content_type.clone(),
            MediaSpec {
                schema: media.schema.as_ref().map(Schema::from_openapi),
                examples,
            },
        ));
    }
    Ok(out)
}

/// Follow `$ref` through one `components` section until an item is reached.
fn resolve<'a, T>(
    node: &'a ReferenceOr<T>,
    section: &str,
    lookup: impl Fn(&str) -> Option<&'a ReferenceOr<T>>,
) -> Result<&'a T, ContractError> {
    let mut current = node;
    for _ in 0..MAX_REF_HOPS {
        match current {
            ReferenceOr::Item(item) => return Ok(item),
            ReferenceOr::Reference { reference } => {
                current = component_name(reference, section)
                    .and_then(|name| lookup(&name))
                    .ok_or_else(|| ContractError::UnresolvedRef(reference.clone()))?;
            }
        }
    }
    let start = match node {
        ReferenceOr::Reference { reference } => reference.as_str(),
        ReferenceOr::Item(_) => "?",
    };
    Err(ContractError::CircularReference(format!(
        "reference chain starting at {start}"
    )))
}

/// Component name addressed by `#/components/<section>/<name>`, unescaped.
fn component_name(reference: &str, section: &str) -> Option<String> {
    let name = reference
        .strip_prefix("#/components/")?
        .strip_prefix(section)?
        .strip_prefix('/')?;
    Some(name.replace("~1", "/").replace("~0", "~"))
}

fn schema_ref(name: &str) -> String {
    format!(
        "#/components/schemas/{}",
        name.replace('~', "~0").replace('/', "~1")
    )
}

/// Flatten `components.schemas` keyed by reference string, then make sure
/// every `$ref` used anywhere lands on one of them.
fn build_registry(
    components: Option<&Components>,
    operations: &[Operation],
) -> Result<SchemaRegistry, ContractError> {
    let mut registry = SchemaRegistry::new();
    if let Some(components) = components {
        for (name, node) in &components.schemas {
            registry.insert(schema_ref(name), Schema::from_openapi(node));
        }
    }

    let mut used: Vec<&str> = Vec::new();
    for op in operations {
        let schemas = op
            .parameters
            .iter()
            .filter_map(|p| p.schema.as_ref())
            .chain(
                op.request_body
                    .iter()
                    .flat_map(|b| b.content.iter())
                    .filter_map(|(_, m)| m.schema.as_ref()),
            )
            .chain(
                op.responses
                    .iter()
                    .flat_map(|(_, r)| r.content.iter())
                    .filter_map(|(_, m)| m.schema.as_ref()),
            );
        for schema in schemas {
            used.extend(schema.direct_refs());
        }
    }
    for (_, schema) in registry.references() {
        used.extend(schema.direct_refs());
    }
    if let Some(missing) = used.into_iter().find(|r| !registry.contains(r)) {
        return Err(ContractError::UnresolvedRef(missing.to_string()));
    }
    Ok(registry)
}

/// Reject reference cycles such as `A -> B -> A`.
fn check_cycles(registry: &SchemaRegistry) -> Result<(), ContractError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        reference: &'a str,
        registry: &'a SchemaRegistry,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), ContractError> {
        match marks.get(reference) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|r| *r == reference).unwrap_or(0);
                let mut chain: Vec<&str> = stack[start..].to_vec();
                chain.push(reference);
                return Err(ContractError::CircularReference(chain.join(" -> ")));
            }
            None => {}
        }
        marks.insert(reference, Mark::Visiting);
        stack.push(reference);
        if let Some(schema) = registry.get(reference) {
            for next in schema.direct_refs() {
                visit(next, registry, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(reference, Mark::Done);
        Ok(())
    }

    // sorted for a stable error message
    let roots: BTreeSet<&str> = registry.references().map(|(r, _)| r.as_str()).collect();
    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for root in roots {
        visit(root, registry, &mut marks, &mut stack)?;
    }
    Ok(())
}

/// Path component of a `servers[].url`, if it has a non-root one.
fn server_path(url: &str) -> Option<String> {
    let path = match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            rest.find('/').map(|j| &rest[j..]).unwrap_or("")
        }
        None => url,
    };
    let path = path.trim_end_matches('/');
    (path.starts_with('/') && path.len() > 1).then(|| path.to_string())
}
