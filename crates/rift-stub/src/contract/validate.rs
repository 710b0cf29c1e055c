//! Conformance checks of observed traffic against the contract.
//!
//! Checks never fail hard: every problem becomes a [`Violation`] and the
//! caller decides how to report it.

use super::model::{essence, find_media, Contract, ParameterLocation, RouteMatch};
use super::schema::Schema;
use crate::request::{parse_query_pairs, StubRequest};
use hyper::header::CONTENT_TYPE;
use hyper::HeaderMap;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Where the problem was found, e.g. `query.page` or `body.items[2].id`.
    pub location: String,
    pub message: String,
}

impl Violation {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Join violations into one report line.
pub fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Contract {
    /// Validate parameters and body of a request against its route.
    pub fn validate_request(&self, route: &RouteMatch<'_>, req: &StubRequest) -> Vec<Violation> {
        let mut violations = Vec::new();
        let query = parse_query_pairs(req.query().unwrap_or(""));

        for param in &route.operation.parameters {
            let location = format!("{}.{}", param.location, param.name);
            let raw: Option<String> = match param.location {
                ParameterLocation::Path => route.path_param(&param.name).map(str::to_string),
                ParameterLocation::Query => query
                    .iter()
                    .find(|(k, _)| *k == param.name)
                    .map(|(_, v)| v.clone()),
                ParameterLocation::Header => req.header(&param.name).map(str::to_string),
                ParameterLocation::Cookie => cookie(req, &param.name),
            };
            match (raw, &param.schema) {
                (None, _) if param.required => {
                    violations.push(Violation::new(location, "required parameter is missing"));
                }
                (None, _) => {}
                (Some(raw), Some(schema)) => {
                    let value = self.coerce_parameter(schema, &raw);
                    self.check_value(schema, &value, &location, 0, &mut violations);
                }
                (Some(_), None) => {}
            }
        }

        if let Some(body_spec) = &route.operation.request_body {
            if req.body().is_empty() {
                if body_spec.required {
                    violations.push(Violation::new("body", "request body is required"));
                }
            } else if !body_spec.content.is_empty() {
                let content_type = req.header(CONTENT_TYPE.as_str()).unwrap_or("");
                match find_media(&body_spec.content, content_type) {
                    None => violations.push(Violation::new(
                        "body",
                        format!("content type '{content_type}' is not declared"),
                    )),
                    Some(media) => {
                        if let Some(schema) = &media.schema {
                            self.check_body(schema, content_type, req.body(), &mut violations);
                        }
                    }
                }
            }
        }

        violations
    }

    /// Validate status, content type and body of a response.
    pub fn validate_response(
        &self,
        route: &RouteMatch<'_>,
        status: u16,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        let Some(spec) = route.operation.response_for_status(status) else {
            violations.push(Violation::new(
                "status",
                format!("status {status} is not declared"),
            ));
            return violations;
        };
        if spec.content.is_empty() || body.is_empty() {
            return violations;
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        match find_media(&spec.content, content_type) {
            None => violations.push(Violation::new(
                "header.Content-Type",
                format!("content type '{content_type}' is not declared for status {status}"),
            )),
            Some(media) => {
                if let Some(schema) = &media.schema {
                    self.check_body(schema, content_type, body, &mut violations);
                }
            }
        }
        violations
    }

    /// Validate a decoded value against a schema.
    pub fn validate_value(&self, schema: &Schema, value: &Value) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_value(schema, value, "body", 0, &mut violations);
        violations
    }

    fn check_body(
        &self,
        schema: &Schema,
        content_type: &str,
        body: &[u8],
        violations: &mut Vec<Violation>,
    ) {
        // only JSON payloads are decoded
        if !essence(content_type).contains("json") {
            return;
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.check_value(schema, &value, "body", 0, violations),
            Err(e) => violations.push(Violation::new("body", format!("invalid JSON: {e}"))),
        }
    }

    fn coerce_parameter(&self, schema: &Schema, raw: &str) -> Value {
        let schema = self.registry.resolve(schema).unwrap_or(schema);
        match schema.schema_type.as_deref() {
            Some("integer") => raw
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            Some("number") => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(raw.to_string())),
            Some("boolean") => match raw {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(raw.to_string()),
            },
            Some("array") => {
                let item_schema = schema.items.as_deref();
                Value::Array(
                    raw.split(',')
                        .map(|item| match item_schema {
                            Some(s) => self.coerce_parameter(s, item),
                            None => Value::String(item.to_string()),
                        })
                        .collect(),
                )
            }
            _ => Value::String(raw.to_string()),
        }
    }

    fn check_value(
        &self,
        schema: &Schema,
        value: &Value,
        location: &str,
        depth: usize,
        out: &mut Vec<Violation>,
    ) {
        // cyclic schemas are bounded by the same ceiling the generator uses
        if depth > crate::generate::MAX_DEPTH * 4 {
            return;
        }
        let schema = match self.registry.resolve(schema) {
            Ok(schema) => schema,
            Err(e) => {
                out.push(Violation::new(location, e.to_string()));
                return;
            }
        };

        if value.is_null() {
            if !schema.nullable && schema.schema_type.is_some() {
                out.push(Violation::new(location, "value must not be null"));
            }
            return;
        }

        if let Some(allowed) = &schema.enumeration {
            if !allowed.iter().any(|a| a == value) {
                out.push(Violation::new(
                    location,
                    format!("value {value} is not one of the allowed values"),
                ));
            }
        }

        for sub in &schema.all_of {
            self.check_value(sub, value, location, depth + 1, out);
        }
        for (keyword, branches) in [("anyOf", &schema.any_of), ("oneOf", &schema.one_of)] {
            if branches.is_empty() {
                continue;
            }
            let passes = branches.iter().any(|sub| {
                let mut scratch = Vec::new();
                self.check_value(sub, value, location, depth + 1, &mut scratch);
                scratch.is_empty()
            });
            if !passes {
                out.push(Violation::new(
                    location,
                    format!("value does not match any {keyword} branch"),
                ));
            }
        }

        let Some(expected) = schema.schema_type.as_deref() else {
            self.check_object(schema, value, location, depth, out);
            return;
        };
        let type_ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !type_ok {
            out.push(Violation::new(
                location,
                format!("expected {expected}, got {}", type_name(value)),
            ));
            return;
        }

        match value {
            Value::String(s) => check_string(schema, s, location, out),
            Value::Number(n) => {
                if let Some(x) = n.as_f64() {
                    check_number(schema, x, location, out);
                }
            }
            Value::Array(items) => {
                if let Some(min) = schema.min_items {
                    if items.len() < min {
                        out.push(Violation::new(
                            location,
                            format!("expected at least {min} items, got {}", items.len()),
                        ));
                    }
                }
                if let Some(max) = schema.max_items {
                    if items.len() > max {
                        out.push(Violation::new(
                            location,
                            format!("expected at most {max} items, got {}", items.len()),
                        ));
                    }
                }
                if let Some(item_schema) = &schema.items {
                    for (i, item) in items.iter().enumerate() {
                        let item_location = format!("{location}[{i}]");
                        self.check_value(item_schema, item, &item_location, depth + 1, out);
                    }
                }
            }
            Value::Object(_) => self.check_object(schema, value, location, depth, out),
            _ => {}
        }
    }

    fn check_object(
        &self,
        schema: &Schema,
        value: &Value,
        location: &str,
        depth: usize,
        out: &mut Vec<Violation>,
    ) {
        let Some(object) = value.as_object() else {
            return;
        };
        for name in &schema.required {
            if !object.contains_key(name) {
                out.push(Violation::new(
                    format!("{location}.{name}"),
                    "required property is missing",
                ));
            }
        }
        for (name, prop_schema) in &schema.properties {
            if let Some(prop_value) = object.get(name) {
                let prop_location = format!("{location}.{name}");
                self.check_value(prop_schema, prop_value, &prop_location, depth + 1, out);
            }
        }
    }
}

fn check_string(schema: &Schema, s: &str, location: &str, out: &mut Vec<Violation>) {
    let len = s.chars().count();
    if let Some(min) = schema.min_length {
        if len < min {
            out.push(Violation::new(
                location,
                format!("length {len} is shorter than {min}"),
            ));
        }
    }
    if let Some(max) = schema.max_length {
        if len > max {
            out.push(Violation::new(
                location,
                format!("length {len} is longer than {max}"),
            ));
        }
    }
    // an invalid pattern in the contract is not the request's fault
    if let Some(pattern) = &schema.pattern {
        if pattern.regex().is_some_and(|re| !re.is_match(s)) {
            out.push(Violation::new(
                location,
                format!("'{s}' does not match pattern '{}'", pattern.as_str()),
            ));
        }
    }
}

fn check_number(schema: &Schema, x: f64, location: &str, out: &mut Vec<Violation>) {
    if let Some(min) = schema.minimum {
        if x < min || (schema.exclusive_minimum && x == min) {
            out.push(Violation::new(location, format!("{x} is below minimum {min}")));
        }
    }
    if let Some(max) = schema.maximum {
        if x > max || (schema.exclusive_maximum && x == max) {
            out.push(Violation::new(location, format!("{x} is above maximum {max}")));
        }
    }
    if let Some(m) = schema.multiple_of {
        let ratio = x / m;
        if (ratio - ratio.round()).abs() > 1e-9 {
            out.push(Violation::new(location, format!("{x} is not a multiple of {m}")));
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn cookie(req: &StubRequest, name: &str) -> Option<String> {
    req.headers()
        .get_all(hyper::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::parse;
    use serde_json::json;

    const USERS: &str = r##"
openapi: 3.0.3
info:
  title: users
  version: 1.0.0
paths:
  /users:
    get:
      parameters:
        - name: page
          in: query
          required: true
          schema:
            type: integer
            minimum: 1
      responses:
        '200':
          description: ok
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: '#/components/schemas/User'
    post:
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/User'
      responses:
        '201':
          description: created
components:
  schemas:
    User:
      type: object
      required: [id, name]
      properties:
        id:
          type: integer
        name:
          type: string
          minLength: 1
        handle:
          type: string
          pattern: '^@[a-z]+$'
        status:
          type: string
          enum: [active, inactive]
"##;

    fn contract() -> Contract {
        parse(USERS.as_bytes(), false).unwrap()
    }

    #[test]
    fn test_valid_request_has_no_violations() {
        let contract = contract();
        let req = StubRequest::from_parts("GET", "/users?page=2", "");
        let route = contract.find_route("GET", "/users").unwrap();
        assert!(contract.validate_request(&route, &req).is_empty());
    }

    #[test]
    fn test_missing_and_malformed_query_parameter() {
        let contract = contract();
        let route = contract.find_route("GET", "/users").unwrap();

        let missing = StubRequest::from_parts("GET", "/users", "");
        let violations = contract.validate_request(&route, &missing);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].location, "query.page");

        let malformed = StubRequest::from_parts("GET", "/users?page=abc", "");
        let violations = contract.validate_request(&route, &malformed);
        assert_eq!(violations[0].message, "expected integer, got string");

        let too_small = StubRequest::from_parts("GET", "/users?page=0", "");
        assert_eq!(contract.validate_request(&route, &too_small).len(), 1);
    }

    #[test]
    fn test_request_body_checks() {
        let contract = contract();
        let route = contract.find_route("POST", "/users").unwrap();

        let empty = StubRequest::from_parts("POST", "/users", "");
        assert_eq!(
            contract.validate_request(&route, &empty)[0].message,
            "request body is required"
        );

        let bad = StubRequest::from_parts("POST", "/users", r#"{"id":"x","status":"gone"}"#)
            .with_header("content-type", "application/json");
        let violations = contract.validate_request(&route, &bad);
        let locations: Vec<&str> = violations.iter().map(|v| v.location.as_str()).collect();
        assert!(locations.contains(&"body.name"));
        assert!(locations.contains(&"body.id"));
        assert!(locations.contains(&"body.status"));

        let good = StubRequest::from_parts("POST", "/users", r#"{"id":1,"name":"a"}"#)
            .with_header("content-type", "application/json");
        assert!(contract.validate_request(&route, &good).is_empty());
    }

    #[test]
    fn test_response_checks() {
        let contract = contract();
        let route = contract.find_route("GET", "/users").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());

        let ok = contract.validate_response(&route, 200, &headers, br#"[{"id":1,"name":"a"}]"#);
        assert!(ok.is_empty());

        let undeclared = contract.validate_response(&route, 500, &headers, b"");
        assert_eq!(undeclared[0].message, "status 500 is not declared");

        let wrong_item = contract.validate_response(&route, 200, &headers, br#"[{"id":1}]"#);
        assert_eq!(wrong_item[0].location, "body[0].name");

        let mut text = HeaderMap::new();
        text.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        let wrong_type = contract.validate_response(&route, 200, &text, b"hello");
        assert_eq!(wrong_type[0].location, "header.Content-Type");
    }

    #[test]
    fn test_composition_and_nullable() {
        let contract = contract();
        let schema = Schema::from_json(json!({
            "anyOf": [{"type": "integer"}, {"type": "string", "maxLength": 2}]
        }))
        .unwrap();
        assert!(contract.validate_value(&schema, &json!(5)).is_empty());
        assert!(contract.validate_value(&schema, &json!("ab")).is_empty());
        assert_eq!(contract.validate_value(&schema, &json!("abc")).len(), 1);

        let nullable = Schema::from_json(json!({"type": "string", "nullable": true})).unwrap();
        assert!(contract.validate_value(&nullable, &Value::Null).is_empty());
        let strict = Schema::from_json(json!({"type": "string"})).unwrap();
        assert_eq!(contract.validate_value(&strict, &Value::Null).len(), 1);
    }

    #[test]
    fn test_pattern_is_compiled_at_load() {
        let contract = contract();
        let user = contract
            .registry()
            .get("#/components/schemas/User")
            .unwrap();
        let (_, handle) = user
            .properties
            .iter()
            .find(|(name, _)| name == "handle")
            .unwrap();
        assert!(handle.pattern.as_ref().unwrap().regex().is_some());

        let route = contract.find_route("POST", "/users").unwrap();
        let bad = StubRequest::from_parts("POST", "/users", r#"{"id":1,"name":"a","handle":"Bob"}"#)
            .with_header("content-type", "application/json");
        let violations = contract.validate_request(&route, &bad);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].location, "body.handle");
        assert_eq!(
            violations[0].message,
            "'Bob' does not match pattern '^@[a-z]+$'"
        );

        let good = StubRequest::from_parts("POST", "/users", r#"{"id":1,"name":"a","handle":"@bob"}"#)
            .with_header("content-type", "application/json");
        assert!(contract.validate_request(&route, &good).is_empty());
    }

    #[test]
    fn test_describe_joins_violations() {
        let violations = vec![
            Violation::new("query.page", "required parameter is missing"),
            Violation::new("body", "request body is required"),
        ];
        assert_eq!(
            describe(&violations),
            "query.page: required parameter is missing; body: request body is required"
        );
    }
}
