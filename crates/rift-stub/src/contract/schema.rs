//! Constraint view over `openapiv3` schemas.
//!
//! The typed tree from `openapiv3` splits constraints across `Type::*`
//! variants and the catch-all `AnySchema`. Generation and validation only
//! need the keywords below, so each node is flattened once at load time.
//! `$ref` targets are not expanded here; they live in a [`SchemaRegistry`]
//! and are resolved on demand, which keeps self-referential schemas finite.

use crate::error::{ContractError, GenerateError};
use openapiv3::{
    AnySchema, ReferenceOr, SchemaKind, StringFormat, Type, VariantOrUnknownOrEmpty,
};
use regex::Regex;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Local `$ref` pointer, e.g. `#/components/schemas/User`.
    pub reference: Option<String>,
    pub schema_type: Option<String>,
    pub format: Option<String>,
    pub nullable: bool,
    pub enumeration: Option<Vec<Value>>,
    pub all_of: Vec<Schema>,
    pub any_of: Vec<Schema>,
    pub one_of: Vec<Schema>,
    /// Declared properties in document order.
    pub properties: Vec<(String, Schema)>,
    pub required: Vec<String>,
    pub items: Option<Box<Schema>>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Pattern>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
    pub multiple_of: Option<f64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

/// A `pattern` keyword, compiled when the contract loads.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    /// `None` when the regex engine rejects the pattern; it is then not enforced.
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(source: &str) -> Self {
        let regex = match Regex::new(source) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Ignoring invalid schema pattern '{}': {}", source, e);
                None
            }
        };
        Self {
            source: source.to_string(),
            regex,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl Schema {
    /// Decode a standalone schema object or `$ref`.
    pub fn from_json(value: Value) -> Result<Schema, ContractError> {
        let mut value = value;
        super::loader::normalize_schema_keywords(&mut value);
        let node: ReferenceOr<openapiv3::Schema> =
            serde_json::from_value(value).map_err(|e| ContractError::Parse(e.to_string()))?;
        Ok(Schema::from_openapi(&node))
    }

    /// Flatten a schema node, keeping a `$ref` unresolved.
    pub fn from_openapi(node: &ReferenceOr<openapiv3::Schema>) -> Schema {
        match node {
            ReferenceOr::Reference { reference } => Schema::reference(reference),
            ReferenceOr::Item(schema) => Schema::from_item(schema),
        }
    }

    fn from_boxed(node: &ReferenceOr<Box<openapiv3::Schema>>) -> Schema {
        match node {
            ReferenceOr::Reference { reference } => Schema::reference(reference),
            ReferenceOr::Item(schema) => Schema::from_item(schema),
        }
    }

    fn reference(reference: &str) -> Schema {
        Schema {
            reference: Some(reference.to_string()),
            ..Default::default()
        }
    }

    pub fn from_item(schema: &openapiv3::Schema) -> Schema {
        let mut out = Schema {
            nullable: schema.schema_data.nullable,
            ..Default::default()
        };
        match &schema.schema_kind {
            SchemaKind::Type(Type::String(s)) => {
                out.schema_type = Some("string".to_string());
                out.format = string_format(&s.format);
                out.pattern = s.pattern.as_deref().map(Pattern::new);
                out.min_length = s.min_length;
                out.max_length = s.max_length;
                out.enumeration = enumeration(&s.enumeration, |v| Value::String(v.clone()));
            }
            SchemaKind::Type(Type::Number(n)) => {
                out.schema_type = Some("number".to_string());
                out.minimum = n.minimum;
                out.maximum = n.maximum;
                out.exclusive_minimum = n.exclusive_minimum;
                out.exclusive_maximum = n.exclusive_maximum;
                out.multiple_of = n.multiple_of.filter(|m| *m > 0.0);
                out.enumeration = enumeration(&n.enumeration, |v| {
                    Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null)
                });
            }
            SchemaKind::Type(Type::Integer(i)) => {
                out.schema_type = Some("integer".to_string());
                out.minimum = i.minimum.map(|v| v as f64);
                out.maximum = i.maximum.map(|v| v as f64);
                out.exclusive_minimum = i.exclusive_minimum;
                out.exclusive_maximum = i.exclusive_maximum;
                out.multiple_of = i.multiple_of.filter(|m| *m > 0).map(|m| m as f64);
                out.enumeration = enumeration(&i.enumeration, |v| Value::from(*v));
            }
            SchemaKind::Type(Type::Boolean(b)) => {
                out.schema_type = Some("boolean".to_string());
                out.enumeration = enumeration(&b.enumeration, |v| Value::Bool(*v));
            }
            SchemaKind::Type(Type::Object(o)) => {
                out.schema_type = Some("object".to_string());
                out.properties = o
                    .properties
                    .iter()
                    .map(|(name, prop)| (name.clone(), Schema::from_boxed(prop)))
                    .collect();
                out.required = o.required.clone();
            }
            SchemaKind::Type(Type::Array(a)) => {
                out.schema_type = Some("array".to_string());
                out.items = a.items.as_ref().map(|i| Box::new(Schema::from_boxed(i)));
                out.min_items = a.min_items;
                out.max_items = a.max_items;
            }
            SchemaKind::OneOf { one_of } => {
                out.one_of = one_of.iter().map(Schema::from_openapi).collect();
            }
            SchemaKind::AllOf { all_of } => {
                out.all_of = all_of.iter().map(Schema::from_openapi).collect();
            }
            SchemaKind::AnyOf { any_of } => {
                out.any_of = any_of.iter().map(Schema::from_openapi).collect();
            }
            SchemaKind::Not { .. } => {}
            SchemaKind::Any(any) => out.merge_any(any),
        }
        out
    }

    /// Schemas `openapiv3` could not place in a typed variant, such as an
    /// integer with fractional bounds or an enum written as text.
    fn merge_any(&mut self, any: &AnySchema) {
        self.schema_type = any.typ.clone();
        self.format = any.format.clone();
        self.pattern = any.pattern.as_deref().map(Pattern::new);
        self.min_length = any.min_length;
        self.max_length = any.max_length;
        self.minimum = any.minimum;
        self.maximum = any.maximum;
        self.exclusive_minimum = any.exclusive_minimum.unwrap_or(false);
        self.exclusive_maximum = any.exclusive_maximum.unwrap_or(false);
        self.multiple_of = any.multiple_of.filter(|m| *m > 0.0);
        self.enumeration = (!any.enumeration.is_empty()).then(|| any.enumeration.clone());
        self.properties = any
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), Schema::from_boxed(prop)))
            .collect();
        self.required = any.required.clone();
        self.items = any.items.as_ref().map(|i| Box::new(Schema::from_boxed(i)));
        self.min_items = any.min_items;
        self.max_items = any.max_items;
        self.all_of = any.all_of.iter().map(Schema::from_openapi).collect();
        self.any_of = any.any_of.iter().map(Schema::from_openapi).collect();
        self.one_of = any.one_of.iter().map(Schema::from_openapi).collect();
    }

    pub fn is_required(&self, property: &str) -> bool {
        self.required.iter().any(|r| r == property)
    }

    /// First composition branch, checked in `allOf`, `anyOf`, `oneOf` order.
    pub fn first_composed(&self) -> Option<&Schema> {
        self.all_of
            .first()
            .or_else(|| self.any_of.first())
            .or_else(|| self.one_of.first())
    }

    /// Every `$ref` reachable from this node without crossing another `$ref`.
    pub fn direct_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(r) = &self.reference {
            out.push(r);
            return;
        }
        for sub in self.all_of.iter().chain(&self.any_of).chain(&self.one_of) {
            sub.collect_refs(out);
        }
        for (_, prop) in &self.properties {
            prop.collect_refs(out);
        }
        if let Some(items) = &self.items {
            items.collect_refs(out);
        }
    }
}

fn string_format(format: &VariantOrUnknownOrEmpty<StringFormat>) -> Option<String> {
    let name = match format {
        VariantOrUnknownOrEmpty::Item(StringFormat::Date) => "date",
        VariantOrUnknownOrEmpty::Item(StringFormat::DateTime) => "date-time",
        VariantOrUnknownOrEmpty::Item(StringFormat::Password) => "password",
        VariantOrUnknownOrEmpty::Item(StringFormat::Byte) => "byte",
        VariantOrUnknownOrEmpty::Item(StringFormat::Binary) => "binary",
        VariantOrUnknownOrEmpty::Unknown(other) => other.as_str(),
        VariantOrUnknownOrEmpty::Empty => return None,
    };
    Some(name.to_string())
}

/// Typed enum members as JSON; a `null` member stays `null`.
fn enumeration<T>(members: &[Option<T>], to_value: impl Fn(&T) -> Value) -> Option<Vec<Value>> {
    if members.is_empty() {
        return None;
    }
    Some(
        members
            .iter()
            .map(|m| m.as_ref().map(&to_value).unwrap_or(Value::Null))
            .collect(),
    )
}

/// Resolved targets of every `$ref` used by the contract's schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    by_ref: HashMap<String, Schema>,
}

/// Upper bound on `$ref -> $ref` hops before a chain counts as unresolvable.
const MAX_REF_HOPS: usize = 32;

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, schema: Schema) {
        self.by_ref.insert(reference.into(), schema);
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.by_ref.contains_key(reference)
    }

    pub fn get(&self, reference: &str) -> Option<&Schema> {
        self.by_ref.get(reference)
    }

    pub fn references(&self) -> impl Iterator<Item = (&String, &Schema)> {
        self.by_ref.iter()
    }

    /// Follow `$ref` links until a concrete schema is reached.
    pub fn resolve<'a>(&'a self, schema: &'a Schema) -> Result<&'a Schema, GenerateError> {
        let mut current = schema;
        for _ in 0..MAX_REF_HOPS {
            match &current.reference {
                None => return Ok(current),
                Some(r) => {
                    current = self
                        .by_ref
                        .get(r)
                        .ok_or_else(|| GenerateError::UnresolvedRef(r.clone()))?;
                }
            }
        }
        Err(GenerateError::UnresolvedRef(
            schema.reference.clone().unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> Schema {
        Schema::from_json(value).unwrap()
    }

    #[test]
    fn test_string_constraints_from_typed_variant() {
        let s = schema(json!({
            "type": "string",
            "minLength": 5,
            "maxLength": 10,
            "format": "email",
            "pattern": "^[a-z]+@"
        }));
        assert_eq!(s.schema_type.as_deref(), Some("string"));
        assert_eq!(s.min_length, Some(5));
        assert_eq!(s.max_length, Some(10));
        assert_eq!(s.format.as_deref(), Some("email"));
        let pattern = s.pattern.unwrap();
        assert_eq!(pattern.as_str(), "^[a-z]+@");
        assert!(pattern.regex().unwrap().is_match("bob@example.com"));

        let dated = schema(json!({"type": "string", "format": "date-time"}));
        assert_eq!(dated.format.as_deref(), Some("date-time"));
    }

    #[test]
    fn test_invalid_pattern_is_kept_but_not_compiled() {
        let s = schema(json!({"type": "string", "pattern": "(unclosed"}));
        let pattern = s.pattern.unwrap();
        assert_eq!(pattern.as_str(), "(unclosed");
        assert!(pattern.regex().is_none());
    }

    #[test]
    fn test_type_list_with_null() {
        let s = schema(json!({"type": ["integer", "null"]}));
        assert_eq!(s.schema_type.as_deref(), Some("integer"));
        assert!(s.nullable);
    }

    #[test]
    fn test_exclusive_bounds_both_styles() {
        let v30 = schema(json!({"type": "number", "minimum": 1, "exclusiveMinimum": true}));
        assert_eq!(v30.minimum, Some(1.0));
        assert!(v30.exclusive_minimum);

        let v31 = schema(json!({"type": "number", "exclusiveMaximum": 9.5}));
        assert_eq!(v31.maximum, Some(9.5));
        assert!(v31.exclusive_maximum);
    }

    #[test]
    fn test_untyped_integer_shapes_fall_back_to_any() {
        let fractional = schema(json!({"type": "integer", "minimum": 1e19}));
        assert_eq!(fractional.schema_type.as_deref(), Some("integer"));
        assert_eq!(fractional.minimum, Some(1e19));

        let text_enum = schema(json!({"type": "integer", "enum": ["7"]}));
        assert_eq!(text_enum.enumeration, Some(vec![json!("7")]));
    }

    #[test]
    fn test_properties_keep_document_order() {
        let s = schema(json!({
            "type": "object",
            "required": ["zeta"],
            "properties": {
                "zeta": {"type": "string"},
                "alpha": {"type": "integer"},
                "mid": {"$ref": "#/components/schemas/Mid"}
            }
        }));
        let names: Vec<&str> = s.properties.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert!(s.is_required("zeta"));
        assert!(!s.is_required("alpha"));
    }

    #[test]
    fn test_direct_refs_stop_at_ref() {
        let s = schema(json!({
            "type": "object",
            "properties": {
                "owner": {"$ref": "#/components/schemas/User"},
                "tags": {"type": "array", "items": {"$ref": "#/components/schemas/Tag"}}
            }
        }));
        assert_eq!(
            s.direct_refs(),
            vec!["#/components/schemas/User", "#/components/schemas/Tag"]
        );
    }

    #[test]
    fn test_registry_resolves_chains_and_reports_missing() {
        let mut registry = SchemaRegistry::new();
        registry.insert(
            "#/components/schemas/Alias",
            schema(json!({"$ref": "#/components/schemas/User"})),
        );
        registry.insert("#/components/schemas/User", schema(json!({"type": "object"})));

        let alias = schema(json!({"$ref": "#/components/schemas/Alias"}));
        let resolved = registry.resolve(&alias).unwrap();
        assert_eq!(resolved.schema_type.as_deref(), Some("object"));

        let missing = schema(json!({"$ref": "#/components/schemas/Nope"}));
        assert_eq!(
            registry.resolve(&missing),
            Err(GenerateError::UnresolvedRef(
                "#/components/schemas/Nope".to_string()
            ))
        );
    }
}
