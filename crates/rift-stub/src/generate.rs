//! Schema-driven random value generation.
//!
//! Every random choice comes from the caller's RNG, so a seeded RNG
//! reproduces the same tree. Recursion is bounded by [`MAX_DEPTH`], which
//! keeps self-referential schemas from expanding forever.

use crate::contract::{Schema, SchemaRegistry};
use crate::error::GenerateError;
use crate::rng::StubRng;
use chrono::{TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Number, Value};

/// Deepest nesting level a generated value may reach.
pub const MAX_DEPTH: usize = 10;

pub const DEFAULT_STRING_LENGTH: usize = 10;
/// Extra length allowed above `minLength` when no `maxLength` is given.
pub const STRING_LENGTH_SPAN: usize = 10;
pub const DEFAULT_MINIMUM: f64 = 0.0;
pub const DEFAULT_MAXIMUM: f64 = 100.0;
pub const DEFAULT_MAX_ITEMS: usize = 5;
/// Longest string the generator will produce.
pub const MAX_STRING_LENGTH: usize = 4096;
const NUMBER_EPSILON: f64 = 1e-6;
/// 2000-01-01T00:00:00Z
const EARLIEST_TIMESTAMP: i64 = 946_684_800;
/// 2030-12-31T23:59:59Z
const LATEST_TIMESTAMP: i64 = 1_924_991_999;

/// Generate a value for `schema`, holding the RNG lock for the whole tree.
pub fn generate(
    schema: &Schema,
    registry: &SchemaRegistry,
    rng: &StubRng,
) -> Result<Value, GenerateError> {
    let mut guard = rng.lock();
    Generator::new(registry, &mut *guard).generate(schema, 0)
}

/// Recursive generator over one schema registry.
pub struct Generator<'a, R: Rng> {
    registry: &'a SchemaRegistry,
    rng: &'a mut R,
}

impl<'a, R: Rng> Generator<'a, R> {
    pub fn new(registry: &'a SchemaRegistry, rng: &'a mut R) -> Self {
        Self { registry, rng }
    }

    pub fn generate(&mut self, schema: &Schema, depth: usize) -> Result<Value, GenerateError> {
        if depth > MAX_DEPTH {
            return Err(GenerateError::DepthExceeded(depth));
        }
        // following a $ref does not count as nesting
        let schema = self.registry.resolve(schema)?;

        if schema.nullable && self.rng.gen_bool(0.5) {
            return Ok(Value::Null);
        }

        if let Some(choices) = schema.enumeration.as_ref().filter(|c| !c.is_empty()) {
            let picked = &choices[self.rng.gen_range(0..choices.len())];
            return Ok(coerce_enum_value(picked, schema.schema_type.as_deref()));
        }

        if let Some(branch) = schema.first_composed() {
            return self.generate(branch, depth + 1);
        }

        match schema.schema_type.as_deref() {
            Some("string") => Ok(Value::String(self.string(schema)?)),
            Some("number") => self.number(schema),
            Some("integer") => Ok(Value::from(self.integer(schema)?)),
            Some("boolean") => Ok(Value::Bool(self.rng.gen_bool(0.5))),
            Some("array") => self.array(schema, depth),
            Some("object") => self.object(schema, depth),
            Some("null") => Ok(Value::Null),
            Some(other) => Err(GenerateError::UnsupportedType(other.to_string())),
            None if !schema.properties.is_empty() => self.object(schema, depth),
            None if schema.items.is_some() => self.array(schema, depth),
            None => Ok(Value::Object(Map::new())),
        }
    }

    fn string(&mut self, schema: &Schema) -> Result<String, GenerateError> {
        match schema.format.as_deref() {
            Some("date") => return Ok(self.timestamp("%Y-%m-%d")),
            Some("date-time") => return Ok(self.timestamp("%Y-%m-%dT%H:%M:%SZ")),
            Some("email") => return Ok(format!("user{}@example.com", self.alphanumeric(8))),
            Some("uuid") => {
                let bytes: [u8; 16] = self.rng.gen();
                return Ok(uuid::Builder::from_random_bytes(bytes)
                    .into_uuid()
                    .to_string());
            }
            _ => {}
        }

        let (lo, hi) = match (schema.min_length, schema.max_length) {
            (Some(min), Some(max)) => (min, max.max(min)),
            (Some(min), None) => (min, min.saturating_add(STRING_LENGTH_SPAN)),
            (None, Some(max)) => (max.min(1), max),
            (None, None) => (DEFAULT_STRING_LENGTH, DEFAULT_STRING_LENGTH),
        };
        if lo > MAX_STRING_LENGTH {
            return Err(GenerateError::Unsatisfiable(format!(
                "minLength {lo} exceeds the generated string limit of {MAX_STRING_LENGTH}"
            )));
        }
        let len = self.rng.gen_range(lo..=hi.min(MAX_STRING_LENGTH));
        Ok(self.alphanumeric(len))
    }

    fn alphanumeric(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| self.rng.sample(Alphanumeric) as char)
            .collect()
    }

    /// A UTC instant between 2000-01-01 and 2030-12-31, formatted.
    fn timestamp(&mut self, format: &str) -> String {
        let seconds = self.rng.gen_range(EARLIEST_TIMESTAMP..=LATEST_TIMESTAMP);
        Utc.timestamp_opt(seconds, 0)
            .single()
            .map(|at| at.format(format).to_string())
            .unwrap_or_default()
    }

    fn number(&mut self, schema: &Schema) -> Result<Value, GenerateError> {
        let (mut lo, mut hi) = default_bounds(schema.minimum, schema.maximum);
        if schema.exclusive_minimum {
            lo = (lo + NUMBER_EPSILON).max(lo.next_up());
        }
        if schema.exclusive_maximum {
            hi = (hi - NUMBER_EPSILON).min(hi.next_down());
        }
        if !(lo.is_finite() && hi.is_finite()) || lo > hi {
            return Err(GenerateError::Unsatisfiable(format!(
                "no number between {lo} and {hi}"
            )));
        }
        let mut x = self.uniform(lo, hi);
        if let Some(m) = schema.multiple_of {
            let floored = (x / m).floor() * m;
            x = if floored >= lo {
                floored
            } else if floored + m <= hi {
                floored + m
            } else {
                f64::NAN
            };
        }
        Number::from_f64(x).map(Value::Number).ok_or_else(|| {
            GenerateError::Unsatisfiable(format!(
                "no multiple of {} between {lo} and {hi}",
                schema.multiple_of.unwrap_or_default()
            ))
        })
    }

    /// Uniform draw over `[lo, hi]`. A span too wide for `f64` is drawn
    /// from one of its two halves.
    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        if (hi - lo).is_finite() {
            return self.rng.gen_range(lo..=hi);
        }
        let mid = lo / 2.0 + hi / 2.0;
        if self.rng.gen_bool(0.5) {
            self.rng.gen_range(lo..=mid)
        } else {
            self.rng.gen_range(mid..=hi)
        }
    }

    fn integer(&mut self, schema: &Schema) -> Result<i64, GenerateError> {
        let (lo_bound, hi_bound) = default_bounds(schema.minimum, schema.maximum);
        let unsatisfiable = || {
            GenerateError::Unsatisfiable(format!(
                "no 64-bit integer between {lo_bound} and {hi_bound}"
            ))
        };
        if lo_bound >= i64::MAX as f64 || hi_bound < i64::MIN as f64 {
            return Err(unsatisfiable());
        }
        let mut lo = lo_bound.ceil() as i64;
        let mut hi = hi_bound.floor() as i64;
        if schema.exclusive_minimum {
            lo = lo.checked_add(1).ok_or_else(unsatisfiable)?;
        }
        if schema.exclusive_maximum {
            hi = hi.checked_sub(1).ok_or_else(unsatisfiable)?;
        }
        if lo > hi {
            return Err(unsatisfiable());
        }
        let mut n = self.rng.gen_range(lo..=hi);
        if let Some(m) = schema.multiple_of.map(|m| m as i64).filter(|m| *m > 0) {
            let rem = n.rem_euclid(m);
            let down = n.checked_sub(rem).filter(|d| *d >= lo);
            let up = n.checked_add(m - rem).filter(|u| *u <= hi);
            n = down.or(up).ok_or_else(unsatisfiable)?;
        }
        Ok(n)
    }

    fn array(&mut self, schema: &Schema, depth: usize) -> Result<Value, GenerateError> {
        let Some(items) = schema.items.as_deref() else {
            return Ok(Value::Array(Vec::new()));
        };
        let min = schema.min_items.unwrap_or(0);
        let max = schema.max_items.unwrap_or(DEFAULT_MAX_ITEMS).max(min);
        let len = self.rng.gen_range(min..=max);
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.generate(items, depth + 1)?);
        }
        Ok(Value::Array(out))
    }

    fn object(&mut self, schema: &Schema, depth: usize) -> Result<Value, GenerateError> {
        let mut out = Map::new();
        for (name, prop) in &schema.properties {
            if schema.is_required(name) || self.rng.gen_bool(0.5) {
                out.insert(name.clone(), self.generate(prop, depth + 1)?);
            }
        }
        Ok(Value::Object(out))
    }
}

/// Bounds with defaults. A lone bound outside the default range keeps the
/// default span on its side.
fn default_bounds(minimum: Option<f64>, maximum: Option<f64>) -> (f64, f64) {
    let span = DEFAULT_MAXIMUM - DEFAULT_MINIMUM;
    match (minimum, maximum) {
        (Some(lo), Some(hi)) => (lo, hi),
        (Some(lo), None) if lo <= DEFAULT_MAXIMUM => (lo, DEFAULT_MAXIMUM),
        (Some(lo), None) => (lo, lo + span),
        (None, Some(hi)) if hi >= DEFAULT_MINIMUM => (DEFAULT_MINIMUM, hi),
        (None, Some(hi)) => (hi - span, hi),
        (None, None) => (DEFAULT_MINIMUM, DEFAULT_MAXIMUM),
    }
}

/// Enum members written as text are converted to the schema's scalar type.
fn coerce_enum_value(value: &Value, schema_type: Option<&str>) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    let coerced = match schema_type {
        Some("integer") => text.parse::<i64>().ok().map(Value::from),
        Some("number") => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        Some("boolean") => text.parse::<bool>().ok().map(Value::Bool),
        _ => None,
    };
    coerced.unwrap_or_else(|| value.clone())
}
