//! Contract-driven response synthesis.
//!
//! Given a request and a status pattern, pick a declared status, negotiate a
//! content type against the `Accept` header, and produce a body from either a
//! declared example or the schema generator.

use crate::config::ResponseMode;
use crate::contract::{Contract, MediaSpec, Operation, SchemaRegistry};
use crate::error::SynthesisError;
use crate::generate::Generator;
use crate::glob;
use crate::request::StubRequest;
use crate::response::StubResponse;
use crate::rng::StubRng;
use bytes::Bytes;
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::StatusCode;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

/// Default status pattern: any declared status.
pub const ANY_STATUS: &str = "*";

/// A synthesized response, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub status: StatusCode,
    /// `None` when the chosen response declares no content.
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Synthesized {
    pub fn write_to(&self, res: &mut StubResponse) {
        if let Some(content_type) = &self.content_type {
            res.set_header(CONTENT_TYPE.as_str(), content_type);
        }
        res.set_status(self.status);
        res.write(&self.body);
    }
}

/// Synthesize a response for `req` from the contract.
///
/// The RNG stays locked for the whole call, so concurrent syntheses never
/// interleave draws.
pub fn synthesize(
    contract: &Contract,
    req: &StubRequest,
    pattern: &str,
    mode: ResponseMode,
    rng: &StubRng,
) -> Result<Synthesized, SynthesisError> {
    let route = contract
        .find_route(req.method().as_str(), req.path())
        .ok_or_else(|| SynthesisError::NoRoute {
            method: req.method().to_string(),
            path: req.path().to_string(),
        })?;

    let mut rng = rng.lock();
    let (status, key) = select_status(route.operation, pattern, &mut *rng)?;
    let Some(spec) = route.operation.response(key) else {
        return Err(SynthesisError::NoMatchingStatus(pattern.to_string()));
    };

    let Some((content_type, media)) = negotiate_content_type(req.header(ACCEPT.as_str()), &spec.content)
    else {
        debug!(
            "{} {} -> {} without content",
            req.method(),
            route.operation.path,
            status
        );
        return Ok(Synthesized {
            status,
            content_type: None,
            body: Bytes::new(),
        });
    };

    let value = produce_body(media, mode, contract.registry(), &mut *rng)?;
    let body = serialize(content_type, &value)?;
    debug!(
        "{} {} -> {} {} ({} bytes, {})",
        req.method(),
        route.operation.path,
        status,
        content_type,
        body.len(),
        mode
    );
    Ok(Synthesized {
        status,
        content_type: Some(content_type.to_string()),
        body,
    })
}

/// Pick one declared numeric status matching `pattern`, uniformly at random.
///
/// Keys such as `default` or `2XX` are not concrete statuses and never match.
pub fn select_status<'a, R: Rng>(
    operation: &'a Operation,
    pattern: &str,
    rng: &mut R,
) -> Result<(StatusCode, &'a str), SynthesisError> {
    let candidates: Vec<&str> = operation
        .responses
        .iter()
        .map(|(code, _)| code.as_str())
        .filter(|code| code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()))
        .filter(|code| glob::matches(pattern, code))
        .collect();
    if candidates.is_empty() {
        return Err(SynthesisError::NoMatchingStatus(pattern.to_string()));
    }
    let key = candidates[rng.gen_range(0..candidates.len())];
    let status = key
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| SynthesisError::InvalidStatus(key.to_string()))?;
    Ok((status, key))
}

/// Choose the content type to respond with.
///
/// The first `Accept` entry declared verbatim wins; otherwise the first
/// declared content type is used. Returns `None` only when nothing is declared.
pub fn negotiate_content_type<'a>(
    accept: Option<&str>,
    content: &'a [(String, MediaSpec)],
) -> Option<(&'a str, &'a MediaSpec)> {
    let exact = accept.and_then(|accept| {
        accept
            .split(',')
            .map(|entry| entry.split(';').next().unwrap_or("").trim())
            .filter(|entry| !entry.is_empty())
            .find_map(|wanted| content.iter().find(|(declared, _)| declared == wanted))
    });
    exact
        .or_else(|| content.first())
        .map(|(content_type, media)| (content_type.as_str(), media))
}

/// Produce the body value for one media type under `mode`.
pub fn produce_body<R: Rng>(
    media: &MediaSpec,
    mode: ResponseMode,
    registry: &SchemaRegistry,
    rng: &mut R,
) -> Result<Value, SynthesisError> {
    let example = || media.examples.first().cloned().ok_or(SynthesisError::NoExample);
    let mut generated = || -> Result<Value, SynthesisError> {
        let schema = media.schema.as_ref().ok_or(SynthesisError::NoSchema)?;
        Ok(Generator::new(registry, &mut *rng).generate(schema, 0)?)
    };
    match mode {
        ResponseMode::ExamplesOnly => example(),
        ResponseMode::AlwaysGenerate => generated(),
        ResponseMode::PreferExamples => example().or_else(|_| generated()),
    }
}

/// Encode a value for the wire: text content types carry the raw scalar,
/// everything else is JSON.
pub fn serialize(content_type: &str, value: &Value) -> Result<Bytes, SynthesisError> {
    if content_type.contains("text") {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        return Ok(Bytes::from(text));
    }
    Ok(Bytes::from(serde_json::to_vec(value)?))
}
