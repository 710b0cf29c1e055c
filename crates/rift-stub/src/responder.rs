//! The closed set of response strategies a matcher can carry.

use crate::config::ResponseMode;
use crate::contract::Contract;
use crate::middleware::{handler, Handler};
use crate::reporter::{Failure, FailureKind, Reporter};
use crate::rng::StubRng;
use crate::synthesize::synthesize;
use bytes::Bytes;
use hyper::StatusCode;
use std::sync::Arc;

/// Shared state a responder needs at request time.
#[derive(Clone)]
pub struct SynthesisEnv {
    pub contract: Option<Arc<Contract>>,
    pub rng: StubRng,
    pub reporter: Arc<dyn Reporter>,
    /// Policy used by dynamic responses that do not name one.
    pub default_mode: ResponseMode,
}

/// How a matched request is answered.
#[derive(Clone)]
pub enum Responder {
    /// Fixed status and body, optionally with a content type.
    Fixed {
        status: StatusCode,
        content_type: Option<&'static str>,
        body: Bytes,
    },
    /// Caller-provided handler.
    Custom(Handler),
    /// A declared example for a status matching the pattern.
    ContractExample { pattern: String },
    /// A value synthesized from the contract under `mode`.
    ContractGenerated { pattern: String, mode: ResponseMode },
}

impl Responder {
    pub fn fixed(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Responder::Fixed {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// Turn the strategy into a handler bound to `env`.
    pub fn into_handler(self, env: &SynthesisEnv) -> Handler {
        match self {
            Responder::Fixed {
                status,
                content_type,
                body,
            } => handler(move |_req, res| {
                if let Some(content_type) = content_type {
                    if !res.headers().contains_key(hyper::header::CONTENT_TYPE) {
                        res.set_header("content-type", content_type);
                    }
                }
                res.set_status(status);
                res.write(&body);
            }),
            Responder::Custom(h) => h,
            Responder::ContractExample { pattern } => {
                contract_handler(env, pattern, ResponseMode::ExamplesOnly)
            }
            Responder::ContractGenerated { pattern, mode } => contract_handler(env, pattern, mode),
        }
    }
}

fn contract_handler(env: &SynthesisEnv, pattern: String, mode: ResponseMode) -> Handler {
    let env = env.clone();
    handler(move |req, res| {
        let Some(contract) = env.contract.as_deref() else {
            env.reporter.report(Failure::new(
                FailureKind::Synthesis,
                "no OpenAPI v3 document is set",
            ));
            return;
        };
        match synthesize(contract, req, &pattern, mode, &env.rng) {
            Ok(synthesized) => synthesized.write_to(res),
            Err(e) => env.reporter.report(Failure::new(
                FailureKind::Synthesis,
                format!("{} {}: {e}", req.method(), req.path()),
            )),
        }
    })
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Responder::Fixed { status, body, .. } => f
                .debug_struct("Fixed")
                .field("status", status)
                .field("body_len", &body.len())
                .finish(),
            Responder::Custom(_) => f.write_str("Custom"),
            Responder::ContractExample { pattern } => f
                .debug_struct("ContractExample")
                .field("pattern", pattern)
                .finish(),
            Responder::ContractGenerated { pattern, mode } => f
                .debug_struct("ContractGenerated")
                .field("pattern", pattern)
                .field("mode", mode)
                .finish(),
        }
    }
}
