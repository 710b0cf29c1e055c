//! Request matchers.
//!
//! A [`Matcher`] is a handle onto one registered rule: an ordered predicate
//! chain (all must pass), its own middleware, a responder and a log of the
//! requests it handled. Builder methods take and return the handle so rules
//! read as one chain:
//!
//! ```ignore
//! router.method("GET").path("/users/*").response(200, json!({"id": 1}));
//! ```

use crate::config::ResponseMode;
use crate::error::StubError;
use crate::glob;
use crate::middleware::{handler, header_middleware, Handler, Middleware};
use crate::reporter::{Failure, FailureKind};
use crate::request::StubRequest;
use crate::responder::{Responder, SynthesisEnv};
use crate::router::RouterInner;
use bytes::Bytes;
use hyper::StatusCode;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::warn;

/// A request test. Predicates only see a clone of the request.
pub type Predicate = Arc<dyn Fn(&StubRequest) -> bool + Send + Sync>;

#[derive(Default)]
struct Chain {
    predicates: Vec<Predicate>,
    middlewares: Vec<Middleware>,
    handler: Option<Handler>,
}

pub(crate) struct MatcherInner {
    chain: RwLock<Chain>,
    requests: RwLock<Vec<Arc<StubRequest>>>,
    router: Weak<RouterInner>,
    env: SynthesisEnv,
}

#[derive(Clone)]
pub struct Matcher {
    inner: Arc<MatcherInner>,
}

impl Matcher {
    pub(crate) fn new(router: Weak<RouterInner>, env: SynthesisEnv, predicate: Predicate) -> Self {
        Self {
            inner: Arc::new(MatcherInner {
                chain: RwLock::new(Chain {
                    predicates: vec![predicate],
                    ..Default::default()
                }),
                requests: RwLock::new(Vec::new()),
                router,
                env,
            }),
        }
    }

    /// Add an arbitrary predicate.
    pub fn matching<F>(self, f: F) -> Self
    where
        F: Fn(&StubRequest) -> bool + Send + Sync + 'static,
    {
        self.inner.chain.write().predicates.push(Arc::new(f));
        self
    }

    /// Require an HTTP method (case-insensitive).
    pub fn method(self, method: &str) -> Self {
        self.matching(method_predicate(method))
    }

    /// Require the path to match a `*`/`?` glob. Use `format!` for computed paths.
    pub fn path(self, pattern: &str) -> Self {
        self.matching(path_predicate(pattern))
    }

    /// Require the first value of a query parameter to equal `value`.
    pub fn query(self, key: &str, value: &str) -> Self {
        self.matching(query_predicate(key, value))
    }

    pub fn middleware(self, mw: Middleware) -> Self {
        self.inner.chain.write().middlewares.push(mw);
        self
    }

    /// Add a response header for requests handled by this matcher.
    pub fn header(self, key: &str, value: &str) -> Self {
        self.middleware(header_middleware(key, value))
    }

    /// Answer with a custom handler.
    pub fn handler<F>(&self, f: F)
    where
        F: Fn(&StubRequest, &mut crate::response::StubResponse) + Send + Sync + 'static,
    {
        self.responder(Responder::Custom(handler(f)));
    }

    /// Answer with `status` and `body`.
    ///
    /// Strings are written verbatim, `()`/`None` writes nothing, and any
    /// other value is JSON-encoded with an `application/json` content type.
    pub fn response<T: Serialize>(&self, status: u16, body: T) {
        let status = to_status(status);
        let responder = match serde_json::to_value(&body) {
            Ok(Value::String(s)) => Responder::fixed(status, s),
            Ok(Value::Null) => Responder::fixed(status, Bytes::new()),
            Ok(value) => match serde_json::to_vec(&value) {
                Ok(encoded) => Responder::Fixed {
                    status,
                    content_type: Some("application/json"),
                    body: Bytes::from(encoded),
                },
                Err(e) => return self.report_encoding_error(e),
            },
            Err(e) => return self.report_encoding_error(e),
        };
        self.responder(responder);
    }

    pub fn response_bytes(&self, status: u16, body: impl Into<Bytes>) {
        self.responder(Responder::fixed(to_status(status), body));
    }

    pub fn response_string(&self, status: u16, body: impl Into<String>) {
        self.responder(Responder::fixed(to_status(status), body.into()));
    }

    /// Answer with a declared example of a status matching `pattern`.
    pub fn response_example(&self, pattern: &str) -> Result<(), StubError> {
        self.require_contract()?;
        self.responder(Responder::ContractExample {
            pattern: pattern.to_string(),
        });
        Ok(())
    }

    /// Answer with a body synthesized under the router's default mode.
    pub fn response_dynamic(&self, pattern: &str) -> Result<(), StubError> {
        self.response_dynamic_with_mode(pattern, self.inner.env.default_mode)
    }

    pub fn response_dynamic_with_mode(
        &self,
        pattern: &str,
        mode: ResponseMode,
    ) -> Result<(), StubError> {
        self.require_contract()?;
        self.responder(Responder::ContractGenerated {
            pattern: pattern.to_string(),
            mode,
        });
        Ok(())
    }

    /// Install a response strategy, replacing any previous one.
    pub fn responder(&self, responder: Responder) {
        let handler = responder.into_handler(&self.inner.env);
        self.inner.chain.write().handler = Some(handler);
    }

    /// Requests this matcher handled, oldest first.
    pub fn requests(&self) -> Vec<StubRequest> {
        self.inner
            .requests
            .read()
            .iter()
            .map(|r| r.as_ref().clone())
            .collect()
    }

    /// Forget this matcher's requests, here and in the router's log.
    pub fn clear_requests(&self) {
        let Some(router) = self.inner.router.upgrade() else {
            self.inner.requests.write().clear();
            return;
        };
        let mut state = router.state.write();
        let mut mine = self.inner.requests.write();
        state
            .requests
            .retain(|r| !mine.iter().any(|m| Arc::ptr_eq(m, r)));
        mine.clear();
    }

    /// Evaluate every predicate, each on its own clone of the request.
    pub(crate) fn matches(&self, req: &StubRequest) -> bool {
        let predicates = self.inner.chain.read().predicates.clone();
        predicates.iter().all(|predicate| {
            let candidate = req.clone();
            predicate(&candidate)
        })
    }

    pub(crate) fn record(&self, req: Arc<StubRequest>) {
        self.inner.requests.write().push(req);
    }

    pub(crate) fn clear_log(&self) {
        self.inner.requests.write().clear();
    }

    /// This matcher's middleware and handler. Without a responder the
    /// handler leaves the default empty `200`.
    pub(crate) fn resolve(&self) -> (Vec<Middleware>, Handler) {
        let chain = self.inner.chain.read();
        let respond = chain.handler.clone().unwrap_or_else(|| {
            warn!("Matched a rule that has no response configured");
            handler(|_, _| {})
        });
        (chain.middlewares.clone(), respond)
    }

    fn require_contract(&self) -> Result<(), StubError> {
        if self.inner.env.contract.is_none() {
            return Err(StubError::NoContract);
        }
        Ok(())
    }

    fn report_encoding_error(&self, e: serde_json::Error) {
        self.inner.env.reporter.report(Failure::new(
            FailureKind::Handler,
            format!("failed to convert message: {e}"),
        ));
    }
}

fn to_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or_else(|_| {
        warn!("Invalid status code {}, using 500", status);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub(crate) fn method_predicate(method: &str) -> impl Fn(&StubRequest) -> bool + Send + Sync {
    let method = method.to_string();
    move |req| req.method().as_str() == method
}

pub(crate) fn path_predicate(pattern: &str) -> impl Fn(&StubRequest) -> bool + Send + Sync {
    let pattern = pattern.to_string();
    move |req| glob::matches(&pattern, req.path())
}

pub(crate) fn query_predicate(
    key: &str,
    value: &str,
) -> impl Fn(&StubRequest) -> bool + Send + Sync {
    let key = key.to_string();
    let value = value.to_string();
    // a missing parameter reads as the empty string
    move |req| req.query_param(&key).unwrap_or_default() == value
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.inner.chain.read();
        f.debug_struct("Matcher")
            .field("predicates", &chain.predicates.len())
            .field("middlewares", &chain.middlewares.len())
            .field("has_handler", &chain.handler.is_some())
            .field("requests", &self.inner.requests.read().len())
            .finish()
    }
}
