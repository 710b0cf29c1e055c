//! The router: ordered matchers, default middleware and request bookkeeping.
//!
//! Dispatch logs every request on arrival, then walks the matchers in order
//! and hands the request to the first one whose predicate chain passes.
//! Router defaults wrap outermost, then the matcher's own middleware, then
//! its responder. An unmatched request is reported with a full dump and
//! gets no response.
//!
//! Lock order is router state, then a matcher's request log. Dispatch only
//! holds the router lock long enough to log the request and snapshot the
//! matcher list, so handlers may register matchers or clear logs freely.

use crate::config::StubOptions;
use crate::contract::validate::describe;
use crate::contract::{self, Contract};
use crate::error::StubError;
use crate::matcher::{method_predicate, path_predicate, query_predicate, Matcher, Predicate};
use crate::middleware::{compose, handler, header_middleware, middleware, Handler, Middleware};
use crate::reporter::{Failure, FailureKind, FailureLog, Reporter};
use crate::request::StubRequest;
use crate::response::StubResponse;
use crate::responder::SynthesisEnv;
use crate::rng::StubRng;
use crate::server::ServerHandle;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub(crate) struct RouterState {
    pub(crate) matchers: Vec<Matcher>,
    pub(crate) middlewares: Vec<Middleware>,
    pub(crate) requests: Vec<Arc<StubRequest>>,
    /// Insert the next registered matcher at the front, then reset.
    pub(crate) prepend_once: bool,
}

pub(crate) struct RouterInner {
    pub(crate) state: RwLock<RouterState>,
    pub(crate) env: SynthesisEnv,
    pub(crate) options: StubOptions,
    pub(crate) server: Mutex<Option<ServerHandle>>,
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        if let Some(server) = self.server.get_mut().take() {
            server.shutdown();
        }
    }
}

/// A programmable HTTP stub. Clones share the same rules and logs.
#[derive(Clone)]
pub struct Router {
    pub(crate) inner: Arc<RouterInner>,
}

impl Router {
    /// Build a router, loading the contract named by the options if any.
    pub async fn new(options: StubOptions) -> Result<Self, StubError> {
        options.validate()?;
        let contract = match &options.contract {
            Some(source) => {
                Some(contract::load(source, options.skip_circular_reference_check).await?)
            }
            None => None,
        };
        Self::with_contract(options, contract)
    }

    /// Build a router around an already loaded contract.
    pub fn with_contract(
        options: StubOptions,
        contract: Option<Contract>,
    ) -> Result<Self, StubError> {
        options.validate()?;
        let reporter: Arc<dyn Reporter> = options
            .reporter
            .clone()
            .unwrap_or_else(|| Arc::new(FailureLog::new()));
        let rng = StubRng::new(options.seed);
        debug!("Router RNG seed: {}", rng.seed());
        let contract = contract.map(Arc::new);

        let mut state = RouterState::default();
        if let Some(contract) = &contract {
            state.middlewares.push(contract_validator(
                contract.clone(),
                reporter.clone(),
                options.skip_validate_request,
                options.skip_validate_response,
            ));
        }

        let env = SynthesisEnv {
            contract,
            rng,
            reporter,
            default_mode: options.response_mode,
        };
        Ok(Self {
            inner: Arc::new(RouterInner {
                state: RwLock::new(state),
                env,
                options,
                server: Mutex::new(None),
            }),
        })
    }

    /// Register a matcher with an arbitrary predicate.
    pub fn matching<F>(&self, f: F) -> Matcher
    where
        F: Fn(&StubRequest) -> bool + Send + Sync + 'static,
    {
        self.register(Arc::new(f))
    }

    pub fn method(&self, method: &str) -> Matcher {
        self.register(Arc::new(method_predicate(method)))
    }

    pub fn path(&self, pattern: &str) -> Matcher {
        self.register(Arc::new(path_predicate(pattern)))
    }

    pub fn query(&self, key: &str, value: &str) -> Matcher {
        self.register(Arc::new(query_predicate(key, value)))
    }

    /// Insert the next registered matcher at the front instead of the end.
    pub fn prepend(&self) -> &Self {
        self.inner.state.write().prepend_once = true;
        self
    }

    pub fn default_middleware(&self, mw: Middleware) {
        self.inner.state.write().middlewares.push(mw);
    }

    pub fn default_header(&self, key: &str, value: &str) {
        self.default_middleware(header_middleware(key, value));
    }

    /// Answer every request with a declared example of a status matching `pattern`.
    pub fn response_example(&self, pattern: &str) -> Result<(), StubError> {
        self.require_contract()?;
        self.matching(|_| true).response_example(pattern)
    }

    /// Answer every request with a body synthesized under the default mode.
    pub fn response_dynamic(&self, pattern: &str) -> Result<(), StubError> {
        self.require_contract()?;
        self.matching(|_| true).response_dynamic(pattern)
    }

    /// Every request received, matched or not, oldest first.
    pub fn requests(&self) -> Vec<StubRequest> {
        self.inner
            .state
            .read()
            .requests
            .iter()
            .map(|r| r.as_ref().clone())
            .collect()
    }

    /// Forget all requests, including every matcher's log.
    pub fn clear_requests(&self) {
        let mut state = self.inner.state.write();
        state.requests.clear();
        for matcher in &state.matchers {
            matcher.clear_log();
        }
    }

    /// Failures reported so far (unmatched requests, violations, synthesis errors).
    pub fn failures(&self) -> Vec<Failure> {
        self.inner.env.reporter.failures()
    }

    pub fn clear_failures(&self) {
        self.inner.env.reporter.clear();
    }

    /// Panic with every reported failure, if there are any.
    pub fn assert_no_failures(&self) {
        let failures = self.failures();
        if !failures.is_empty() {
            let messages: Vec<String> = failures.iter().map(Failure::to_string).collect();
            panic!(
                "{} stub failure(s):\n{}",
                failures.len(),
                messages.join("\n")
            );
        }
    }

    pub fn seed(&self) -> u64 {
        self.inner.env.rng.seed()
    }

    pub fn contract(&self) -> Option<Arc<Contract>> {
        self.inner.env.contract.clone()
    }

    pub fn options(&self) -> &StubOptions {
        &self.inner.options
    }

    /// Dispatch one request. Returns `None` when no matcher claimed it.
    pub fn dispatch(&self, req: StubRequest) -> Option<StubResponse> {
        let req = Arc::new(req);
        self.inner.state.write().requests.push(req.clone());

        let (matchers, defaults) = {
            let state = self.inner.state.read();
            (state.matchers.clone(), state.middlewares.clone())
        };

        let Some(matched) = matchers.iter().find(|m| m.matches(&req)) else {
            self.inner.env.reporter.report(Failure::new(
                FailureKind::Unmatched,
                format!(
                    "failed to match request:\n---REQUEST START---\n{}\n---REQUEST END---",
                    req.dump()
                ),
            ));
            return None;
        };

        {
            // a predicate or another thread may have cleared the log meanwhile
            let state = self.inner.state.read();
            if state.requests.iter().any(|r| Arc::ptr_eq(r, &req)) {
                matched.record(req.clone());
            }
        }
        let (own, respond) = matched.resolve();
        let chain: Vec<Middleware> = defaults.into_iter().chain(own).collect();
        let run = compose(&chain, respond);

        let mut res = StubResponse::new();
        run(&req, &mut res);
        debug!(
            "{} {} -> {} ({} bytes)",
            req.method(),
            req.path(),
            res.status(),
            res.body().len()
        );
        Some(res)
    }

    fn register(&self, predicate: Predicate) -> Matcher {
        let matcher = Matcher::new(
            Arc::downgrade(&self.inner),
            self.inner.env.clone(),
            predicate,
        );
        let mut state = self.inner.state.write();
        if std::mem::take(&mut state.prepend_once) {
            state.matchers.insert(0, matcher.clone());
        } else {
            state.matchers.push(matcher.clone());
        }
        matcher
    }

    fn require_contract(&self) -> Result<(), StubError> {
        if self.inner.env.contract.is_none() {
            return Err(StubError::NoContract);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Router")
            .field("matchers", &state.matchers.len())
            .field("middlewares", &state.middlewares.len())
            .field("requests", &state.requests.len())
            .field("seed", &self.inner.env.rng.seed())
            .finish()
    }
}

/// Middleware that checks each exchange against the contract.
///
/// The request is checked before the inner handler runs and the response
/// after it. Violations are reported and never alter the response.
fn contract_validator(
    contract: Arc<Contract>,
    reporter: Arc<dyn Reporter>,
    skip_request: bool,
    skip_response: bool,
) -> Middleware {
    middleware(move |next: Handler| {
        let contract = contract.clone();
        let reporter = reporter.clone();
        handler(move |req, res| {
            let route = contract.find_route(req.method().as_str(), req.path());
            match &route {
                None => reporter.report(Failure::new(
                    FailureKind::RequestViolation,
                    format!("failed to find route for {} {}", req.method(), req.path()),
                )),
                Some(route) if !skip_request => {
                    let violations = contract.validate_request(route, req);
                    if !violations.is_empty() {
                        reporter.report(Failure::new(
                            FailureKind::RequestViolation,
                            format!(
                                "failed to validate request {} {}: {}",
                                req.method(),
                                req.path(),
                                describe(&violations)
                            ),
                        ));
                    }
                }
                Some(_) => {}
            }

            next(req, res);

            if let Some(route) = route.as_ref().filter(|_| !skip_response) {
                let violations = contract.validate_response(
                    route,
                    res.status().as_u16(),
                    res.headers(),
                    res.body(),
                );
                if !violations.is_empty() {
                    reporter.report(Failure::new(
                        FailureKind::ResponseViolation,
                        format!(
                            "failed to validate response {} {} -> {}: {}",
                            req.method(),
                            req.path(),
                            res.status().as_u16(),
                            describe(&violations)
                        ),
                    ));
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::FailureKind;
    use hyper::StatusCode;
    use tracing_test::traced_test;

    fn router() -> Router {
        Router::with_contract(StubOptions::new(), None).unwrap()
    }

    fn get(path: &str) -> StubRequest {
        StubRequest::from_parts("GET", path, "")
    }

    #[test]
    fn test_first_registered_match_wins() {
        let r = router();
        r.path("/a").response_string(200, "first");
        r.path("/*").response_string(200, "second");
        let res = r.dispatch(get("/a")).unwrap();
        assert_eq!(res.body(), b"first");
        let res = r.dispatch(get("/b")).unwrap();
        assert_eq!(res.body(), b"second");
    }

    #[test]
    fn test_prepend_applies_once() {
        let r = router();
        r.path("/*").response_string(200, "catch-all");
        r.prepend().path("/a").response_string(200, "prepended");
        r.path("/a").response_string(200, "appended");
        assert_eq!(r.dispatch(get("/a")).unwrap().body(), b"prepended");
        assert_eq!(r.inner.state.read().matchers.len(), 3);
        assert!(!r.inner.state.read().prepend_once);
    }

    #[test]
    fn test_unmatched_is_reported_with_dump() {
        let r = router();
        r.path("/known").response_string(200, "ok");
        assert!(r.dispatch(get("/unknown?x=1")).is_none());

        let failures = r.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Unmatched);
        assert!(failures[0].message.contains("---REQUEST START---"));
        assert!(failures[0].message.contains("GET /unknown?x=1 HTTP/1.1"));
        assert_eq!(r.requests().len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_unmatched_failure_is_logged() {
        let r = router();
        r.dispatch(StubRequest::from_parts("DELETE", "/nothing", ""));
        assert!(logs_contain("failed to match request"));
        assert!(logs_contain("DELETE /nothing HTTP/1.1"));
    }

    #[test]
    fn test_assert_no_failures_passes_when_clean() {
        let r = router();
        r.path("/").response_string(200, "ok");
        r.dispatch(get("/"));
        r.assert_no_failures();
    }

    #[test]
    #[should_panic(expected = "1 stub failure(s)")]
    fn test_assert_no_failures_panics_with_messages() {
        let r = router();
        r.dispatch(get("/missing"));
        r.assert_no_failures();
    }

    #[test]
    fn test_matcher_without_responder_answers_empty_ok() {
        let r = router();
        r.method("GET");
        let res = r.dispatch(get("/")).unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.body().is_empty());
    }

    #[test]
    fn test_clear_requests_scopes() {
        let r = router();
        let a = r.path("/a");
        a.response_string(200, "a");
        let b = r.path("/b");
        b.response_string(200, "b");

        r.dispatch(get("/a"));
        r.dispatch(get("/b"));
        r.dispatch(get("/a"));
        r.dispatch(get("/c"));
        assert_eq!(a.requests().len(), 2);
        assert_eq!(r.requests().len(), 4);

        a.clear_requests();
        assert!(a.requests().is_empty());
        assert_eq!(b.requests().len(), 1);
        let remaining: Vec<String> = r.requests().iter().map(|q| q.path().to_string()).collect();
        assert_eq!(remaining, vec!["/b", "/c"]);

        r.clear_requests();
        assert!(r.requests().is_empty());
        assert!(b.requests().is_empty());
    }

    #[test]
    fn test_clear_during_matching_keeps_matcher_log_a_subset() {
        let r = router();
        let weak = Arc::downgrade(&r.inner);
        let m = r.matching(move |_| {
            if let Some(inner) = weak.upgrade() {
                Router { inner }.clear_requests();
            }
            true
        });
        m.response_string(200, "ok");

        assert_eq!(r.dispatch(get("/a")).unwrap().body(), b"ok");
        assert!(r.requests().is_empty());
        assert!(m.requests().is_empty());

        r.dispatch(get("/b"));
        assert!(r.requests().is_empty());
        assert!(m.requests().is_empty());
    }

    #[test]
    fn test_default_middleware_wraps_matcher_middleware() {
        let r = router();
        r.default_header("X-Layer", "router");
        r.path("/x")
            .header("X-Layer", "matcher")
            .response_string(200, "ok");
        let res = r.dispatch(get("/x")).unwrap();
        let layers: Vec<&str> = res
            .headers()
            .get_all("x-layer")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(layers, vec!["router", "matcher"]);
    }

    #[test]
    fn test_contract_responses_require_contract() {
        let r = router();
        assert!(matches!(r.response_example("*"), Err(StubError::NoContract)));
        assert!(matches!(
            r.path("/").response_dynamic("*"),
            Err(StubError::NoContract)
        ));
        assert!(r.inner.state.read().matchers.len() == 1);
    }

    #[test]
    fn test_invalid_base_path_is_rejected() {
        assert!(matches!(
            Router::with_contract(StubOptions::new().base_path("api/"), None),
            Err(StubError::InvalidBasePath(_))
        ));
    }

    #[test]
    fn test_seed_is_exposed() {
        let r = Router::with_contract(StubOptions::new().seed(5), None).unwrap();
        assert_eq!(r.seed(), 5);
    }
}
