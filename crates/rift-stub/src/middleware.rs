//! Handlers and middleware.
//!
//! A [`Handler`] writes a [`StubResponse`] for a [`StubRequest`]. A
//! [`Middleware`] transforms one handler into another. Chains are composed
//! at dispatch time so that the first middleware in the list runs first.

use crate::request::StubRequest;
use crate::response::StubResponse;
use std::sync::Arc;

pub type Handler = Arc<dyn Fn(&StubRequest, &mut StubResponse) + Send + Sync>;

pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&StubRequest, &mut StubResponse) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Compose `middlewares` around `handler`, outermost first.
pub fn compose(middlewares: &[Middleware], handler: Handler) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, mw| mw(next))
}

/// Middleware that appends a header to every response before the inner handler runs.
pub fn header_middleware(key: impl Into<String>, value: impl Into<String>) -> Middleware {
    let key = key.into();
    let value = value.into();
    middleware(move |next: Handler| {
        let key = key.clone();
        let value = value.clone();
        handler(move |req, res| {
            res.add_header(&key, &value);
            next(req, res);
        })
    })
}
