//! HTTP/HTTPS test server hosting a [`Router`].
//!
//! Each accepted connection is served by hyper's http1 builder. Requests are
//! snapshotted with their full body, stripped of the base path and handed to
//! [`Router::dispatch`]. An unmatched request fails the service call, so
//! hyper drops the connection without writing a response.

use crate::config::StubOptions;
use crate::error::StubError;
use crate::request::StubRequest;
use crate::router::{Router, RouterInner};
use crate::tls;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Weak;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

const DEFAULT_ADDR: &str = "127.0.0.1:0";

/// A running server owned by a router.
pub(crate) struct ServerHandle {
    addr: SocketAddr,
    url: String,
    shutdown_tx: broadcast::Sender<()>,
    trust_pem: Option<Vec<u8>>,
}

impl ServerHandle {
    pub(crate) fn shutdown(&self) {
        // no receiver means the accept loop already stopped
        let _ = self.shutdown_tx.send(());
    }
}

/// Build a router from `options` and start serving it.
pub async fn new_server(options: StubOptions) -> Result<Router, StubError> {
    let router = Router::new(options).await?;
    router.start().await?;
    Ok(router)
}

/// Like [`new_server`], always over TLS.
pub async fn new_tls_server(options: StubOptions) -> Result<Router, StubError> {
    new_server(options.use_tls()).await
}

impl Router {
    /// Start serving, over TLS when the options ask for it. Returns the URL.
    pub async fn start(&self) -> Result<String, StubError> {
        self.serve(self.inner.options.use_tls).await
    }

    /// Start serving over TLS regardless of the options.
    pub async fn start_tls(&self) -> Result<String, StubError> {
        self.serve(true).await
    }

    /// Base URL of the running server, including the base path.
    pub fn url(&self) -> Result<String, StubError> {
        self.inner
            .server
            .lock()
            .as_ref()
            .map(|s| s.url.clone())
            .ok_or(StubError::ServerNotStarted)
    }

    pub fn addr(&self) -> Result<SocketAddr, StubError> {
        self.inner
            .server
            .lock()
            .as_ref()
            .map(|s| s.addr)
            .ok_or(StubError::ServerNotStarted)
    }

    /// A client that trusts the running server's certificate and presents
    /// the configured client certificate.
    pub fn client(&self) -> Result<reqwest::Client, StubError> {
        let trust = self
            .inner
            .server
            .lock()
            .as_ref()
            .and_then(|s| s.trust_pem.clone());
        tls::client(&self.inner.options, trust.as_deref())
    }

    /// Stop accepting connections.
    pub fn close(&self) -> Result<(), StubError> {
        let server = self
            .inner
            .server
            .lock()
            .take()
            .ok_or(StubError::ServerNotStarted)?;
        server.shutdown();
        Ok(())
    }

    async fn serve(&self, use_tls: bool) -> Result<String, StubError> {
        if self.inner.server.lock().is_some() {
            return Err(StubError::ServerAlreadyStarted);
        }

        let server_tls = if use_tls {
            Some(tls::server_tls(&self.inner.options)?)
        } else {
            None
        };

        let bind_addr = self
            .inner
            .options
            .addr
            .clone()
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| StubError::Bind(bind_addr.clone(), e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| StubError::Bind(bind_addr.clone(), e))?;

        let scheme = if use_tls { "https" } else { "http" };
        let url = format!("{scheme}://{addr}{}", self.inner.options.base_path);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (acceptor, trust_pem) = match server_tls {
            Some(t) => (Some(t.acceptor), Some(t.trust_pem)),
            None => (None, None),
        };

        {
            let mut server = self.inner.server.lock();
            if server.is_some() {
                return Err(StubError::ServerAlreadyStarted);
            }
            *server = Some(ServerHandle {
                addr,
                url: url.clone(),
                shutdown_tx: shutdown_tx.clone(),
                trust_pem,
            });
        }

        let shutdown_rx = shutdown_tx.subscribe();
        let router = std::sync::Arc::downgrade(&self.inner);
        tokio::spawn(accept_loop(listener, acceptor, router, shutdown_rx));

        info!("Stub server listening on {}", url);
        Ok(url)
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    router: Weak<RouterInner>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote)) => {
                        let router = router.clone();
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            match acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => serve_connection(tls_stream, remote, router).await,
                                    Err(e) => debug!("TLS handshake failed from {}: {}", remote, e),
                                },
                                None => serve_connection(stream, remote, router).await,
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error on {}: {}", local, e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Stub server on {} shutting down", local);
                break;
            }
        }
    }
}

async fn serve_connection<I>(io: I, remote: SocketAddr, router: Weak<RouterInner>)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| handle_request(req, router.clone()));
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        debug!("Connection error from {}: {}", remote, e);
    }
}

async fn handle_request(
    req: Request<Incoming>,
    router: Weak<RouterInner>,
) -> Result<Response<Full<Bytes>>, StubError> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!("Failed to read request body: {}", e);
            return Ok(plain_response(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
            ));
        }
    };

    let inner = router.upgrade().ok_or(StubError::ServerNotStarted)?;
    let router = Router { inner };

    let mut snapshot = StubRequest::new(parts.method, parts.uri, parts.headers, body);
    let base = router.inner.options.base_path.as_str();
    if !base.is_empty() {
        let Some(rest) = strip_base_path(snapshot.path(), base) else {
            debug!("{} is outside base path {}", snapshot.path(), base);
            return Ok(plain_response(StatusCode::NOT_FOUND, "Not Found"));
        };
        let rest = rest.to_string();
        snapshot = snapshot.with_path(&rest);
    }

    let method = snapshot.method().to_string();
    let path = snapshot.path().to_string();
    match router.dispatch(snapshot) {
        Some(res) => Ok(res.into_hyper()),
        None => Err(StubError::Unmatched { method, path }),
    }
}

/// The path below `base`, keeping the leading `/`.
fn strip_base_path<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    path.strip_prefix(base).filter(|rest| rest.starts_with('/'))
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
