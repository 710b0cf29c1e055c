#![allow(dead_code)]

use rift_stub::{Router, StubOptions};

pub fn testdata(name: &str) -> String {
    format!("{}/tests/testdata/{}", env!("CARGO_MANIFEST_DIR"), name)
}

/// Build and start a router over the named fixture.
pub async fn contract_server(fixture: &str, options: StubOptions) -> Router {
    let router = Router::new(options.openapi3(&testdata(fixture)))
        .await
        .expect("router should build");
    router.start().await.expect("server should start");
    router
}

pub async fn plain_server() -> Router {
    let router = Router::new(StubOptions::new())
        .await
        .expect("router should build");
    router.start().await.expect("server should start");
    router
}
