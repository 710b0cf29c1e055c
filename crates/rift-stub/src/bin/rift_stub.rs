//! Rift Stub CLI
//!
//! Serves an OpenAPI 3 contract with synthesized responses until Ctrl-C.
//!
//! Usage:
//!   rift-stub --contract openapi.yml --addr 127.0.0.1:8080 [OPTIONS]

use anyhow::Context;
use clap::Parser;
use rift_stub::{ResponseMode, Router, StubOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rift Stub - serve an OpenAPI contract as a stub server
#[derive(Parser, Debug)]
#[command(name = "rift-stub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Contract location: a local path or an http(s) URL
    #[arg(short, long, env = "RIFT_STUB_CONTRACT")]
    contract: Option<String>,

    /// Listen address (an ephemeral loopback port when omitted)
    #[arg(short, long, env = "RIFT_STUB_ADDR")]
    addr: Option<String>,

    /// YAML or JSON options file; flags override its values
    #[arg(long)]
    config: Option<String>,

    /// Seed for reproducible responses
    #[arg(long)]
    seed: Option<u64>,

    /// Response policy: alwaysGenerate, examplesOnly or preferExamples
    #[arg(short, long)]
    mode: Option<ResponseMode>,

    /// Status pattern to answer with, e.g. 200, 2?? or *
    #[arg(short, long, default_value = "*")]
    status: String,

    /// Path prefix stripped before dispatch, e.g. /api
    #[arg(long)]
    base_path: Option<String>,

    /// Serve over TLS (self-signed unless the config file names a certificate)
    #[arg(long)]
    tls: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut options = match &args.config {
        Some(path) => StubOptions::from_file(path)
            .with_context(|| format!("Failed to load options from {path}"))?,
        None => StubOptions::new(),
    };
    if let Some(contract) = &args.contract {
        options = options.openapi3(contract);
    }
    if let Some(addr) = args.addr {
        options = options.addr(addr);
    }
    if let Some(seed) = args.seed {
        options = options.seed(seed);
    }
    if let Some(mode) = args.mode {
        options = options.response_mode(mode);
    }
    if let Some(base_path) = args.base_path {
        options = options.base_path(base_path);
    }
    if args.tls {
        options = options.use_tls();
    }
    if options.contract.is_none() {
        anyhow::bail!("No contract given: pass --contract or set openapi3 in the config file");
    }

    let router = Router::new(options)
        .await
        .context("Failed to build stub router")?;
    router
        .response_dynamic(&args.status)
        .context("Failed to register contract responder")?;
    let url = router.start().await.context("Failed to start stub server")?;

    tracing::info!(url = %url, seed = router.seed(), "rift-stub ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    router.close()?;
    tracing::info!("rift-stub stopped");
    Ok(())
}
