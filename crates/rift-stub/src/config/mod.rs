//! Construction-time options for a stub router.

mod file;
mod mode;

pub use file::{StubConfigFile, TlsFiles};
pub use mode::ResponseMode;

use crate::error::StubError;
use crate::reporter::Reporter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the contract document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractSource {
    Path(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
}

impl ContractSource {
    /// Interpret a location string: `http(s)://` URLs are fetched, anything
    /// else is a local path.
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            ContractSource::Url(location.to_string())
        } else {
            ContractSource::Path(PathBuf::from(location))
        }
    }

    /// Human-readable description used in logs and errors.
    pub fn describe(&self) -> String {
        match self {
            ContractSource::Path(p) => p.display().to_string(),
            ContractSource::Url(u) => u.clone(),
            ContractSource::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

/// A PEM certificate chain together with its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemPair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Options recognized when building a [`crate::Router`].
#[derive(Clone, Default)]
pub struct StubOptions {
    pub use_tls: bool,
    /// Server certificate and key.
    pub certificate: Option<PemPair>,
    /// CA the client should trust for the server certificate.
    pub ca_cert: Option<Vec<u8>>,
    /// Certificate and key the client presents.
    pub client_certificate: Option<PemPair>,
    /// CA the server uses to verify client certificates (enables mutual TLS).
    pub client_ca_cert: Option<Vec<u8>>,
    /// Fixed listen address; an ephemeral loopback port when unset.
    pub addr: Option<String>,
    /// Prefix stripped from the request path before dispatch.
    pub base_path: String,
    pub contract: Option<ContractSource>,
    pub skip_validate_request: bool,
    pub skip_validate_response: bool,
    pub skip_circular_reference_check: bool,
    pub seed: Option<u64>,
    pub response_mode: ResponseMode,
    pub reporter: Option<Arc<dyn Reporter>>,
}

impl StubOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a YAML or JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StubError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StubError::Options(format!("{}: {e}", path.display())))?;
        let file: StubConfigFile = serde_yaml::from_str(&contents)
            .map_err(|e| StubError::Options(format!("{}: {e}", path.display())))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        file.into_options(base_dir)
    }

    pub fn use_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    pub fn certificates(mut self, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.certificate = Some(PemPair {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    /// Enable TLS with the given server certificate and key.
    pub fn use_tls_with_certificates(
        self,
        cert: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
    ) -> Self {
        self.use_tls().certificates(cert, key)
    }

    pub fn ca_cert(mut self, ca: impl Into<Vec<u8>>) -> Self {
        self.ca_cert = Some(ca.into());
        self
    }

    pub fn client_certificates(
        mut self,
        cert: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
    ) -> Self {
        self.client_certificate = Some(PemPair {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    pub fn client_ca_cert(mut self, ca: impl Into<Vec<u8>>) -> Self {
        self.client_ca_cert = Some(ca.into());
        self
    }

    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Load the contract from a local path or an `http(s)://` URL.
    pub fn openapi3(mut self, location: &str) -> Self {
        self.contract = Some(ContractSource::from_location(location));
        self
    }

    /// Load the contract from raw bytes (JSON or YAML).
    pub fn openapi3_from_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.contract = Some(ContractSource::Bytes(data.into()));
        self
    }

    pub fn skip_validate_request(mut self, skip: bool) -> Self {
        self.skip_validate_request = skip;
        self
    }

    pub fn skip_validate_response(mut self, skip: bool) -> Self {
        self.skip_validate_response = skip;
        self
    }

    pub fn skip_circular_reference_check(mut self, skip: bool) -> Self {
        self.skip_circular_reference_check = skip;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Check the options that can be validated without I/O.
    pub fn validate(&self) -> Result<(), StubError> {
        let base = &self.base_path;
        if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
            return Err(StubError::InvalidBasePath(base.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for StubOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubOptions")
            .field("use_tls", &self.use_tls)
            .field("certificate", &self.certificate.is_some())
            .field("ca_cert", &self.ca_cert.is_some())
            .field("client_certificate", &self.client_certificate.is_some())
            .field("client_ca_cert", &self.client_ca_cert.is_some())
            .field("addr", &self.addr)
            .field("base_path", &self.base_path)
            .field("contract", &self.contract.as_ref().map(|c| c.describe()))
            .field("skip_validate_request", &self.skip_validate_request)
            .field("skip_validate_response", &self.skip_validate_response)
            .field(
                "skip_circular_reference_check",
                &self.skip_circular_reference_check,
            )
            .field("seed", &self.seed)
            .field("response_mode", &self.response_mode)
            .finish()
    }
}
