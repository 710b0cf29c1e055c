//! File-based options (YAML or JSON).
//!
//! Certificate material is referenced by path and read when the file is
//! turned into [`StubOptions`]. Relative paths resolve against the directory
//! of the options file.

use super::{ContractSource, PemPair, ResponseMode, StubOptions};
use crate::error::StubError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// PEM certificate and key file paths.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsFiles {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StubConfigFile {
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<TlsFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<TlsFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca_cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default)]
    pub base_path: String,
    /// Local path or `http(s)://` URL of the OpenAPI document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapi3: Option<String>,
    #[serde(default)]
    pub skip_validate_request: bool,
    #[serde(default)]
    pub skip_validate_response: bool,
    #[serde(default)]
    pub skip_circular_reference_check: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub response_mode: ResponseMode,
}

impl StubConfigFile {
    pub fn into_options(self, base_dir: &Path) -> Result<StubOptions, StubError> {
        let read = |path: &str| -> Result<Vec<u8>, StubError> {
            let full = base_dir.join(path);
            std::fs::read(&full).map_err(|e| StubError::Options(format!("{}: {e}", full.display())))
        };
        let read_pair = |files: &TlsFiles| -> Result<PemPair, StubError> {
            Ok(PemPair {
                cert: read(&files.cert_path)?,
                key: read(&files.key_path)?,
            })
        };

        let contract = self.openapi3.as_deref().map(|location| {
            match ContractSource::from_location(location) {
                ContractSource::Path(p) if p.is_relative() => {
                    ContractSource::Path(base_dir.join(p))
                }
                other => other,
            }
        });

        let options = StubOptions {
            use_tls: self.use_tls,
            certificate: self.certificate.as_ref().map(read_pair).transpose()?,
            ca_cert: self.ca_cert_path.as_deref().map(read).transpose()?,
            client_certificate: self.client_certificate.as_ref().map(read_pair).transpose()?,
            client_ca_cert: self.client_ca_cert_path.as_deref().map(read).transpose()?,
            addr: self.addr,
            base_path: self.base_path,
            contract,
            skip_validate_request: self.skip_validate_request,
            skip_validate_response: self.skip_validate_response,
            skip_circular_reference_check: self.skip_circular_reference_check,
            seed: self.seed,
            response_mode: self.response_mode,
            reporter: None,
        };
        options.validate()?;
        Ok(options)
    }
}
