//! TLS utilities for the stub server.
//!
//! Certificates and keys are handled as PEM bytes. Without an explicit
//! server certificate a throwaway CA is generated together with a leaf for
//! `localhost` and `127.0.0.1`; the client factory trusts that CA.

use crate::config::{PemPair, StubOptions};
use crate::error::StubError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// A generated CA and a server identity it signed.
#[derive(Debug, Clone)]
pub struct SelfSigned {
    pub ca_cert: Vec<u8>,
    pub identity: PemPair,
}

/// Server-side TLS state plus the PEM a client should trust.
pub(crate) struct ServerTls {
    pub(crate) acceptor: TlsAcceptor,
    pub(crate) trust_pem: Vec<u8>,
}

/// Parse every certificate in a PEM bundle.
pub fn load_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, StubError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| StubError::Tls(format!("Failed to parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(StubError::Tls("No certificates found in PEM data".to_string()));
    }
    Ok(certs)
}

/// Parse the first PKCS#8, PKCS#1 or SEC1 private key in a PEM bundle.
pub fn load_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, StubError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| StubError::Tls(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| StubError::Tls("No private key found in PEM data".to_string()))
}

/// Generate a CA and a leaf certificate for `localhost` / `127.0.0.1`.
pub fn self_signed() -> Result<SelfSigned, StubError> {
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
    };

    let tls_err = |e: rcgen::Error| StubError::Tls(format!("Failed to generate certificate: {e}"));

    let ca_key = KeyPair::generate().map_err(tls_err)?;
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).map_err(tls_err)?;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "rift-stub test CA");
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::CrlSign,
    ];
    let ca = ca_params.self_signed(&ca_key).map_err(tls_err)?;

    let leaf_key = KeyPair::generate().map_err(tls_err)?;
    let mut leaf_params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .map_err(tls_err)?;
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "rift-stub");
    let leaf = leaf_params
        .signed_by(&leaf_key, &ca, &ca_key)
        .map_err(tls_err)?;

    Ok(SelfSigned {
        ca_cert: ca.pem().into_bytes(),
        identity: PemPair {
            cert: leaf.pem().into_bytes(),
            key: leaf_key.serialize_pem().into_bytes(),
        },
    })
}

/// Build the server TLS acceptor described by `options`.
///
/// A `client_ca_cert` turns on mutual TLS: clients must present a
/// certificate issued by that CA.
pub(crate) fn server_tls(options: &StubOptions) -> Result<ServerTls, StubError> {
    let (identity, trust_pem) = match &options.certificate {
        Some(pair) => {
            let trust = options.ca_cert.clone().unwrap_or_else(|| pair.cert.clone());
            (pair.clone(), trust)
        }
        None => {
            debug!("No server certificate configured, generating a self-signed one");
            let generated = self_signed()?;
            (generated.identity, generated.ca_cert)
        }
    };

    let certs = load_certs(&identity.cert)?;
    let key = load_key(&identity.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| StubError::Tls(format!("Failed to build TLS configuration: {e}")))?;

    let builder = match &options.client_ca_cert {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca)? {
                roots
                    .add(cert)
                    .map_err(|e| StubError::Tls(format!("Invalid client CA: {e}")))?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| StubError::Tls(format!("Failed to build client verifier: {e}")))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| StubError::Tls(format!("Failed to build TLS configuration: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(ServerTls {
        acceptor: TlsAcceptor::from(Arc::new(config)),
        trust_pem,
    })
}

/// Build a `reqwest` client for the stub server.
///
/// With `trust_pem` set the client trusts it (and any configured
/// `ca_cert`); a configured client certificate is presented.
pub(crate) fn client(
    options: &StubOptions,
    trust_pem: Option<&[u8]>,
) -> Result<reqwest::Client, StubError> {
    let client_err = |e: reqwest::Error| StubError::Client(e.to_string());
    let mut builder = reqwest::Client::builder().use_rustls_tls();

    let roots = trust_pem.into_iter().chain(options.ca_cert.as_deref());
    for pem in roots {
        for cert in reqwest::Certificate::from_pem_bundle(pem).map_err(client_err)? {
            builder = builder.add_root_certificate(cert);
        }
    }

    if let Some(pair) = &options.client_certificate {
        let mut pem = pair.cert.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&pair.key);
        builder = builder.identity(reqwest::Identity::from_pem(&pem).map_err(client_err)?);
    }

    builder.build().map_err(client_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_material_parses() {
        let generated = self_signed().unwrap();
        assert_eq!(load_certs(&generated.ca_cert).unwrap().len(), 1);
        assert_eq!(load_certs(&generated.identity.cert).unwrap().len(), 1);
        assert!(load_key(&generated.identity.key).is_ok());
    }

    #[test]
    fn test_load_certs_rejects_empty_input() {
        assert!(matches!(load_certs(b"not a pem"), Err(StubError::Tls(_))));
        assert!(matches!(load_key(b""), Err(StubError::Tls(_))));
    }

    #[test]
    fn test_server_tls_trusts_generated_ca() {
        let tls = server_tls(&StubOptions::new().use_tls()).unwrap();
        assert!(String::from_utf8(tls.trust_pem)
            .unwrap()
            .contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_server_tls_with_explicit_certificate() {
        let generated = self_signed().unwrap();
        let options = StubOptions::new()
            .use_tls_with_certificates(
                generated.identity.cert.clone(),
                generated.identity.key.clone(),
            )
            .ca_cert(generated.ca_cert.clone())
            .client_ca_cert(generated.ca_cert.clone());
        let tls = server_tls(&options).unwrap();
        assert_eq!(tls.trust_pem, generated.ca_cert);
    }

    #[test]
    fn test_server_tls_rejects_bad_key() {
        let generated = self_signed().unwrap();
        let options =
            StubOptions::new().use_tls_with_certificates(generated.identity.cert, "garbage");
        assert!(matches!(server_tls(&options), Err(StubError::Tls(_))));
    }
}
