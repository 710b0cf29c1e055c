use hyper::StatusCode;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rift_stub::tls::self_signed;
use rift_stub::{new_tls_server, Router, StubOptions};

struct ClientIdentity {
    ca_pem: String,
    cert_pem: String,
    key_pem: String,
}

fn client_identity() -> ClientIdentity {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "client CA");
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, "client");
    let cert = params.signed_by(&key, &ca, &ca_key).unwrap();

    ClientIdentity {
        ca_pem: ca.pem(),
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

#[tokio::test]
async fn test_tls_server_with_generated_certificate() {
    let router = new_tls_server(StubOptions::new()).await.unwrap();
    router.path("/secure").response_string(200, "hello tls");

    let url = router.url().unwrap();
    assert!(url.starts_with("https://127.0.0.1:"));

    let res = router
        .client()
        .unwrap()
        .get(format!("{url}/secure"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "hello tls");
    router.assert_no_failures();
}

#[tokio::test]
async fn test_tls_server_rejects_untrusting_client() {
    let router = new_tls_server(StubOptions::new()).await.unwrap();
    router.path("/*").response_string(200, "ok");

    let url = router.url().unwrap();
    let untrusting = reqwest::Client::builder()
        .use_rustls_tls()
        .build()
        .unwrap();
    assert!(untrusting.get(format!("{url}/x")).send().await.is_err());
    assert!(router.requests().is_empty());
}

#[tokio::test]
async fn test_tls_with_explicit_certificates() {
    let generated = self_signed().unwrap();
    let options = StubOptions::new()
        .use_tls_with_certificates(generated.identity.cert, generated.identity.key)
        .ca_cert(generated.ca_cert);
    let router = Router::new(options).await.unwrap();
    router.path("/*").response_string(200, "explicit");
    let url = router.start().await.unwrap();

    let res = router
        .client()
        .unwrap()
        .get(format!("{url}/any"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "explicit");
}

#[tokio::test]
async fn test_start_tls_overrides_options() {
    let router = Router::new(StubOptions::new()).await.unwrap();
    router.path("/*").response_string(200, "ok");
    let url = router.start_tls().await.unwrap();
    assert!(url.starts_with("https://"));
    let res = router.client().unwrap().get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_mutual_tls() {
    let client = client_identity();
    let options = StubOptions::new()
        .client_ca_cert(client.ca_pem.clone())
        .client_certificates(client.cert_pem.clone(), client.key_pem.clone());
    let router = new_tls_server(options).await.unwrap();
    router.path("/mtls").response_string(200, "verified");
    let url = router.url().unwrap();

    let res = router
        .client()
        .unwrap()
        .get(format!("{url}/mtls"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "verified");
    assert_eq!(router.requests().len(), 1);
}

#[tokio::test]
async fn test_mutual_tls_rejects_missing_client_certificate() {
    let client = client_identity();
    let server = self_signed().unwrap();
    let options = StubOptions::new()
        .use_tls_with_certificates(server.identity.cert, server.identity.key)
        .ca_cert(server.ca_cert.clone())
        .client_ca_cert(client.ca_pem);
    let router = new_tls_server(options).await.unwrap();
    router.path("/*").response_string(200, "should not be served");
    let url = router.url().unwrap();

    let anonymous = reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(reqwest::Certificate::from_pem(&server.ca_cert).unwrap())
        .build()
        .unwrap();
    assert!(anonymous.get(format!("{url}/x")).send().await.is_err());
    assert!(router.requests().is_empty());
}
