mod common;

use assert_json_diff::assert_json_eq;
use common::{contract_server, plain_server, testdata};
use hyper::StatusCode;
use rift_stub::{ContractError, FailureKind, ResponseMode, Router, StubError, StubOptions};
use serde_json::{json, Value};

#[tokio::test]
async fn test_matcher_response_example() {
    let router = contract_server(
        "openapi3.yml",
        StubOptions::new().response_mode(ResponseMode::ExamplesOnly),
    )
    .await;
    router.method("GET").path("/users/*").response_example("404").unwrap();
    router.method("GET").path("/users").response_example("200").unwrap();

    let client = router.client().unwrap();
    let url = router.url().unwrap();

    let res = client.get(format!("{url}/users/7")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_json_eq!(body, json!({"error": "not found"}));

    let res = client.get(format!("{url}/users")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_json_eq!(
        body,
        json!([{"id": 1, "username": "alice"}, {"id": 2, "username": "bob"}])
    );
    router.assert_no_failures();
}

#[tokio::test]
async fn test_router_response_example_uses_server_prefix() {
    let router = contract_server("openapi3.yml", StubOptions::new()).await;
    router.response_example("200").unwrap();

    let client = router.client().unwrap();
    let url = router.url().unwrap();
    let res = client
        .get(format!("{url}/api/v1/users/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_json_eq!(body, json!({"id": 1, "username": "alice"}));
    router.assert_no_failures();
}

#[tokio::test]
async fn test_base_path_with_contract_example() {
    let router = contract_server("openapi3.yml", StubOptions::new().base_path("/gateway")).await;
    router.response_example("201").unwrap();

    let client = router.client().unwrap();
    let url = router.url().unwrap();
    let res = client
        .post(format!("{url}/users"))
        .json(&json!({"username": "carol"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_json_eq!(body, json!({"id": 3, "username": "carol"}));
    router.assert_no_failures();
}

#[tokio::test]
async fn test_examples_only_uses_first_example() {
    for _ in 0..3 {
        let router = contract_server(
            "openapi3-multi-examples.yml",
            StubOptions::new().response_mode(ResponseMode::ExamplesOnly),
        )
        .await;
        router.response_dynamic("200").unwrap();
        let url = router.url().unwrap();
        let body: Value = router
            .client()
            .unwrap()
            .get(format!("{url}/greetings"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_json_eq!(body, json!({"message": "hello"}));
    }
}

#[tokio::test]
async fn test_prefer_examples_and_always_generate() {
    let prefer = contract_server(
        "openapi3.yml",
        StubOptions::new().response_mode(ResponseMode::PreferExamples),
    )
    .await;
    prefer.response_dynamic("200").unwrap();
    let url = prefer.url().unwrap();
    let body: Value = prefer
        .client()
        .unwrap()
        .get(format!("{url}/users/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_json_eq!(body, json!({"id": 1, "username": "alice"}));

    let generate = contract_server("openapi3.yml", StubOptions::new().seed(7)).await;
    generate.response_dynamic("200").unwrap();
    let url = generate.url().unwrap();
    let body: Value = generate
        .client()
        .unwrap()
        .get(format!("{url}/users/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = body["id"].as_i64().unwrap();
    assert!((1..=100).contains(&id));
    let username = body["username"].as_str().unwrap();
    assert!((3..=16).contains(&username.len()));
    generate.assert_no_failures();
}

#[tokio::test]
async fn test_always_generate_ignores_examples_and_conforms() {
    let router = contract_server(
        "openapi3.yml",
        StubOptions::new().response_mode(ResponseMode::AlwaysGenerate),
    )
    .await;
    router.response_dynamic("200").unwrap();
    let client = router.client().unwrap();
    let url = router.url().unwrap();
    let example = json!({"id": 1, "username": "alice"});

    let trials = 20;
    let mut differing = 0;
    for _ in 0..trials {
        let res = client.get(format!("{url}/users/1")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert!(body["id"].as_i64().unwrap() >= 1);
        if body != example {
            differing += 1;
        }
    }
    assert!(differing >= trials - 2, "only {differing} of {trials} bodies differ");
    assert_eq!(router.requests().len(), trials);
    router.assert_no_failures();
}

async fn fetch_sequence(seed: u64) -> Vec<(u16, String)> {
    let router = contract_server(
        "openapi3-dynamic.yml",
        StubOptions::new().seed(seed),
    )
    .await;
    router.path("/status").response_dynamic("*").unwrap();
    router.response_dynamic("200").unwrap();

    let client = router.client().unwrap();
    let url = router.url().unwrap();
    let mut out = Vec::new();
    for path in ["/strings", "/numbers", "/status", "/tags", "/status", "/pets"] {
        let res = client.get(format!("{url}{path}")).send().await.unwrap();
        out.push((res.status().as_u16(), res.text().await.unwrap()));
    }
    out
}

#[tokio::test]
async fn test_seed_reproduces_responses() {
    let first = fetch_sequence(12345).await;
    let second = fetch_sequence(12345).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_generated_values_respect_constraints() {
    let router = contract_server("openapi3-dynamic.yml", StubOptions::new()).await;
    router.response_dynamic("200").unwrap();
    let client = router.client().unwrap();
    let url = router.url().unwrap();

    for _ in 0..10 {
        let strings: Value = client
            .get(format!("{url}/strings"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let code = strings["code"].as_str().unwrap();
        assert!((5..=8).contains(&code.len()));
        assert!(["red", "green", "blue"].contains(&strings["tag"].as_str().unwrap()));
        assert!(strings["email"].as_str().unwrap().ends_with("@example.com"));
        assert!(uuid::Uuid::parse_str(strings["id"].as_str().unwrap()).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(strings["created"].as_str().unwrap()).is_ok());
        assert!(
            chrono::NaiveDate::parse_from_str(strings["day"].as_str().unwrap(), "%Y-%m-%d")
                .is_ok()
        );

        let numbers: Value = client
            .get(format!("{url}/numbers"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let count = numbers["count"].as_i64().unwrap();
        assert!((10..=20).contains(&count));
        let ratio = numbers["ratio"].as_f64().unwrap();
        assert!((0.0..1.0).contains(&ratio));
        assert_eq!(numbers["step"].as_i64().unwrap() % 5, 0);

        let tags: Value = client
            .get(format!("{url}/tags"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let len = tags.as_array().unwrap().len();
        assert!((2..=4).contains(&len));

        let pet: Value = client
            .get(format!("{url}/pets"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(pet["name"].is_string());
        let lives = pet["lives"].as_i64().unwrap();
        assert!((1..=9).contains(&lives));
    }
    router.assert_no_failures();
}

#[tokio::test]
async fn test_status_pattern_selection() {
    let router = contract_server("openapi3-dynamic.yml", StubOptions::new()).await;
    let success = router.query("want", "2xx");
    success.response_dynamic("2*").unwrap();
    let missing = router.query("want", "404");
    missing.response_dynamic("404").unwrap();
    router.query("want", "5xx").response_dynamic("5*").unwrap();

    let client = router.client().unwrap();
    let url = router.url().unwrap();
    for _ in 0..10 {
        let res = client
            .get(format!("{url}/status?want=2xx"))
            .send()
            .await
            .unwrap();
        assert!(matches!(res.status().as_u16(), 200 | 201));
    }

    let res = client
        .get(format!("{url}/status?want=404"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].is_string());
    router.assert_no_failures();

    let res = client
        .get(format!("{url}/status?want=5xx"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.text().await.unwrap().is_empty());
    let failures = router.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Synthesis);
    assert!(failures[0].message.contains("5*"));
}

#[tokio::test]
async fn test_text_plain_and_no_content() {
    let router = contract_server("openapi3-dynamic.yml", StubOptions::new()).await;
    router.response_dynamic("*").unwrap();
    let client = router.client().unwrap();
    let url = router.url().unwrap();

    let res = client.get(format!("{url}/ping")).send().await.unwrap();
    assert_eq!(res.headers()["content-type"], "text/plain");
    let text = res.text().await.unwrap();
    assert_eq!(text.len(), 4);
    assert!(!text.starts_with('"'));

    let res = client
        .delete(format!("{url}/items/abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(res.headers().get("content-type").is_none());
    assert!(res.bytes().await.unwrap().is_empty());
    router.assert_no_failures();
}

#[tokio::test]
async fn test_validation_reports_violations() {
    let router = contract_server("openapi3.yml", StubOptions::new()).await;
    router
        .method("GET")
        .path("/users/*")
        .response(200, json!({"id": "not-a-number"}));
    router.method("GET").path("/users").response(200, json!([]));
    router.method("POST").path("/users").response_example("400").unwrap();
    router.path("/unknown").response_string(200, "ok");

    let client = router.client().unwrap();
    let url = router.url().unwrap();

    // the response is delivered even though it violates the contract
    let res = client.get(format!("{url}/users/1")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_json_eq!(body, json!({"id": "not-a-number"}));
    let failures = router.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::ResponseViolation);
    assert!(failures[0].message.contains("body.id: expected integer, got string"));
    assert!(failures[0].message.contains("body.username"));
    router.clear_failures();

    client.get(format!("{url}/users?page=abc")).send().await.unwrap();
    let failures = router.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::RequestViolation);
    assert!(failures[0].message.contains("query.page"));
    router.clear_failures();

    client.post(format!("{url}/users")).send().await.unwrap();
    let failures = router.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("request body is required"));
    router.clear_failures();

    client.get(format!("{url}/unknown")).send().await.unwrap();
    let failures = router.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("failed to find route for GET /unknown"));
}

#[tokio::test]
async fn test_skip_validation_flags() {
    let router = contract_server(
        "openapi3.yml",
        StubOptions::new()
            .skip_validate_request(true)
            .skip_validate_response(true),
    )
    .await;
    router.path("/users/*").response(200, json!({"id": "x"}));
    let client = router.client().unwrap();
    let url = router.url().unwrap();
    client
        .get(format!("{url}/users/1"))
        .send()
        .await
        .unwrap();
    router.assert_no_failures();
}

#[tokio::test]
async fn test_contract_responses_need_a_contract() {
    let router = plain_server().await;
    assert!(matches!(
        router.response_dynamic("200"),
        Err(StubError::NoContract)
    ));
    assert!(matches!(
        router.path("/x").response_example("200"),
        Err(StubError::NoContract)
    ));
}

#[tokio::test]
async fn test_circular_references() {
    let err = Router::new(StubOptions::new().openapi3(&testdata("openapi3-circular.yml")))
        .await
        .unwrap_err();
    match err {
        StubError::Contract(ContractError::CircularReference(chain)) => {
            assert!(chain.contains("Node"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let router = Router::new(
        StubOptions::new()
            .openapi3(&testdata("openapi3-circular.yml"))
            .skip_circular_reference_check(true),
    )
    .await
    .unwrap();
    assert!(router.contract().is_some());
}

#[tokio::test]
async fn test_contract_from_url_and_bytes() {
    let yaml = std::fs::read_to_string(testdata("openapi3-multi-examples.yml")).unwrap();

    let host = plain_server().await;
    host.path("/openapi.yml").response_string(200, yaml.clone());
    let location = format!("{}/openapi.yml", host.url().unwrap());

    let remote = Router::new(StubOptions::new().openapi3(&location))
        .await
        .unwrap();
    let from_bytes = Router::new(StubOptions::new().openapi3_from_data(yaml))
        .await
        .unwrap();
    for router in [remote, from_bytes] {
        let contract = router.contract().unwrap();
        assert_eq!(contract.operations().len(), 1);
        assert_eq!(contract.operations()[0].path, "/greetings");
    }
}

#[tokio::test]
async fn test_missing_contract_file() {
    let err = Router::new(StubOptions::new().openapi3(&testdata("does-not-exist.yml")))
        .await
        .unwrap_err();
    assert!(matches!(err, StubError::Contract(ContractError::Io(_, _))));
}
