//! Provider-side verification flow tests, with wiremock standing in for the
//! live provider.

use pact_engine::{
    Contract, Interaction, Matcher, MismatchReason, ProviderState, Request, Response,
    StateHandlers, Verifier, VerifierConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer as ProviderStub, ResponseTemplate};

fn simple_interaction(description: &str, route: &str, status: u16) -> Interaction {
    Interaction::new(description, Request::new("GET", route), Response::new(status))
}

fn grant_contract() -> Contract {
    let mut contract = Contract::new("retention-service", "promotion-provider");
    contract
        .add_interaction(
            Interaction::new(
                "Grant promotion",
                Request::new("POST", "/api/v1/promotions/grant")
                    .with_header("Content-Type", Matcher::exact(json!("application/json")))
                    .with_body(Matcher::exact(json!({"userId": "u-123", "code": "WELCOME10"}))),
                Response::new(200)
                    .with_body(Matcher::exact(json!({"success": true, "bonusCents": 1000}))),
            )
            .given(ProviderState::named("User eligible for welcome bonus")),
        )
        .unwrap();
    contract
}

fn verifier_for(stub: &ProviderStub, handlers: StateHandlers) -> Verifier {
    Verifier::new(
        VerifierConfig::new(stub.uri()).with_run_deadline(Duration::from_secs(10)),
        handlers,
    )
    .unwrap()
}

#[tokio::test]
async fn test_failures_are_isolated_per_interaction() {
    let stub = ProviderStub::start().await;
    Mock::given(method("GET"))
        .and(path("/one"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&stub)
        .await;
    Mock::given(method("GET"))
        .and(path("/two"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&stub)
        .await;
    Mock::given(method("GET"))
        .and(path("/three"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&stub)
        .await;

    let mut contract = Contract::new("retention-service", "promotion-provider");
    contract.add_interaction(simple_interaction("one", "/one", 200)).unwrap();
    contract.add_interaction(simple_interaction("two", "/two", 200)).unwrap();
    contract.add_interaction(simple_interaction("three", "/three", 200)).unwrap();

    let report = verifier_for(&stub, StateHandlers::new()).verify(&contract).await;

    assert_eq!(report.results.len(), 3);
    assert!(report.results[0].passed);
    assert!(!report.results[1].passed);
    assert!(report.results[2].passed);
    assert!(!report.passed());

    let failure = &report.results[1];
    assert_eq!(failure.mismatches.len(), 1);
    assert_eq!(failure.mismatches[0].path, "$.status");
    assert_eq!(failure.mismatches[0].reason, MismatchReason::ValueMismatch);
}

#[tokio::test]
async fn test_grant_promotion_passes_against_exact_provider() {
    let stub = ProviderStub::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/promotions/grant"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "bonusCents": 1000})),
        )
        .mount(&stub)
        .await;

    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    let handlers = StateHandlers::new().register_fn("User eligible for welcome bonus", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let report = verifier_for(&stub, handlers).verify(&grant_contract()).await;

    assert!(report.passed());
    assert!(report.results[0].mismatches.is_empty());
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_grant_promotion_reports_every_field_mismatch_in_one_run() {
    let stub = ProviderStub::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/promotions/grant"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": false, "bonusCents": 0})),
        )
        .mount(&stub)
        .await;

    let handlers =
        StateHandlers::new().register_fn("User eligible for welcome bonus", |_| Ok(()));
    let report = verifier_for(&stub, handlers).verify(&grant_contract()).await;

    assert!(!report.passed());
    let mismatches = &report.results[0].mismatches;
    assert_eq!(mismatches.len(), 2);
    let mut paths: Vec<_> = mismatches.iter().map(|m| m.path.as_str()).collect();
    paths.sort_unstable();
    assert_eq!(paths, vec!["$.body.bonusCents", "$.body.success"]);
}

#[tokio::test]
async fn test_missing_state_handler_fails_only_that_interaction() {
    let stub = ProviderStub::start().await;
    Mock::given(method("GET"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&stub)
        .await;

    let mut contract = Contract::new("c", "p");
    contract
        .add_interaction(
            simple_interaction("needs state", "/anything", 200)
                .given(ProviderState::named("unregistered state")),
        )
        .unwrap();
    contract.add_interaction(simple_interaction("no state", "/healthy", 200)).unwrap();

    let report = verifier_for(&stub, StateHandlers::new()).verify(&contract).await;

    assert_eq!(report.results.len(), 2);
    assert!(!report.results[0].passed);
    assert_eq!(
        report.results[0].mismatches[0].reason,
        MismatchReason::MissingStateHandler
    );
    assert!(report.results[1].passed);
}

#[tokio::test]
async fn test_state_setup_failure_is_reported_and_run_continues() {
    let stub = ProviderStub::start().await;
    Mock::given(method("GET"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&stub)
        .await;

    let mut contract = Contract::new("c", "p");
    contract
        .add_interaction(
            simple_interaction("broken fixture", "/anything", 200)
                .given(ProviderState::named("database seeded").with_param("rows", json!(3))),
        )
        .unwrap();
    contract.add_interaction(simple_interaction("no state", "/healthy", 200)).unwrap();

    let handlers = StateHandlers::new().register_fn("database seeded", |params| {
        Err(format!("cannot seed {} rows", params["rows"]))
    });
    let report = verifier_for(&stub, handlers).verify(&contract).await;

    assert!(!report.results[0].passed);
    assert_eq!(
        report.results[0].mismatches[0].reason,
        MismatchReason::StateSetupFailed
    );
    assert!(report.results[1].passed);
}

#[tokio::test]
async fn test_transport_failure_is_a_network_error_result() {
    // Nothing listens on this port.
    let mut contract = Contract::new("c", "p");
    contract.add_interaction(simple_interaction("unreachable", "/ping", 200)).unwrap();

    let verifier = Verifier::new(
        VerifierConfig::new("http://127.0.0.1:9")
            .with_interaction_timeout(Duration::from_secs(2)),
        StateHandlers::new(),
    )
    .unwrap();
    let report = verifier.verify(&contract).await;

    assert!(!report.passed());
    assert_eq!(
        report.results[0].mismatches[0].reason,
        MismatchReason::NetworkError
    );
}

#[tokio::test]
async fn test_slow_provider_is_reported_as_timeout_and_run_continues() {
    let stub = ProviderStub::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&stub)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&stub)
        .await;

    let mut contract = Contract::new("c", "p");
    contract.add_interaction(simple_interaction("slow", "/slow", 200)).unwrap();
    contract.add_interaction(simple_interaction("fast", "/fast", 200)).unwrap();

    let verifier = Verifier::new(
        VerifierConfig::new(stub.uri())
            .with_interaction_timeout(Duration::from_millis(100))
            .with_run_deadline(Duration::from_secs(10)),
        StateHandlers::new(),
    )
    .unwrap();
    let report = verifier.verify(&contract).await;

    assert!(!report.results[0].passed);
    assert_eq!(report.results[0].mismatches[0].reason, MismatchReason::Timeout);
    assert!(report.results[1].passed);
}

#[tokio::test]
async fn test_run_deadline_exhaustion_reports_remaining_interactions_as_timeouts() {
    let stub = ProviderStub::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&stub)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&stub)
        .await;

    let mut contract = Contract::new("c", "p");
    contract.add_interaction(simple_interaction("slow", "/slow", 200)).unwrap();
    contract.add_interaction(simple_interaction("fast one", "/fast", 200)).unwrap();
    contract.add_interaction(simple_interaction("fast two", "/fast", 200)).unwrap();

    let verifier = Verifier::new(
        VerifierConfig::new(stub.uri()).with_run_deadline(Duration::from_millis(50)),
        StateHandlers::new(),
    )
    .unwrap();
    let report = verifier.verify(&contract).await;

    // The slow interaction burns the whole deadline; the rest still get a
    // result each, all reported as timeouts.
    assert_eq!(report.results.len(), 3);
    for result in &report.results {
        assert!(!result.passed, "{} should not pass", result.description);
        assert_eq!(result.mismatches[0].reason, MismatchReason::Timeout);
    }
}

#[tokio::test]
async fn test_blocking_state_setup_is_bounded_by_the_step_budget() {
    let stub = ProviderStub::start().await;
    Mock::given(method("GET"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&stub)
        .await;

    let mut contract = Contract::new("c", "p");
    contract
        .add_interaction(
            simple_interaction("stuck fixture", "/healthy", 200)
                .given(ProviderState::named("fixture that hangs")),
        )
        .unwrap();
    contract.add_interaction(simple_interaction("no state", "/healthy", 200)).unwrap();

    let handlers = StateHandlers::new().register_fn("fixture that hangs", |_| {
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    });
    let verifier = Verifier::new(
        VerifierConfig::new(stub.uri())
            .with_interaction_timeout(Duration::from_millis(100))
            .with_run_deadline(Duration::from_secs(10)),
        handlers,
    )
    .unwrap();
    let report = verifier.verify(&contract).await;

    assert!(!report.results[0].passed);
    assert_eq!(report.results[0].mismatches[0].reason, MismatchReason::Timeout);
    assert_eq!(report.results[0].mismatches[0].path, "$.providerStates");
    assert!(report.results[1].passed);
}

#[tokio::test]
async fn test_full_consumer_to_provider_flow_through_the_store() {
    // Consumer side: record against the engine's own mock server, persist.
    let dir = tempfile::tempdir().unwrap();
    let store = pact_engine::ContractStore::new(pact_engine::StoreConfig::new(dir.path()));

    let contract = grant_contract();
    let mock = pact_engine::MockServer::start(contract.clone()).await.unwrap();
    reqwest::Client::new()
        .post(format!("{}/api/v1/promotions/grant", mock.base_url()))
        .json(&json!({"userId": "u-123", "code": "WELCOME10"}))
        .send()
        .await
        .unwrap();
    assert!(mock.stop().await.passed());
    store.save(&contract).unwrap();

    // Provider side: load read-only and replay against the live stub.
    let loaded = store.load("retention-service", "promotion-provider").unwrap();
    assert_eq!(loaded, contract);

    let stub = ProviderStub::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/promotions/grant"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "bonusCents": 1000})),
        )
        .mount(&stub)
        .await;
    let handlers =
        StateHandlers::new().register_fn("User eligible for welcome bonus", |_| Ok(()));
    let report = verifier_for(&stub, handlers).verify(&loaded).await;

    assert!(report.passed());
    // The verifier never mutates the loaded document.
    assert_eq!(loaded, contract);
}
