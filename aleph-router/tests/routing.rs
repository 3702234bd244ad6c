use std::time::Duration;

use aleph_router::{
    dynamic_routing::{health_check::PROBE_PATH, optimizer::CycleOutcome},
    AlephRouter, Call, CallOutput, Endpoint,
};
use async_trait::async_trait;
use mockito::{Matcher, Mock, Server, ServerGuard};

const STATUS_PATH: &str = "/api/v0/status";

/// Fetches the status document of the target and reports the HTTP status like a CLI would.
struct StatusCall {
    client: reqwest::Client,
}

#[async_trait]
impl Call for StatusCall {
    async fn invoke(&self, target: Option<&Endpoint>) -> CallOutput {
        let Some(endpoint) = target else {
            return CallOutput::new("", "", 1);
        };
        match self.client.get(endpoint.join(STATUS_PATH)).send().await {
            Ok(response) if response.status().is_success() => {
                CallOutput::new(response.text().await.unwrap_or_default(), "", 0)
            }
            Ok(response) => CallOutput::new("", format!("HTTP {}", response.status().as_u16()), 1),
            Err(err) => CallOutput::new("", format!("Cannot connect: {err}"), 1),
        }
    }
}

async fn node(probe_status: usize, status_status: usize) -> (ServerGuard, Vec<Mock>) {
    let mut server = Server::new_async().await;
    let mocks = vec![
        server
            .mock("GET", PROBE_PATH)
            .with_status(probe_status)
            .with_body("{}")
            .create_async()
            .await,
        server
            .mock("GET", STATUS_PATH)
            .with_status(status_status)
            .with_body("ok")
            .create_async()
            .await,
        server
            .mock("GET", Matcher::Regex("^/api/v0/aggregates/".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": {"corechannel": {"nodes": []}}}"#)
            .create_async()
            .await,
    ];
    (server, mocks)
}

#[tokio::test]
async fn optimizes_then_routes_and_remembers() {
    let (down, _down_mocks) = node(503, 503).await;
    let (up, _up_mocks) = node(200, 200).await;
    let down_endpoint = Endpoint::new(down.url()).unwrap();
    let up_endpoint = Endpoint::new(up.url()).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let router = AlephRouter::builder()
        .with_config_dir(dir.path())
        .with_official_endpoints(vec![down_endpoint.clone(), up_endpoint.clone()])
        .with_probe_timeout(Duration::from_secs(2))
        .with_endpoint_backoff(Duration::ZERO)
        .with_round_backoff(Duration::ZERO)
        .build()
        .unwrap();

    let outcome = router.optimizer().run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Switched { ref winner, .. } if *winner == up_endpoint));
    let table = router.routing_table();
    assert_eq!(table.active_endpoint(), Some(&up_endpoint));
    assert_eq!(
        table.ordered_endpoints(),
        &[up_endpoint.clone(), down_endpoint.clone()]
    );

    let call = StatusCall {
        client: reqwest::Client::new(),
    };
    let output = router.execute(&call).await;
    assert_eq!(output, CallOutput::new("ok", "", 0));
    assert_eq!(
        router.request_router().last_success().as_deref(),
        Some(up_endpoint.as_str())
    );

    let down_stat = router.memory().stat(down_endpoint.as_str()).unwrap();
    assert_eq!((down_stat.success_count, down_stat.fail_count), (0, 1));
    let up_stat = router.memory().stat(up_endpoint.as_str()).unwrap();
    assert_eq!((up_stat.success_count, up_stat.fail_count), (2, 0));

    assert!(dir.path().join("ccn_node_learning_data.json").exists());
    assert!(dir.path().join("router_state.json").exists());
}

#[tokio::test]
async fn fails_over_before_any_optimization() {
    let (down, _down_mocks) = node(200, 503).await;
    let (up, _up_mocks) = node(200, 200).await;
    let down_endpoint = Endpoint::new(down.url()).unwrap();
    let up_endpoint = Endpoint::new(up.url()).unwrap();

    let router = AlephRouter::builder()
        .with_official_endpoints(vec![down_endpoint.clone(), up_endpoint.clone()])
        .with_endpoint_backoff(Duration::ZERO)
        .with_round_backoff(Duration::ZERO)
        .build()
        .unwrap();

    let call = StatusCall {
        client: reqwest::Client::new(),
    };
    let output = router.execute(&call).await;

    assert!(output.is_success());
    assert_eq!(
        router.memory().stat(down_endpoint.as_str()).unwrap().fail_count,
        1
    );
    assert_eq!(
        router.request_router().attempt_order()[0].key(),
        up_endpoint.as_str()
    );
}

#[tokio::test]
async fn state_survives_a_restart() {
    let (up, _up_mocks) = node(200, 200).await;
    let (other, _other_mocks) = node(200, 200).await;
    let up_endpoint = Endpoint::new(up.url()).unwrap();
    let other_endpoint = Endpoint::new(other.url()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let build = || {
        AlephRouter::builder()
            .with_config_dir(dir.path())
            .with_official_endpoints(vec![other_endpoint.clone(), up_endpoint.clone()])
            .build()
            .unwrap()
    };

    let router = build();
    router.memory().record_observation(up_endpoint.as_str(), 42.0, true, None);
    router
        .request_router()
        .execute(&StatusCall {
            client: reqwest::Client::new(),
        })
        .await;
    let snapshot = router.memory().snapshot();
    let order = router.request_router().attempt_order();
    drop(router);

    let restarted = build();
    assert_eq!(restarted.memory().snapshot(), snapshot);
    assert_eq!(restarted.request_router().attempt_order(), order);
}
