//! Integration tests for HeartbeatClient against a mock coordinator

use std::time::Duration;

use serde_json::json;
use volplugin_common::StopHandle;
use volplugin_lock::{HeartbeatClient, HeartbeatError, Reason, UseMount};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload() -> UseMount {
    UseMount::new("policy/vol", "host1", Reason::Create)
}

fn mount_body() -> serde_json::Value {
    // reports always carry the Mount reason
    json!({"Volume": "policy/vol", "Hostname": "host1", "Reason": "Mount"})
}

// ============================================================================
// Report endpoints
// ============================================================================

#[tokio::test]
async fn test_report_endpoints_post_payload() {
    let server = MockServer::start().await;

    for endpoint in ["/mount", "/mount-report", "/unmount"] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .and(header("content-type", "application/json"))
            .and(body_json(mount_body()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = HeartbeatClient::new(&server.uri()).unwrap();
    client.report_mount(&payload()).await.unwrap();
    client.report_mount_status(&payload()).await.unwrap();
    client.report_unmount(&payload()).await.unwrap();
}

#[tokio::test]
async fn test_report_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mount-report"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such mount"))
        .mount(&server)
        .await;

    let client = HeartbeatClient::new(&server.uri()).unwrap();
    let err = client.report_mount_status(&payload()).await.unwrap_err();
    assert!(matches!(err, HeartbeatError::NotFound));
}

#[tokio::test]
async fn test_report_failure_carries_trimmed_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mount"))
        .respond_with(ResponseTemplate::new(500).set_body_string("  lock held elsewhere\n"))
        .mount(&server)
        .await;

    let client = HeartbeatClient::new(&server.uri()).unwrap();
    match client.report_mount(&payload()).await.unwrap_err() {
        HeartbeatError::RequestFailed { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "lock held elsewhere");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_report_transport_error() {
    // nothing listens on the discard port
    let client = HeartbeatClient::with_timeout("127.0.0.1:9", Duration::from_secs(1)).unwrap();
    let err = client.report_unmount(&payload()).await.unwrap_err();
    assert!(matches!(err, HeartbeatError::Http(_)));
}

// ============================================================================
// Heartbeat loop
// ============================================================================

async fn report_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|req| req.url.path() == "/mount-report")
        .count()
}

#[tokio::test]
async fn test_heartbeat_reports_until_stopped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mount-report"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = HeartbeatClient::new(&server.uri()).unwrap();
    let ttl = Duration::from_millis(200);

    client.start_heartbeat("policy/vol", ttl, payload()).await;
    assert!(client.is_heartbeating("policy/vol"));

    tokio::time::sleep(Duration::from_millis(280)).await;
    let reported = report_count(&server).await;
    assert!(reported >= 3, "only {} reports", reported);

    client.remove_stop_chan("policy/vol").await;
    assert!(!client.is_heartbeating("policy/vol"));

    let stopped_at = report_count(&server).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(report_count(&server).await, stopped_at);
}

#[tokio::test]
async fn test_heartbeat_survives_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mount-report"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mount-report"))
        .respond_with(ResponseTemplate::new(500).set_body_string("busy"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mount-report"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = HeartbeatClient::new(&server.uri()).unwrap();
    let handle = {
        let client = client.clone();
        StopHandle::spawn(move |stop| async move {
            client
                .heartbeat_mount(Duration::from_millis(100), payload(), stop)
                .await;
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());
    assert!(report_count(&server).await >= 4);

    handle.stop().await;
}

#[tokio::test]
async fn test_add_stop_chan_replaces_running_heartbeat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mount-report"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = HeartbeatClient::new(&server.uri()).unwrap();
    let ttl = Duration::from_millis(80);

    client.start_heartbeat("policy/vol", ttl, payload()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .start_heartbeat(
            "policy/vol",
            ttl,
            UseMount::new("policy/vol", "host2", Reason::Mount),
        )
        .await;

    // the first loop has fully exited, so every later report is the new one
    let replaced_at = server.received_requests().await.unwrap_or_default().len();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let requests = server.received_requests().await.unwrap_or_default();
    let later = &requests[replaced_at..];
    assert!(!later.is_empty());
    for req in later {
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["Hostname"], "host2");
    }

    client.remove_stop_chan("policy/vol").await;
}
