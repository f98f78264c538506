//! Integration tests for the API client and exec upgrade handling against a
//! mock API server.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use node_files_mcp::cluster::{KubeClient, PodApi};
use node_files_mcp::config::{ClusterCredentials, DEFAULT_MAX_PAYLOAD_BYTES};
use node_files_mcp::error::{ClusterError, StreamError};
use node_files_mcp::exec::{
    ExecTarget, RemoteCommandResult, RemoteExecutor, SpdyTransport, StreamExecutor,
    StreamTransport, WebSocketTransport,
};
use node_files_mcp::sandbox::{SandboxConfig, SandboxSpec};

const POD: &str = "node-files-mock1";

fn client(server: &MockServer) -> Arc<KubeClient> {
    Arc::new(KubeClient::new(&ClusterCredentials::anonymous(server.uri())).unwrap())
}

fn pod_json(phase: &str, ready: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": POD,
            "namespace": "default",
            "uid": "0b6f0c6e-1111-2222-3333-444455556666",
            "creationTimestamp": "2026-01-01T00:00:00Z"
        },
        "spec": { "nodeName": "worker-1", "containers": [] },
        "status": {
            "phase": phase,
            "conditions": [{ "type": "Ready", "status": ready }]
        }
    })
}

fn target() -> ExecTarget {
    ExecTarget::new("default", POD, "node-files")
}

fn command() -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), "ls -la '/host/'".into()]
}

// ============================================================================
// Pod resource calls
// ============================================================================

#[tokio::test]
async fn test_create_pod_posts_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/namespaces/default/pods"))
        .and(body_partial_json(json!({
            "kind": "Pod",
            "metadata": { "name": POD },
            "spec": {
                "nodeName": "worker-1",
                "restartPolicy": "Never",
                "containers": [{ "securityContext": { "privileged": true } }]
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(pod_json("Pending", "False")))
        .expect(1)
        .mount(&server)
        .await;

    let pod = SandboxSpec::new("worker-1", &SandboxConfig::default()).to_pod(POD);
    let created = client(&server).create_pod("default", &pod).await.unwrap();

    assert_eq!(created.metadata.name.as_deref(), Some(POD));
    assert!(created.metadata.creation_timestamp.is_some());
    assert!(!created.is_ready());
}

#[tokio::test]
async fn test_create_pod_surfaces_api_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/namespaces/restricted/pods"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": "pods is forbidden: violates PodSecurity \"restricted:latest\"",
            "reason": "Forbidden",
            "code": 403
        })))
        .mount(&server)
        .await;

    let pod = SandboxSpec::new("worker-1", &SandboxConfig::default()).to_pod(POD);
    let err = client(&server)
        .create_pod("restricted", &pod)
        .await
        .unwrap_err();

    match err {
        ClusterError::Api { status, message } => {
            assert_eq!(status, 403);
            assert!(message.contains("violates PodSecurity"), "got {message}");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_get_pod_reads_readiness() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/namespaces/default/pods/{POD}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(pod_json("Running", "True")))
        .mount(&server)
        .await;

    let pod = client(&server).get_pod("default", POD).await.unwrap();
    assert!(pod.is_ready());
}

#[tokio::test]
async fn test_get_missing_pod_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/namespaces/default/pods/{POD}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "kind": "Status",
            "status": "Failure",
            "message": format!("pods \"{POD}\" not found"),
            "code": 404
        })))
        .mount(&server)
        .await;

    let err = client(&server).get_pod("default", POD).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_get_pod_with_garbage_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/namespaces/default/pods/{POD}")))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let err = client(&server).get_pod("default", POD).await.unwrap_err();
    assert!(matches!(err, ClusterError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_delete_pod_sends_background_propagation() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v1/namespaces/default/pods/{POD}")))
        .and(body_partial_json(json!({
            "propagationPolicy": "Background",
            "gracePeriodSeconds": 0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(pod_json("Running", "True")))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).delete_pod("default", POD).await.unwrap();
}

#[tokio::test]
async fn test_delete_missing_pod_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v1/namespaces/default/pods/{POD}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    client(&server).delete_pod("default", POD).await.unwrap();
}

#[tokio::test]
async fn test_delete_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v1/namespaces/default/pods/{POD}")))
        .respond_with(ResponseTemplate::new(500).set_body_string("etcd unavailable"))
        .mount(&server)
        .await;

    let err = client(&server).delete_pod("default", POD).await.unwrap_err();
    assert!(matches!(err, ClusterError::Api { status: 500, .. }), "got {err:?}");
    assert!(err.to_string().contains("etcd unavailable"));
}

// ============================================================================
// Exec upgrades
// ============================================================================

fn exec_path() -> String {
    format!("/api/v1/namespaces/default/pods/{POD}/exec")
}

#[tokio::test]
async fn test_websocket_refusal_is_upgrade_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(exec_path()))
        .and(query_param("container", "node-files"))
        .and(header("sec-websocket-protocol", "v5.channel.k8s.io"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Upgrade request required"))
        .expect(1)
        .mount(&server)
        .await;

    let mut output = RemoteCommandResult::default();
    let err = WebSocketTransport::new(client(&server))
        .stream(&target(), &command(), &mut output)
        .await
        .unwrap_err();

    match err {
        StreamError::UpgradeFailed { status, reason } => {
            assert_eq!(status, Some(400));
            assert!(reason.contains("Upgrade request required"), "got {reason}");
        }
        other => panic!("expected upgrade failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_spdy_refusal_is_upgrade_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(exec_path()))
        .and(header("upgrade", "SPDY/3.1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "kind": "Status",
            "message": "pods \"node-files-mock1\" is forbidden: cannot create resource \"pods/exec\"",
            "code": 403
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut output = RemoteCommandResult::default();
    let err = SpdyTransport::new(client(&server))
        .stream(&target(), &command(), &mut output)
        .await
        .unwrap_err();

    match err {
        StreamError::UpgradeFailed { status, reason } => {
            assert_eq!(status, Some(403));
            assert!(reason.contains("pods/exec"), "got {reason}");
        }
        other => panic!("expected upgrade failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_executor_falls_back_from_websocket_to_spdy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(exec_path()))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(exec_path()))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let executor = StreamExecutor::for_cluster(client(&server));
    let failure = executor
        .execute(&target(), &command(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.source, StreamError::UpgradeFailed { .. }));

    let methods: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.method.to_string())
        .collect();
    assert_eq!(methods, vec!["GET", "POST"]);
}

#[test]
fn test_default_payload_limit() {
    assert_eq!(DEFAULT_MAX_PAYLOAD_BYTES, 100 * 1024);
}
