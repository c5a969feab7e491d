//! Leader and recovery gating across the request plane.

mod support;

use drover::testing::{NullAgentTransport, PermissiveAuthorizer};
use drover::wire::MasterCall;
use std::sync::Arc;
use support::{http_request, start_cluster, start_leader};

fn health_body() -> Vec<u8> {
    serde_json::to_vec(&MasterCall::GetHealth).expect("encode call")
}

#[tokio::test]
async fn health_needs_no_leader() {
    let cluster = start_cluster(
        Arc::new(PermissiveAuthorizer),
        Arc::new(NullAgentTransport),
        false,
    )
    .await;
    let response = http_request(cluster.addr(), "GET", "/health", &[], &[]).await;
    assert_eq!(200, response.status);
}

#[tokio::test]
async fn non_leader_redirects_to_leader() {
    let cluster = start_cluster(
        Arc::new(PermissiveAuthorizer),
        Arc::new(NullAgentTransport),
        false,
    )
    .await;
    cluster
        .master
        .call(|m| m.set_leader(Some(master_info_other())))
        .await
        .expect("actor alive");

    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[("Content-Type", "application/json")],
        &health_body(),
    )
    .await;
    assert_eq!(307, response.status);
    assert_eq!(Some("//leader.example.com:5050/api/v1"), response.header("Location"));
}

#[tokio::test]
async fn mutating_endpoints_never_succeed_on_non_leader() {
    let cluster = start_cluster(
        Arc::new(PermissiveAuthorizer),
        Arc::new(NullAgentTransport),
        false,
    )
    .await;
    cluster
        .master
        .call(|m| m.set_leader(Some(master_info_other())))
        .await
        .expect("actor alive");

    for path in ["/reserve", "/unreserve", "/create-volumes", "/destroy-volumes", "/teardown"] {
        let response = http_request(
            cluster.addr(),
            "POST",
            path,
            &[("Content-Type", "application/x-www-form-urlencoded")],
            b"slaveId=a1",
        )
        .await;
        assert_eq!(307, response.status, "path {path}");
        assert_eq!(
            Some(format!("//leader.example.com:5050{path}").as_str()),
            response.header("Location")
        );
    }
}

#[tokio::test]
async fn no_leader_means_service_unavailable() {
    let cluster = start_cluster(
        Arc::new(PermissiveAuthorizer),
        Arc::new(NullAgentTransport),
        false,
    )
    .await;
    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[("Content-Type", "application/json")],
        &health_body(),
    )
    .await;
    assert_eq!(503, response.status);
    assert_eq!(b"No leader elected".as_slice(), response.body.as_slice());
}

#[tokio::test]
async fn recovery_gates_the_leader() {
    let cluster = start_cluster(
        Arc::new(PermissiveAuthorizer),
        Arc::new(NullAgentTransport),
        false,
    )
    .await;
    cluster
        .master
        .call(|m| {
            let info = m.info().clone();
            m.set_leader(Some(info));
        })
        .await
        .expect("actor alive");

    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[("Content-Type", "application/json")],
        &health_body(),
    )
    .await;
    assert_eq!(503, response.status);
    assert_eq!(b"Master has not finished recovery".as_slice(), response.body.as_slice());
}

#[tokio::test]
async fn redirect_endpoint_points_at_leader_base() {
    let cluster = start_cluster(
        Arc::new(PermissiveAuthorizer),
        Arc::new(NullAgentTransport),
        false,
    )
    .await;
    cluster
        .master
        .call(|m| m.set_leader(Some(master_info_other())))
        .await
        .expect("actor alive");

    let response = http_request(cluster.addr(), "GET", "/redirect", &[], &[]).await;
    assert_eq!(307, response.status);
    assert_eq!(Some("//leader.example.com:5050"), response.header("Location"));

    // A suffixed redirect path would loop; it is cut off instead.
    let response = http_request(cluster.addr(), "GET", "/redirect/state", &[], &[]).await;
    assert_eq!(404, response.status);
}

#[tokio::test]
async fn wrong_method_is_rejected_with_allow_list() {
    let cluster = start_leader().await;
    let response = http_request(cluster.addr(), "GET", "/api/v1", &[], &[]).await;
    assert_eq!(405, response.status);
    assert_eq!(Some("POST"), response.header("Allow"));

    let response = http_request(cluster.addr(), "PUT", "/master/maintenance/schedule", &[], &[])
        .await;
    assert_eq!(405, response.status);
    assert_eq!(Some("GET, POST"), response.header("Allow"));
}

fn master_info_other() -> drover::wire::MasterInfo {
    drover::wire::MasterInfo {
        id: "master-other".to_string(),
        hostname: "leader.example.com".to_string(),
        port: 5050,
    }
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let cluster = start_leader().await;
    let response = http_request(cluster.addr(), "GET", "/no/such/route", &[], &[]).await;
    assert_eq!(404, response.status);
}
