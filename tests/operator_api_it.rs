//! Operator API dispatch: negotiation, reads through the batching
//! scheduler, SUBSCRIBE event streams, and the gone transition.

mod support;

use drover::registry::RegistryOperation;
use drover::testing::{DenyingAuthorizer, NullAgentTransport};
use drover::wire::{AgentId, MasterCall, MasterResponse};
use std::sync::Arc;
use support::{admit_agent, http_request, open_stream, start_cluster, start_leader};

fn encode(call: &MasterCall) -> Vec<u8> {
    serde_json::to_vec(call).expect("encode call")
}

async fn post_call(cluster: &support::TestCluster, call: &MasterCall) -> support::HttpResult {
    http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
        ],
        &encode(call),
    )
    .await
}

fn decode_response(result: &support::HttpResult) -> MasterResponse {
    serde_json::from_slice(&result.body).expect("decode response")
}

#[tokio::test]
async fn get_health_round_trip() {
    let cluster = start_leader().await;
    let response = post_call(&cluster, &MasterCall::GetHealth).await;
    assert_eq!(200, response.status);
    assert_eq!(Some("application/json"), response.header("Content-Type"));
    assert!(matches!(
        decode_response(&response),
        MasterResponse::GetHealth { healthy: true }
    ));
}

#[tokio::test]
async fn version_and_metrics_and_logging_level() {
    let cluster = start_leader().await;

    let response = post_call(&cluster, &MasterCall::GetVersion).await;
    assert_eq!(200, response.status);

    let response = post_call(
        &cluster,
        &MasterCall::GetMetrics {
            timeout_ms: Some(5_000),
        },
    )
    .await;
    assert_eq!(200, response.status);
    match decode_response(&response) {
        MasterResponse::GetMetrics { metrics } => {
            assert_eq!(Some(&1.0), metrics.get("master/elected"));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let response = post_call(&cluster, &MasterCall::GetLoggingLevel).await;
    assert!(matches!(
        decode_response(&response),
        MasterResponse::GetLoggingLevel { level: 0 }
    ));
}

#[tokio::test]
async fn missing_content_type_is_bad_request() {
    let cluster = start_leader().await;
    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[],
        &encode(&MasterCall::GetHealth),
    )
    .await;
    assert_eq!(400, response.status);
    assert_eq!(b"Expecting 'Content-Type' to be present".as_slice(), response.body.as_slice());
}

#[tokio::test]
async fn unknown_media_types_are_rejected() {
    let cluster = start_leader().await;
    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[("Content-Type", "text/html")],
        &encode(&MasterCall::GetHealth),
    )
    .await;
    assert_eq!(415, response.status);

    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[("Content-Type", "application/json"), ("Accept", "text/html")],
        &encode(&MasterCall::GetHealth),
    )
    .await;
    assert_eq!(406, response.status);
}

#[tokio::test]
async fn streaming_media_is_only_for_subscribe() {
    let cluster = start_leader().await;

    // A framed request carrying anything but SUBSCRIBE is unsupported.
    let framed = drover::recordio::encode_record(&encode(&MasterCall::GetHealth));
    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[
            ("Content-Type", "application/recordio"),
            ("Message-Content-Type", "application/json"),
        ],
        &framed,
    )
    .await;
    assert_eq!(415, response.status);

    // Same for a streaming response to a plain call.
    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[
            ("Content-Type", "application/json"),
            ("Accept", "application/recordio"),
            ("Message-Accept", "application/json"),
        ],
        &encode(&MasterCall::GetHealth),
    )
    .await;
    assert_eq!(406, response.status);
}

#[tokio::test]
async fn undecodable_body_is_bad_request() {
    let cluster = start_leader().await;
    let response = http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[("Content-Type", "application/json")],
        b"{not json",
    )
    .await;
    assert_eq!(400, response.status);
}

#[tokio::test]
async fn deprecated_calls_answer_not_implemented() {
    let cluster = start_leader().await;
    for call in [
        MasterCall::Unknown,
        MasterCall::GetQuota,
        MasterCall::SetQuota,
        MasterCall::RemoveQuota,
        MasterCall::UpdateQuota,
        MasterCall::GetWeights,
        MasterCall::UpdateWeights,
    ] {
        let response = post_call(&cluster, &call).await;
        assert_eq!(501, response.status, "call {}", call.name());
    }
}

#[tokio::test]
async fn get_state_reflects_admitted_agents() {
    let cluster = start_leader().await;
    admit_agent(&cluster, "a1", None).await;
    admit_agent(&cluster, "a2", None).await;

    let response = post_call(&cluster, &MasterCall::GetState).await;
    assert_eq!(200, response.status);
    match decode_response(&response) {
        MasterResponse::GetState(state) => {
            assert_eq!(2, state.get_agents.agents.len());
            assert!(state.get_frameworks.frameworks.is_empty());
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let response = post_call(&cluster, &MasterCall::GetAgents).await;
    match decode_response(&response) {
        MasterResponse::GetAgents(agents) => assert_eq!(2, agents.agents.len()),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn flags_are_denied_without_authorization() {
    let cluster = start_cluster(
        Arc::new(DenyingAuthorizer),
        Arc::new(NullAgentTransport),
        true,
    )
    .await;
    let response = post_call(&cluster, &MasterCall::GetFlags).await;
    assert_eq!(403, response.status);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn get_master_reports_self() {
    let cluster = start_leader().await;
    let response = post_call(&cluster, &MasterCall::GetMaster).await;
    match decode_response(&response) {
        MasterResponse::GetMaster { master_info } => {
            assert_eq!("master-test", master_info.id);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn set_logging_level_round_trip() {
    let cluster = start_leader().await;
    let response = post_call(
        &cluster,
        &MasterCall::SetLoggingLevel {
            level: 1,
            duration_ms: 60_000,
        },
    )
    .await;
    assert_eq!(200, response.status);

    let response = post_call(&cluster, &MasterCall::GetLoggingLevel).await;
    assert!(matches!(
        decode_response(&response),
        MasterResponse::GetLoggingLevel { level: 1 }
    ));
}

#[tokio::test]
async fn files_surface_maps_error_and_success() {
    let cluster = start_leader().await;
    cluster
        .files
        .entries
        .lock()
        .insert("logs/master.log".to_string(), b"hello operator".to_vec());

    let response = post_call(
        &cluster,
        &MasterCall::ReadFile {
            path: "logs/master.log".to_string(),
            offset: 6,
            length: None,
        },
    )
    .await;
    assert_eq!(200, response.status);
    match decode_response(&response) {
        MasterResponse::ReadFile { size, data } => {
            assert_eq!(14, size);
            assert_eq!(b"operator".as_slice(), data.as_slice());
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let response = post_call(
        &cluster,
        &MasterCall::ReadFile {
            path: "logs/agent.log".to_string(),
            offset: 0,
            length: None,
        },
    )
    .await;
    assert_eq!(404, response.status);

    let response = post_call(
        &cluster,
        &MasterCall::ListFiles {
            path: "logs/".to_string(),
        },
    )
    .await;
    assert_eq!(200, response.status);
    match decode_response(&response) {
        MasterResponse::ListFiles { file_infos } => {
            assert_eq!(1, file_infos.len());
            assert_eq!("logs/master.log", file_infos[0].path);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn mark_agent_gone_is_idempotent() {
    let cluster = start_leader().await;
    admit_agent(&cluster, "a1", None).await;

    let call = MasterCall::MarkAgentGone {
        agent_id: AgentId::from("a1"),
    };
    let response = post_call(&cluster, &call).await;
    assert_eq!(200, response.status);

    // The agent is no longer registered and the commit reached the
    // registry exactly once.
    let registered = cluster
        .master
        .call(|m| m.agent(&AgentId::from("a1")).is_some())
        .await
        .expect("actor alive");
    assert!(!registered);

    let response = post_call(&cluster, &call).await;
    assert_eq!(200, response.status);

    let commits = cluster
        .registrar
        .applied
        .lock()
        .iter()
        .filter(|op| matches!(op, RegistryOperation::MarkAgentGone { .. }))
        .count();
    assert_eq!(1, commits);
}

#[tokio::test]
async fn mark_unknown_agent_gone_is_not_found() {
    let cluster = start_leader().await;
    let response = post_call(
        &cluster,
        &MasterCall::MarkAgentGone {
            agent_id: AgentId::from("missing"),
        },
    )
    .await;
    assert_eq!(404, response.status);
    assert_eq!(b"Agent 'missing' not found".as_slice(), response.body.as_slice());
}

#[tokio::test]
async fn subscribe_streams_snapshot_then_heartbeat() {
    let cluster = start_leader().await;
    admit_agent(&cluster, "a1", None).await;

    let (head, mut stream) = open_stream(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
        ],
        &encode(&MasterCall::Subscribe),
    )
    .await;
    assert_eq!(200, head.status);
    assert_eq!(Some("application/json"), head.header("Content-Type"));

    let subscribed = stream.next_record().await;
    let snapshot = &subscribed["SUBSCRIBED"]["get_state"];
    assert_eq!(1, snapshot["get_agents"]["agents"].as_array().map(Vec::len).unwrap_or(0));

    let heartbeat = stream.next_record().await;
    assert_eq!(serde_json::json!("HEARTBEAT"), heartbeat);
}

#[tokio::test]
async fn subscribe_accepts_a_framed_request() {
    let cluster = start_leader().await;

    let framed = drover::recordio::encode_record(&encode(&MasterCall::Subscribe));
    let (head, mut stream) = open_stream(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[
            ("Content-Type", "application/recordio"),
            ("Message-Content-Type", "application/json"),
            ("Accept", "application/recordio"),
            ("Message-Accept", "application/json"),
        ],
        &framed,
    )
    .await;
    assert_eq!(200, head.status);
    // The streamed response carries the message encoding, not the
    // framing wrapper, in its Content-Type.
    assert_eq!(Some("application/json"), head.header("Content-Type"));

    let subscribed = stream.next_record().await;
    assert!(subscribed.get("SUBSCRIBED").is_some());
}

#[tokio::test]
async fn subscribers_observe_later_events() {
    let cluster = start_leader().await;

    let (_head, mut stream) = open_stream(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
        ],
        &encode(&MasterCall::Subscribe),
    )
    .await;
    let subscribed = stream.next_record().await;
    assert!(subscribed.get("SUBSCRIBED").is_some());
    assert_eq!(serde_json::json!("HEARTBEAT"), stream.next_record().await);

    admit_agent(&cluster, "late", None).await;
    let event = stream.next_record().await;
    assert_eq!("late", event["AGENT_ADDED"]["agent"]["id"]);
}
