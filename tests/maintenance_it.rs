//! The maintenance state machine end to end: schedule ingest,
//! DRAINING -> DOWN -> UP, registry commits, and the status report.

mod support;

use drover::registry::RegistryOperation;
use drover::wire::{AgentId, MasterCall, MasterResponse};
use drover::{MachineId, MachineMode, Schedule, Unavailability, Window};
use support::{admit_agent, http_request, post_json, start_leader};

fn window(machines: &[&str]) -> Window {
    Window {
        machine_ids: machines.iter().map(|m| MachineId::hostname(*m)).collect(),
        unavailability: Unavailability {
            start_nanos: 1_000,
            duration_nanos: Some(3_600_000_000_000),
        },
    }
}

async fn post_call(cluster: &support::TestCluster, call: &MasterCall) -> support::HttpResult {
    let body = serde_json::to_vec(call).expect("encode call");
    http_request(
        cluster.addr(),
        "POST",
        "/api/v1",
        &[
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
        ],
        &body,
    )
    .await
}

async fn machine_mode(cluster: &support::TestCluster, name: &str) -> Option<MachineMode> {
    let id = MachineId::hostname(name);
    cluster
        .master
        .call(move |m| m.machine(&id).map(|machine| machine.mode))
        .await
        .expect("actor alive")
}

#[tokio::test]
async fn schedule_update_drains_and_releases_machines() {
    let cluster = start_leader().await;
    admit_agent(&cluster, "a1", Some("m1")).await;

    let schedule = Schedule {
        windows: vec![window(&["m1"])],
    };
    let response = post_call(
        &cluster,
        &MasterCall::UpdateMaintenanceSchedule {
            schedule: schedule.clone(),
        },
    )
    .await;
    assert_eq!(200, response.status);
    assert_eq!(Some(MachineMode::Draining), machine_mode(&cluster, "m1").await);

    let response = post_call(&cluster, &MasterCall::GetMaintenanceSchedule).await;
    match serde_json::from_slice(&response.body).expect("decode response") {
        MasterResponse::GetMaintenanceSchedule { schedule } => {
            assert_eq!(1, schedule.windows.len());
            assert_eq!(vec![MachineId::hostname("m1")], schedule.windows[0].machine_ids);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // Removing the machine from the schedule releases it back to UP;
    // with an agent still on it the machine entry survives.
    let response = post_call(
        &cluster,
        &MasterCall::UpdateMaintenanceSchedule {
            schedule: Schedule::default(),
        },
    )
    .await;
    assert_eq!(200, response.status);
    assert_eq!(Some(MachineMode::Up), machine_mode(&cluster, "m1").await);
}

#[tokio::test]
async fn full_drain_down_up_cycle() {
    let cluster = start_leader().await;
    admit_agent(&cluster, "a1", Some("m1")).await;

    let response = post_call(
        &cluster,
        &MasterCall::UpdateMaintenanceSchedule {
            schedule: Schedule {
                windows: vec![window(&["m1"])],
            },
        },
    )
    .await;
    assert_eq!(200, response.status);

    // DRAINING machines appear in the status report.
    let response = post_call(&cluster, &MasterCall::GetMaintenanceStatus).await;
    match serde_json::from_slice(&response.body).expect("decode response") {
        MasterResponse::GetMaintenanceStatus { status } => {
            assert_eq!(1, status.draining_machines.len());
            assert_eq!(MachineId::hostname("m1"), status.draining_machines[0].id);
            assert!(status.down_machines.is_empty());
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // DOWN: the agent is shut down and forcibly removed.
    let response = post_call(
        &cluster,
        &MasterCall::StartMaintenance {
            machines: vec![MachineId::hostname("m1")],
        },
    )
    .await;
    assert_eq!(200, response.status);
    assert_eq!(Some(MachineMode::Down), machine_mode(&cluster, "m1").await);
    let registered = cluster
        .master
        .call(|m| m.agent(&AgentId::from("a1")).is_some())
        .await
        .expect("actor alive");
    assert!(!registered);

    let response = post_call(&cluster, &MasterCall::GetMaintenanceStatus).await;
    match serde_json::from_slice(&response.body).expect("decode response") {
        MasterResponse::GetMaintenanceStatus { status } => {
            assert!(status.draining_machines.is_empty());
            assert_eq!(vec![MachineId::hostname("m1")], status.down_machines);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // While DOWN, a schedule update may not pull the machine back to
    // DRAINING.
    let response = post_call(
        &cluster,
        &MasterCall::UpdateMaintenanceSchedule {
            schedule: Schedule {
                windows: vec![window(&["m1"])],
            },
        },
    )
    .await;
    assert_eq!(400, response.status);

    // UP: the machine leaves the schedule and the report entirely.
    let response = post_call(
        &cluster,
        &MasterCall::StopMaintenance {
            machines: vec![MachineId::hostname("m1")],
        },
    )
    .await;
    assert_eq!(200, response.status);
    assert_eq!(None, machine_mode(&cluster, "m1").await);

    let response = post_call(&cluster, &MasterCall::GetMaintenanceStatus).await;
    match serde_json::from_slice(&response.body).expect("decode response") {
        MasterResponse::GetMaintenanceStatus { status } => {
            assert!(status.draining_machines.is_empty());
            assert!(status.down_machines.is_empty());
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let schedule_empty = cluster
        .master
        .call(|m| m.maintenance_schedule().windows.is_empty())
        .await
        .expect("actor alive");
    assert!(schedule_empty);

    // Every transition went through the registry, in order.
    let applied = cluster.registrar.applied.lock().clone();
    let kinds: Vec<&'static str> = applied
        .iter()
        .map(|op| match op {
            RegistryOperation::UpdateMaintenanceSchedule { .. } => "update",
            RegistryOperation::StartMaintenance { .. } => "start",
            RegistryOperation::StopMaintenance { .. } => "stop",
            _ => "other",
        })
        .collect();
    assert_eq!(vec!["update", "start", "stop"], kinds);
}

#[tokio::test]
async fn start_requires_draining_and_stop_requires_down() {
    let cluster = start_leader().await;

    let response = post_call(
        &cluster,
        &MasterCall::StartMaintenance {
            machines: vec![MachineId::hostname("never-scheduled")],
        },
    )
    .await;
    assert_eq!(400, response.status);

    let response = post_call(
        &cluster,
        &MasterCall::StopMaintenance {
            machines: vec![MachineId::hostname("never-scheduled")],
        },
    )
    .await;
    assert_eq!(400, response.status);
}

#[tokio::test]
async fn schedule_rejects_incomplete_and_duplicated_machines() {
    let cluster = start_leader().await;

    let response = post_call(
        &cluster,
        &MasterCall::UpdateMaintenanceSchedule {
            schedule: Schedule {
                windows: vec![Window {
                    machine_ids: vec![MachineId::default()],
                    unavailability: Unavailability {
                        start_nanos: 0,
                        duration_nanos: None,
                    },
                }],
            },
        },
    )
    .await;
    assert_eq!(400, response.status);

    let response = post_call(
        &cluster,
        &MasterCall::UpdateMaintenanceSchedule {
            schedule: Schedule {
                windows: vec![window(&["m1"]), window(&["m1"])],
            },
        },
    )
    .await;
    assert_eq!(400, response.status);
}

#[tokio::test]
async fn legacy_maintenance_endpoints_drive_the_same_pipeline() {
    let cluster = start_leader().await;
    admit_agent(&cluster, "a1", Some("m1")).await;

    // POST the schedule as raw JSON.
    let schedule = serde_json::json!({
        "windows": [{
            "machine_ids": [{"hostname": "m1"}],
            "unavailability": {"start_nanos": 0}
        }]
    });
    let response = post_json(cluster.addr(), "/master/maintenance/schedule", &schedule).await;
    assert_eq!(200, response.status);

    // Read it back.
    let response = http_request(cluster.addr(), "GET", "/master/maintenance/schedule", &[], &[])
        .await;
    assert_eq!(200, response.status);
    let schedule: Schedule = serde_json::from_slice(&response.body).expect("decode schedule");
    assert_eq!(1, schedule.windows.len());

    // Down and back up through the machine endpoints.
    let machines = serde_json::json!([{"hostname": "m1"}]);
    let response = post_json(cluster.addr(), "/master/machine/down", &machines).await;
    assert_eq!(200, response.status);
    assert_eq!(Some(MachineMode::Down), machine_mode(&cluster, "m1").await);

    let response = post_json(cluster.addr(), "/master/machine/up", &machines).await;
    assert_eq!(200, response.status);
    assert_eq!(None, machine_mode(&cluster, "m1").await);

    // The status endpoint is GET-only.
    let response = http_request(cluster.addr(), "GET", "/master/maintenance/status", &[], &[])
        .await;
    assert_eq!(200, response.status);
    let status = response.json();
    assert!(status["draining_machines"].as_array().map(Vec::is_empty).unwrap_or(true));

    let response = http_request(cluster.addr(), "POST", "/master/maintenance/status", &[], &[])
        .await;
    assert_eq!(405, response.status);
}
