//! Events, responses, and the snapshot types they carry.

use super::call::OfferOperation;
use super::{AgentId, ExecutorId, FrameworkId, FrameworkInfo, OfferId, OperationId, TaskId};
use crate::allocator::InverseOfferStatus;
use crate::maintenance::{MachineId, Unavailability};
use crate::resources::Resources;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity a master instance advertises, and the redirect target for
/// non-leaders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterInfo {
    pub id: String,
    pub hostname: String,
    pub port: u16,
}

impl MasterInfo {
    /// Protocol-relative base of this master, suitable for a redirect
    /// `Location` so the client keeps its original scheme.
    pub fn base_path(&self) -> String {
        format!("//{}:{}", self.hostname, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub machine: Option<MachineId>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A tentative allocation of agent resources to a framework, revocable
/// until accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub hostname: String,
    pub resources: Resources,
    #[serde(default)]
    pub unavailability: Option<Unavailability>,
}

/// A request that a framework relinquish resources ahead of scheduled
/// unavailability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseOffer {
    pub id: OfferId,
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub unavailability: Unavailability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
    Unreachable,
    Gone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub agent_id: AgentId,
    #[serde(default)]
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub name: String,
    pub state: TaskState,
    #[serde(default)]
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub message: Option<String>,
    /// Identifier of this status update; echoed back in ACKNOWLEDGE.
    #[serde(default)]
    pub uuid: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Unknown,
    Pending,
    Finished,
    Failed,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub operation_id: Option<OperationId>,
    pub state: OperationState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub uuid: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub framework_id: FrameworkId,
    #[serde(default)]
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSummary {
    pub executor_info: ExecutorInfo,
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSummary {
    pub framework_info: FrameworkInfo,
    pub active: bool,
    pub connected: bool,
    pub recovered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_info: AgentInfo,
    pub active: bool,
    #[serde(default)]
    pub total_resources: Resources,
    #[serde(default)]
    pub allocated_resources: Resources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetFrameworks {
    pub frameworks: Vec<FrameworkSummary>,
    #[serde(default)]
    pub completed_frameworks: Vec<FrameworkSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetAgents {
    pub agents: Vec<AgentSummary>,
    #[serde(default)]
    pub recovered_agents: Vec<AgentInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetTasks {
    #[serde(default)]
    pub pending_tasks: Vec<Task>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub unreachable_tasks: Vec<Task>,
    #[serde(default)]
    pub completed_tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetExecutors {
    pub executors: Vec<ExecutorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub uuid: Vec<u8>,
    #[serde(default)]
    pub framework_id: Option<FrameworkId>,
    pub agent_id: AgentId,
    pub info: OfferOperation,
    pub latest_status: OperationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub frameworks: Vec<FrameworkId>,
    #[serde(default)]
    pub resources: Resources,
}

/// A consistent snapshot of cluster state, ordered strictly before any
/// event delivered after it on the same subscriber stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetState {
    pub get_frameworks: GetFrameworks,
    pub get_agents: GetAgents,
    pub get_tasks: GetTasks,
    pub get_executors: GetExecutors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainingMachine {
    pub id: MachineId,
    #[serde(default)]
    pub statuses: Vec<InverseOfferStatus>,
}

/// Per-mode machine report. Machines in UP mode are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub draining_machines: Vec<DrainingMachine>,
    #[serde(default)]
    pub down_machines: Vec<MachineId>,
}

/// Events on the operator API subscriber stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterEvent {
    Subscribed {
        get_state: Box<GetState>,
        heartbeat_interval_seconds: f64,
    },
    TaskAdded {
        task: Task,
    },
    TaskUpdated {
        framework_id: FrameworkId,
        status: TaskStatus,
    },
    AgentAdded {
        agent: AgentInfo,
    },
    AgentRemoved {
        agent_id: AgentId,
    },
    FrameworkAdded {
        framework: FrameworkSummary,
    },
    FrameworkUpdated {
        framework: FrameworkSummary,
    },
    FrameworkRemoved {
        framework_info: FrameworkInfo,
    },
    Heartbeat,
}

/// Events on a scheduler subscriber stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerEvent {
    Subscribed {
        framework_id: FrameworkId,
        heartbeat_interval_seconds: f64,
        master_info: MasterInfo,
    },
    Offers {
        offers: Vec<Offer>,
    },
    InverseOffers {
        inverse_offers: Vec<InverseOffer>,
    },
    Rescind {
        offer_id: OfferId,
    },
    RescindInverseOffer {
        inverse_offer_id: OfferId,
    },
    Update {
        status: TaskStatus,
    },
    UpdateOperationStatus {
        status: OperationStatus,
    },
    Message {
        agent_id: AgentId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    Failure {
        #[serde(default)]
        agent_id: Option<AgentId>,
        #[serde(default)]
        executor_id: Option<ExecutorId>,
    },
    Error {
        message: String,
    },
    Heartbeat,
}

/// Response bodies for operator calls that return one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterResponse {
    GetHealth {
        healthy: bool,
    },
    GetFlags {
        flags: BTreeMap<String, String>,
    },
    GetVersion {
        version: String,
    },
    GetMetrics {
        metrics: BTreeMap<String, f64>,
    },
    GetLoggingLevel {
        level: u32,
    },
    ListFiles {
        file_infos: Vec<FileInfo>,
    },
    ReadFile {
        size: u64,
        data: Vec<u8>,
    },
    GetState(Box<GetState>),
    GetAgents(GetAgents),
    GetFrameworks(GetFrameworks),
    GetExecutors(GetExecutors),
    GetOperations {
        operations: Vec<OperationSnapshot>,
    },
    GetTasks(GetTasks),
    GetRoles {
        roles: Vec<Role>,
    },
    GetMaster {
        master_info: MasterInfo,
    },
    GetMaintenanceStatus {
        status: ClusterStatus,
    },
    GetMaintenanceSchedule {
        schedule: crate::maintenance::Schedule,
    },
}

/// Response bodies for scheduler calls that return one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerResponse {
    ReconcileOperations {
        operation_statuses: Vec<OperationStatus>,
    },
}
