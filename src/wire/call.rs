//! Typed requests accepted by the master: the scheduler call set and
//! the operator call set.

use super::{
    AgentId, ExecutorId, FrameworkId, FrameworkInfo, OfferId, OperationId, ResourceProviderId,
    TaskId,
};
use crate::maintenance::{MachineId, Schedule};
use crate::resources::{Resource, Resources};
use crate::wire::event::TaskInfo;
use serde::{Deserialize, Serialize};

/// Default refuse interval attached to declines and rescinds.
pub const DEFAULT_REFUSE_SECONDS: f64 = 5.0;

/// A request from a framework driver. Apart from SUBSCRIBE, every call
/// must carry the identifier of an already-subscribed framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerCall {
    #[serde(default)]
    pub framework_id: Option<FrameworkId>,
    pub kind: SchedulerCallKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerCallKind {
    Unknown,
    Subscribe(Subscribe),
    Teardown,
    Accept(Accept),
    Decline(Decline),
    AcceptInverseOffers(InverseOfferIds),
    DeclineInverseOffers(InverseOfferIds),
    Revive,
    Suppress,
    Kill(Kill),
    Shutdown(Shutdown),
    Acknowledge(Acknowledge),
    AcknowledgeOperationStatus(AcknowledgeOperationStatus),
    Reconcile(Reconcile),
    ReconcileOperations(ReconcileOperations),
    Message(Message),
    Request(ResourceRequest),
}

impl SchedulerCallKind {
    /// Wire name of the call, used in log lines and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerCallKind::Unknown => "UNKNOWN",
            SchedulerCallKind::Subscribe(_) => "SUBSCRIBE",
            SchedulerCallKind::Teardown => "TEARDOWN",
            SchedulerCallKind::Accept(_) => "ACCEPT",
            SchedulerCallKind::Decline(_) => "DECLINE",
            SchedulerCallKind::AcceptInverseOffers(_) => "ACCEPT_INVERSE_OFFERS",
            SchedulerCallKind::DeclineInverseOffers(_) => "DECLINE_INVERSE_OFFERS",
            SchedulerCallKind::Revive => "REVIVE",
            SchedulerCallKind::Suppress => "SUPPRESS",
            SchedulerCallKind::Kill(_) => "KILL",
            SchedulerCallKind::Shutdown(_) => "SHUTDOWN",
            SchedulerCallKind::Acknowledge(_) => "ACKNOWLEDGE",
            SchedulerCallKind::AcknowledgeOperationStatus(_) => "ACKNOWLEDGE_OPERATION_STATUS",
            SchedulerCallKind::Reconcile(_) => "RECONCILE",
            SchedulerCallKind::ReconcileOperations(_) => "RECONCILE_OPERATIONS",
            SchedulerCallKind::Message(_) => "MESSAGE",
            SchedulerCallKind::Request(_) => "REQUEST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub framework_info: FrameworkInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub refuse_seconds: Option<f64>,
}

impl Filters {
    pub fn refuse_seconds(&self) -> f64 {
        self.refuse_seconds.unwrap_or(DEFAULT_REFUSE_SECONDS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    pub offer_ids: Vec<OfferId>,
    #[serde(default)]
    pub operations: Vec<OfferOperation>,
    #[serde(default)]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decline {
    pub offer_ids: Vec<OfferId>,
    #[serde(default)]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InverseOfferIds {
    pub inverse_offer_ids: Vec<OfferId>,
    #[serde(default)]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kill {
    pub task_id: TaskId,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shutdown {
    pub executor_id: ExecutorId,
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledge {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    /// Identifier of the acknowledged status update, 16 raw bytes.
    pub uuid: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgeOperationStatus {
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub resource_provider_id: Option<ResourceProviderId>,
    #[serde(default)]
    pub operation_id: Option<OperationId>,
    pub uuid: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconcile {
    #[serde(default)]
    pub tasks: Vec<ReconcileTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileTask {
    pub task_id: TaskId,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOperations {
    #[serde(default)]
    pub operations: Vec<ReconcileOperationsEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOperationsEntry {
    pub operation_id: OperationId,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub resource_provider_id: Option<ResourceProviderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub agent_id: AgentId,
    pub executor_id: ExecutorId,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A mutating intent on agent resources, carried either inside an
/// ACCEPT or pushed directly through the operator API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferOperation {
    Launch {
        tasks: Vec<TaskInfo>,
    },
    Reserve {
        resources: Resources,
    },
    Unreserve {
        resources: Resources,
    },
    Create {
        volumes: Resources,
    },
    Destroy {
        volumes: Resources,
    },
    GrowVolume {
        volume: Resource,
        addition: Resource,
    },
    ShrinkVolume {
        volume: Resource,
        subtract: Resource,
    },
}

impl OfferOperation {
    pub fn name(&self) -> &'static str {
        match self {
            OfferOperation::Launch { .. } => "LAUNCH",
            OfferOperation::Reserve { .. } => "RESERVE",
            OfferOperation::Unreserve { .. } => "UNRESERVE",
            OfferOperation::Create { .. } => "CREATE",
            OfferOperation::Destroy { .. } => "DESTROY",
            OfferOperation::GrowVolume { .. } => "GROW_VOLUME",
            OfferOperation::ShrinkVolume { .. } => "SHRINK_VOLUME",
        }
    }
}

/// A request against the operator API. Unknown and deprecated variants
/// stay in the enum for wire compatibility and answer 501.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterCall {
    Unknown,
    GetHealth,
    GetFlags,
    GetVersion,
    GetMetrics {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    GetLoggingLevel,
    SetLoggingLevel {
        level: u32,
        duration_ms: u64,
    },
    ListFiles {
        path: String,
    },
    ReadFile {
        path: String,
        offset: u64,
        #[serde(default)]
        length: Option<u64>,
    },
    GetState,
    GetAgents,
    GetFrameworks,
    GetExecutors,
    GetOperations,
    GetTasks,
    GetRoles,
    GetWeights,
    UpdateWeights,
    GetMaster,
    Subscribe,
    ReserveResources {
        agent_id: AgentId,
        resources: Vec<Resource>,
    },
    UnreserveResources {
        agent_id: AgentId,
        resources: Vec<Resource>,
    },
    CreateVolumes {
        agent_id: AgentId,
        volumes: Vec<Resource>,
    },
    DestroyVolumes {
        agent_id: AgentId,
        volumes: Vec<Resource>,
    },
    GrowVolume {
        agent_id: AgentId,
        volume: Resource,
        addition: Resource,
    },
    ShrinkVolume {
        agent_id: AgentId,
        volume: Resource,
        subtract: Resource,
    },
    GetMaintenanceStatus,
    GetMaintenanceSchedule,
    UpdateMaintenanceSchedule {
        schedule: Schedule,
    },
    StartMaintenance {
        machines: Vec<MachineId>,
    },
    StopMaintenance {
        machines: Vec<MachineId>,
    },
    GetQuota,
    UpdateQuota,
    SetQuota,
    RemoveQuota,
    Teardown {
        framework_id: FrameworkId,
    },
    MarkAgentGone {
        agent_id: AgentId,
    },
}

impl MasterCall {
    pub fn name(&self) -> &'static str {
        match self {
            MasterCall::Unknown => "UNKNOWN",
            MasterCall::GetHealth => "GET_HEALTH",
            MasterCall::GetFlags => "GET_FLAGS",
            MasterCall::GetVersion => "GET_VERSION",
            MasterCall::GetMetrics { .. } => "GET_METRICS",
            MasterCall::GetLoggingLevel => "GET_LOGGING_LEVEL",
            MasterCall::SetLoggingLevel { .. } => "SET_LOGGING_LEVEL",
            MasterCall::ListFiles { .. } => "LIST_FILES",
            MasterCall::ReadFile { .. } => "READ_FILE",
            MasterCall::GetState => "GET_STATE",
            MasterCall::GetAgents => "GET_AGENTS",
            MasterCall::GetFrameworks => "GET_FRAMEWORKS",
            MasterCall::GetExecutors => "GET_EXECUTORS",
            MasterCall::GetOperations => "GET_OPERATIONS",
            MasterCall::GetTasks => "GET_TASKS",
            MasterCall::GetRoles => "GET_ROLES",
            MasterCall::GetWeights => "GET_WEIGHTS",
            MasterCall::UpdateWeights => "UPDATE_WEIGHTS",
            MasterCall::GetMaster => "GET_MASTER",
            MasterCall::Subscribe => "SUBSCRIBE",
            MasterCall::ReserveResources { .. } => "RESERVE_RESOURCES",
            MasterCall::UnreserveResources { .. } => "UNRESERVE_RESOURCES",
            MasterCall::CreateVolumes { .. } => "CREATE_VOLUMES",
            MasterCall::DestroyVolumes { .. } => "DESTROY_VOLUMES",
            MasterCall::GrowVolume { .. } => "GROW_VOLUME",
            MasterCall::ShrinkVolume { .. } => "SHRINK_VOLUME",
            MasterCall::GetMaintenanceStatus => "GET_MAINTENANCE_STATUS",
            MasterCall::GetMaintenanceSchedule => "GET_MAINTENANCE_SCHEDULE",
            MasterCall::UpdateMaintenanceSchedule { .. } => "UPDATE_MAINTENANCE_SCHEDULE",
            MasterCall::StartMaintenance { .. } => "START_MAINTENANCE",
            MasterCall::StopMaintenance { .. } => "STOP_MAINTENANCE",
            MasterCall::GetQuota => "GET_QUOTA",
            MasterCall::UpdateQuota => "UPDATE_QUOTA",
            MasterCall::SetQuota => "SET_QUOTA",
            MasterCall::RemoveQuota => "REMOVE_QUOTA",
            MasterCall::Teardown { .. } => "TEARDOWN",
            MasterCall::MarkAgentGone { .. } => "MARK_AGENT_GONE",
        }
    }
}
