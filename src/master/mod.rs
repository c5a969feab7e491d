//! The master actor: exclusive owner of all mutable cluster state.
//!
//! Every record below is keyed by id; cross-references between
//! frameworks, agents, offers, operations, and machines are ids, never
//! direct handles. HTTP handlers only touch this state while executing
//! on the actor thread (see `actor`); everything they await in between
//! resumes there via a deferred dispatch.

mod actor;
mod batch;
mod gone;
mod maintenance_ops;
mod operation;
mod read_only;
mod scheduler_calls;
mod subscribe;

pub use actor::{ActorGone, MasterHandle};
pub use batch::{ReadOnlyHandler, MAX_BATCH_WORKERS};
pub use gone::GonePrecondition;
pub use operation::PreparedOperation;
pub use subscribe::{HttpConnection, Subscriber};

pub(crate) use maintenance_ops::MaintenanceRefusal;
pub(crate) use read_only::{
    get_agents_response as read_only_agents, get_executors_response as read_only_executors,
    get_frameworks_response as read_only_frameworks,
    get_operations_response as read_only_operations, get_roles_response as read_only_roles,
    get_state_response as read_only_state, get_state_summary_response as read_only_state_summary,
    get_tasks_response as read_only_tasks,
};

use crate::allocator::Allocator;
use crate::maintenance::{Machine, MachineId, Schedule};
use crate::resources::Resources;
use crate::wire::{
    AgentId, AgentInfo, ExecutorInfo, FrameworkId, FrameworkInfo, FrameworkSummary, InverseOffer,
    MasterEvent, MasterInfo, Offer, OfferId, OfferOperation, OperationStatus, StreamId, Task,
    TaskId, TaskInfo, TaskState, TaskStatus,
};
use async_trait::async_trait;
use batch::BatchedRequest;
use log::info;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Interval between HEARTBEAT events on subscriber streams.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Completed frameworks and tasks retained per bucket.
const COMPLETED_BUFFER_LIMIT: usize = 50;

/// Outbound channel to agents. Delivery is best-effort; the master
/// double-bookkeeps anything that must not depend on it.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Submits a resource operation for application on the agent.
    async fn apply(&self, agent_id: &AgentId, operation: &OfferOperation) -> Result<(), String>;

    fn shutdown_agent(&self, agent_id: &AgentId, message: &str);

    fn kill_task(&self, agent_id: &AgentId, task_id: &TaskId);

    fn shutdown_executor(&self, agent_id: &AgentId, executor_id: &crate::wire::ExecutorId);

    fn framework_message(
        &self,
        agent_id: &AgentId,
        executor_id: &crate::wire::ExecutorId,
        data: &[u8],
    );
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub info: MasterInfo,
    pub version: String,
    pub flags: BTreeMap<String, String>,
    pub heartbeat_interval: Duration,
}

impl MasterConfig {
    pub fn new(info: MasterInfo) -> MasterConfig {
        MasterConfig {
            info,
            version: env!("CARGO_PKG_VERSION").to_string(),
            flags: BTreeMap::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Per-framework master state. Held in the completed bucket (bounded)
/// after teardown.
pub struct Framework {
    pub id: FrameworkId,
    pub info: FrameworkInfo,
    pub active: bool,
    pub connected: bool,
    pub recovered: bool,
    pub connection: Option<HttpConnection>,
    pub offers: HashSet<OfferId>,
    pub inverse_offers: HashSet<OfferId>,
    pub pending_tasks: HashMap<TaskId, TaskInfo>,
    pub tasks: HashMap<TaskId, Task>,
    pub unreachable_tasks: HashMap<TaskId, Task>,
    pub completed_tasks: VecDeque<Task>,
}

impl Framework {
    fn new(id: FrameworkId, info: FrameworkInfo) -> Framework {
        Framework {
            id,
            info,
            active: false,
            connected: false,
            recovered: false,
            connection: None,
            offers: HashSet::new(),
            inverse_offers: HashSet::new(),
            pending_tasks: HashMap::new(),
            tasks: HashMap::new(),
            unreachable_tasks: HashMap::new(),
            completed_tasks: VecDeque::new(),
        }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.connection.as_ref().map(|c| c.stream_id)
    }

    pub fn summary(&self) -> FrameworkSummary {
        FrameworkSummary {
            framework_info: self.info.clone(),
            active: self.active,
            connected: self.connected,
            recovered: self.recovered,
        }
    }
}

/// Per-agent master state.
pub struct Agent {
    pub id: AgentId,
    pub info: AgentInfo,
    pub capabilities: Vec<String>,
    pub total_resources: Resources,
    pub checkpointed_resources: Resources,
    pub used_resources: Resources,
    pub offers: HashSet<OfferId>,
    pub inverse_offers: HashSet<OfferId>,
    pub operations: HashMap<Vec<u8>, Operation>,
    pub executors: Vec<ExecutorInfo>,
    pub active: bool,
}

/// A mutating intent with durable identity, removed once its terminal
/// status is acknowledged.
pub struct Operation {
    pub uuid: Vec<u8>,
    pub framework_id: Option<FrameworkId>,
    pub agent_id: AgentId,
    pub info: OfferOperation,
    pub latest_status: OperationStatus,
}

/// An agent is in exactly one of {registered, recovered, unreachable,
/// gone, unknown}; the `marking_*`/`removing` sets serialize registry
/// transitions per agent.
#[derive(Default)]
pub struct Agents {
    pub registered: HashMap<AgentId, Agent>,
    pub recovered: HashMap<AgentId, AgentInfo>,
    pub unreachable: HashMap<AgentId, u64>,
    pub gone: HashMap<AgentId, u64>,
    pub marking_gone: HashSet<AgentId>,
    pub marking_unreachable: HashSet<AgentId>,
    pub removing: HashSet<AgentId>,
}

pub struct Master {
    pub(crate) config: MasterConfig,
    /// Elected leader, if any. This instance leads iff
    /// `leader == Some(config.info)`.
    pub(crate) leader: Option<MasterInfo>,
    pub(crate) recovery_complete: bool,
    pub(crate) started_at: SystemTime,

    pub(crate) frameworks: HashMap<FrameworkId, Framework>,
    pub(crate) completed_frameworks: VecDeque<FrameworkSummary>,
    pub(crate) agents: Agents,
    pub(crate) offers: HashMap<OfferId, Offer>,
    pub(crate) inverse_offers: HashMap<OfferId, InverseOffer>,
    pub(crate) machines: HashMap<MachineId, Machine>,
    pub(crate) maintenance_schedule: Schedule,
    pub(crate) subscribers: HashMap<StreamId, Subscriber>,
    pub(crate) batched_requests: Vec<BatchedRequest>,

    pub(crate) logging_level: u32,
    pub(crate) next_framework_id: u64,

    pub(crate) allocator: std::sync::Arc<dyn Allocator>,
    pub(crate) transport: std::sync::Arc<dyn AgentTransport>,
    /// Self-handle for deferred dispatch; set at spawn.
    pub(crate) handle: Option<MasterHandle>,
    /// Runtime used for heartbeaters and revert timers.
    pub(crate) runtime: Option<tokio::runtime::Handle>,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        allocator: std::sync::Arc<dyn Allocator>,
        transport: std::sync::Arc<dyn AgentTransport>,
    ) -> Master {
        Master {
            config,
            leader: None,
            recovery_complete: false,
            started_at: SystemTime::now(),
            frameworks: HashMap::new(),
            completed_frameworks: VecDeque::new(),
            agents: Agents::default(),
            offers: HashMap::new(),
            inverse_offers: HashMap::new(),
            machines: HashMap::new(),
            maintenance_schedule: Schedule::default(),
            subscribers: HashMap::new(),
            batched_requests: Vec::new(),
            logging_level: 0,
            next_framework_id: 0,
            allocator,
            transport,
            handle: None,
            runtime: None,
        }
    }

    pub fn info(&self) -> &MasterInfo {
        &self.config.info
    }

    pub fn leader(&self) -> Option<&MasterInfo> {
        self.leader.as_ref()
    }

    /// True when this instance is the elected leader.
    pub fn elected(&self) -> bool {
        self.leader.as_ref() == Some(&self.config.info)
    }

    pub fn recovered(&self) -> bool {
        self.recovery_complete
    }

    /// Records the current leader as observed by the election
    /// subsystem.
    pub fn set_leader(&mut self, leader: Option<MasterInfo>) {
        info!(
            "event=leader_changed leader={}",
            leader
                .as_ref()
                .map(|l| l.base_path())
                .unwrap_or_else(|| "<none>".to_string())
        );
        self.leader = leader;
    }

    pub fn complete_recovery(&mut self) {
        self.recovery_complete = true;
        info!("event=recovery_complete");
    }

    pub fn framework(&self, id: &FrameworkId) -> Option<&Framework> {
        self.frameworks.get(id)
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.registered.get(id)
    }

    pub fn machine(&self, id: &MachineId) -> Option<&Machine> {
        self.machines.get(id)
    }

    pub fn maintenance_schedule(&self) -> &Schedule {
        &self.maintenance_schedule
    }

    /// Registers an agent, the entry point used by the agent
    /// subscription plane. A machine entry is created on first contact.
    pub fn admit_agent(
        &mut self,
        info: AgentInfo,
        capabilities: Vec<String>,
        checkpointed_resources: Resources,
    ) {
        let agent_id = info.id.clone();
        self.agents.recovered.remove(&agent_id);
        if let Some(machine_id) = info.machine.clone() {
            self.machines
                .entry(machine_id)
                .or_default()
                .agents
                .insert(agent_id.clone());
        }
        let agent = Agent {
            id: agent_id.clone(),
            total_resources: info.resources.clone(),
            checkpointed_resources,
            used_resources: Resources::new(),
            offers: HashSet::new(),
            inverse_offers: HashSet::new(),
            operations: HashMap::new(),
            executors: Vec::new(),
            active: true,
            capabilities,
            info: info.clone(),
        };
        self.agents.registered.insert(agent_id.clone(), agent);
        info!("event=agent_admitted agent={agent_id}");
        self.broadcast(&MasterEvent::AgentAdded { agent: info });
    }

    /// Records an offer extended by the allocator.
    pub fn add_offer(&mut self, offer: Offer) {
        if let Some(agent) = self.agents.registered.get_mut(&offer.agent_id) {
            agent.offers.insert(offer.id.clone());
        }
        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.offers.insert(offer.id.clone());
        }
        self.offers.insert(offer.id.clone(), offer);
    }

    pub fn add_inverse_offer(&mut self, inverse_offer: InverseOffer) {
        if let Some(agent) = self.agents.registered.get_mut(&inverse_offer.agent_id) {
            agent.inverse_offers.insert(inverse_offer.id.clone());
        }
        if let Some(framework) = self.frameworks.get_mut(&inverse_offer.framework_id) {
            framework.inverse_offers.insert(inverse_offer.id.clone());
        }
        self.inverse_offers
            .insert(inverse_offer.id.clone(), inverse_offer);
    }

    /// Removes an offer from all indexes. When `rescind` is set the
    /// owning framework is told.
    pub(crate) fn remove_offer(&mut self, offer_id: &OfferId, rescind: bool) -> Option<Offer> {
        let offer = self.offers.remove(offer_id)?;
        if let Some(agent) = self.agents.registered.get_mut(&offer.agent_id) {
            agent.offers.remove(offer_id);
        }
        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.offers.remove(offer_id);
            if rescind {
                if let Some(connection) = &framework.connection {
                    connection.send_scheduler_event(&crate::wire::SchedulerEvent::Rescind {
                        offer_id: offer_id.clone(),
                    });
                }
            }
        }
        Some(offer)
    }

    /// Forcibly removes an agent, emitting LOST status updates for its
    /// tasks unconditionally. Used on maintenance DOWN and mark-gone;
    /// the shutdown message an agent may also receive can be dropped by
    /// the network, so this never depends on it.
    pub(crate) fn remove_agent(&mut self, agent_id: &AgentId, reason: &str) {
        let Some(agent) = self.agents.registered.remove(agent_id) else {
            return;
        };
        info!("event=agent_removed agent={agent_id} reason=\"{reason}\"");

        for offer_id in agent.offers.iter().cloned().collect::<Vec<_>>() {
            if let Some(offer) = self.remove_offer(&offer_id, true) {
                self.allocator.recover_resources(
                    &offer.framework_id,
                    agent_id,
                    &offer.resources,
                    &crate::wire::Filters::default(),
                );
            }
        }
        for inverse_offer_id in agent.inverse_offers.iter() {
            if let Some(inverse_offer) = self.inverse_offers.remove(inverse_offer_id) {
                if let Some(framework) = self.frameworks.get_mut(&inverse_offer.framework_id) {
                    framework.inverse_offers.remove(inverse_offer_id);
                }
            }
        }

        // LOST updates for every task that was running on the agent.
        let mut lost: Vec<(FrameworkId, Task)> = Vec::new();
        for framework in self.frameworks.values_mut() {
            let task_ids: Vec<TaskId> = framework
                .tasks
                .values()
                .filter(|t| &t.agent_id == agent_id)
                .map(|t| t.task_id.clone())
                .collect();
            for task_id in task_ids {
                if let Some(mut task) = framework.tasks.remove(&task_id) {
                    task.state = TaskState::Lost;
                    framework.completed_tasks.push_back(task.clone());
                    if framework.completed_tasks.len() > COMPLETED_BUFFER_LIMIT {
                        framework.completed_tasks.pop_front();
                    }
                    lost.push((framework.id.clone(), task));
                }
            }
            framework
                .pending_tasks
                .retain(|_, info| &info.agent_id != agent_id);
        }
        for (framework_id, task) in lost {
            let status = TaskStatus {
                task_id: task.task_id.clone(),
                state: TaskState::Lost,
                agent_id: Some(agent_id.clone()),
                message: Some(reason.to_string()),
                uuid: None,
            };
            if let Some(connection) = self
                .frameworks
                .get(&framework_id)
                .and_then(|f| f.connection.as_ref())
            {
                connection.send_scheduler_event(&crate::wire::SchedulerEvent::Update {
                    status: status.clone(),
                });
            }
            self.broadcast(&MasterEvent::TaskUpdated {
                framework_id,
                status,
            });
        }

        if let Some(machine_id) = &agent.info.machine {
            if let Some(machine) = self.machines.get_mut(machine_id) {
                machine.agents.remove(agent_id);
            }
        }

        self.broadcast(&MasterEvent::AgentRemoved {
            agent_id: agent_id.clone(),
        });
    }

    pub(crate) fn remove_framework(&mut self, framework_id: &FrameworkId) {
        let Some(mut framework) = self.frameworks.remove(framework_id) else {
            return;
        };
        info!("event=framework_removed framework={framework_id}");

        for offer_id in framework.offers.iter().cloned().collect::<Vec<_>>() {
            if let Some(offer) = self.offers.remove(&offer_id) {
                if let Some(agent) = self.agents.registered.get_mut(&offer.agent_id) {
                    agent.offers.remove(&offer_id);
                }
                self.allocator.recover_resources(
                    framework_id,
                    &offer.agent_id,
                    &offer.resources,
                    &crate::wire::Filters::default(),
                );
            }
        }
        for inverse_offer_id in framework.inverse_offers.iter() {
            self.inverse_offers.remove(inverse_offer_id);
        }

        for (_, task) in framework.tasks.drain() {
            if let Some(agent) = self.agents.registered.get_mut(&task.agent_id) {
                agent.used_resources -= task.resources.clone();
            }
        }

        if let Some(connection) = framework.connection.take() {
            connection.close();
        }

        self.completed_frameworks.push_back(framework.summary());
        if self.completed_frameworks.len() > COMPLETED_BUFFER_LIMIT {
            self.completed_frameworks.pop_front();
        }

        self.broadcast(&MasterEvent::FrameworkRemoved {
            framework_info: framework.info.clone(),
        });
    }

    /// Milliseconds since the epoch; the clock used for gone and
    /// unreachable timestamps.
    pub(crate) fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    pub(crate) fn mint_framework_id(&mut self) -> FrameworkId {
        self.next_framework_id += 1;
        FrameworkId::new(format!("{}-{:04}", self.config.info.id, self.next_framework_id))
    }

    /// Gauges reported by GET_METRICS.
    pub(crate) fn metrics_snapshot(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        let uptime = self
            .started_at
            .elapsed()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        metrics.insert("master/uptime_secs".to_string(), uptime);
        metrics.insert(
            "master/elected".to_string(),
            if self.elected() { 1.0 } else { 0.0 },
        );
        metrics.insert(
            "master/frameworks_active".to_string(),
            self.frameworks.values().filter(|f| f.active).count() as f64,
        );
        metrics.insert(
            "master/frameworks_connected".to_string(),
            self.frameworks.values().filter(|f| f.connected).count() as f64,
        );
        metrics.insert(
            "master/slaves_active".to_string(),
            self.agents.registered.values().filter(|a| a.active).count() as f64,
        );
        metrics.insert(
            "master/slaves_unreachable".to_string(),
            self.agents.unreachable.len() as f64,
        );
        metrics.insert("master/slaves_gone".to_string(), self.agents.gone.len() as f64);
        metrics.insert(
            "master/outstanding_offers".to_string(),
            self.offers.len() as f64,
        );
        metrics.insert(
            "master/event_stream_subscribers".to_string(),
            self.subscribers.len() as f64,
        );
        metrics
    }

    pub(crate) fn set_logging_level(&mut self, level: u32, duration: Duration) {
        let previous = self.logging_level;
        self.logging_level = level;
        apply_log_level(level);
        info!("event=logging_level_set level={level} revert_after={}s", duration.as_secs());

        // Revert to the previous level once the toggle expires.
        if let (Some(runtime), Some(handle)) = (self.runtime.clone(), self.handle.clone()) {
            runtime.spawn(async move {
                tokio::time::sleep(duration).await;
                handle.dispatch(move |master| {
                    if master.logging_level == level {
                        master.logging_level = previous;
                        apply_log_level(previous);
                        info!("event=logging_level_reverted level={previous}");
                    }
                });
            });
        }
    }
}

fn apply_log_level(level: u32) {
    log::set_max_level(match level {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    });
}
