//! Actor-side handling of the non-subscribe scheduler calls. All of
//! these run after the dispatcher has resolved the framework and
//! checked its stream identity; they answer 202 and do their work
//! asynchronously.

use super::Master;
use super::COMPLETED_BUFFER_LIMIT;
use crate::wire::{
    Accept, Acknowledge, AcknowledgeOperationStatus, Decline, FrameworkId, InverseOfferIds, Kill,
    Message, OfferOperation, OperationState, OperationStatus, Reconcile, ReconcileOperations,
    SchedulerEvent, SchedulerResponse, Shutdown, Task, TaskState, TaskStatus,
};
use log::{info, warn};

impl Master {
    /// Consumes the named offers: launches become tracked tasks, other
    /// operations are forwarded to the agent, and whatever is left is
    /// returned to the allocator under the accept's filters.
    pub(crate) fn accept_offers(&mut self, framework_id: &FrameworkId, accept: Accept) {
        use std::collections::HashMap;

        let mut offered: HashMap<crate::wire::AgentId, crate::resources::Resources> =
            HashMap::new();
        for offer_id in &accept.offer_ids {
            let belongs = self
                .frameworks
                .get(framework_id)
                .map(|f| f.offers.contains(offer_id))
                .unwrap_or(false);
            if !belongs {
                warn!(
                    "event=accept_unknown_offer framework={framework_id} offer={offer_id}"
                );
                continue;
            }
            if let Some(offer) = self.remove_offer(offer_id, false) {
                *offered.entry(offer.agent_id.clone()).or_default() +=
                    offer.resources.unallocate();
            }
        }

        let filters = accept.filters.clone().unwrap_or_default();
        for operation in accept.operations {
            match operation {
                OfferOperation::Launch { tasks } => {
                    for task_info in tasks {
                        if let Some(remaining) = offered.get_mut(&task_info.agent_id) {
                            *remaining -= task_info.resources.clone();
                        }
                        let task = Task {
                            task_id: task_info.task_id.clone(),
                            framework_id: framework_id.clone(),
                            agent_id: task_info.agent_id.clone(),
                            name: task_info.name.clone(),
                            state: TaskState::Staging,
                            resources: task_info.resources.clone(),
                        };
                        if let Some(agent) =
                            self.agents.registered.get_mut(&task_info.agent_id)
                        {
                            agent.used_resources += task_info.resources.clone();
                        }
                        if let Some(framework) = self.frameworks.get_mut(framework_id) {
                            framework.tasks.insert(task_info.task_id.clone(), task.clone());
                        }
                        info!(
                            "event=task_launched framework={framework_id} task={} agent={}",
                            task.task_id, task.agent_id
                        );
                        self.broadcast(&crate::wire::MasterEvent::TaskAdded { task });
                    }
                }
                operation => {
                    // Offer-carried resource operations follow the same
                    // apply path as the operator API, keyed by a fresh
                    // uuid until their terminal status is acknowledged.
                    let Some(agent_id) = offered.keys().next().cloned() else {
                        warn!(
                            "event=accept_operation_dropped framework={framework_id} \
                             operation={} reason=no_valid_offers",
                            operation.name()
                        );
                        continue;
                    };
                    self.submit_operation(&agent_id, operation, Some(framework_id.clone()));
                }
            }
        }

        for (agent_id, remaining) in offered {
            if !remaining.is_empty() {
                self.allocator
                    .recover_resources(framework_id, &agent_id, &remaining, &filters);
            }
        }
    }

    /// Forwards an operation to the agent off-thread and records it on
    /// success.
    pub(crate) fn submit_operation(
        &mut self,
        agent_id: &crate::wire::AgentId,
        operation: OfferOperation,
        framework_id: Option<FrameworkId>,
    ) {
        let (Some(runtime), Some(handle)) = (self.runtime.clone(), self.handle.clone()) else {
            return;
        };
        let transport = self.transport.clone();
        let agent_id = agent_id.clone();
        let uuid = uuid::Uuid::new_v4().as_bytes().to_vec();
        runtime.spawn(async move {
            match transport.apply(&agent_id, &operation).await {
                Ok(()) => handle.dispatch(move |master| {
                    master.record_applied_operation(&agent_id, operation, framework_id, uuid);
                }),
                Err(err) => {
                    warn!("event=operation_apply_failed agent={agent_id} error={err}");
                }
            }
        });
    }

    pub(crate) fn decline_offers(&mut self, framework_id: &FrameworkId, decline: Decline) {
        let filters = decline.filters.unwrap_or_default();
        for offer_id in &decline.offer_ids {
            let belongs = self
                .frameworks
                .get(framework_id)
                .map(|f| f.offers.contains(offer_id))
                .unwrap_or(false);
            if !belongs {
                continue;
            }
            if let Some(offer) = self.remove_offer(offer_id, false) {
                self.allocator.recover_resources(
                    framework_id,
                    &offer.agent_id,
                    &offer.resources,
                    &filters,
                );
            }
        }
    }

    /// Both answers to an inverse offer retire it from master state;
    /// the framework's stance is observed by the allocator.
    pub(crate) fn settle_inverse_offers(
        &mut self,
        framework_id: &FrameworkId,
        call: InverseOfferIds,
        accepted: bool,
    ) {
        for inverse_offer_id in &call.inverse_offer_ids {
            let Some(inverse_offer) = self.inverse_offers.remove(inverse_offer_id) else {
                continue;
            };
            if &inverse_offer.framework_id != framework_id {
                self.inverse_offers
                    .insert(inverse_offer_id.clone(), inverse_offer);
                continue;
            }
            if let Some(framework) = self.frameworks.get_mut(framework_id) {
                framework.inverse_offers.remove(inverse_offer_id);
            }
            if let Some(agent) = self.agents.registered.get_mut(&inverse_offer.agent_id) {
                agent.inverse_offers.remove(inverse_offer_id);
            }
            info!(
                "event=inverse_offer_settled framework={framework_id} \
                 inverse_offer={inverse_offer_id} accepted={accepted}"
            );
        }
    }

    pub(crate) fn revive(&mut self, framework_id: &FrameworkId) {
        let roles = self
            .frameworks
            .get(framework_id)
            .map(|f| f.info.roles.clone())
            .unwrap_or_default();
        self.allocator.revive_offers(framework_id, &roles);
    }

    pub(crate) fn suppress(&mut self, framework_id: &FrameworkId) {
        let roles = self
            .frameworks
            .get(framework_id)
            .map(|f| f.info.roles.clone())
            .unwrap_or_default();
        self.allocator.suppress_offers(framework_id, &roles);
    }

    /// Forwards the kill to the agent for a known running task; for an
    /// unknown task the framework immediately learns it is lost.
    pub(crate) fn kill_task(&mut self, framework_id: &FrameworkId, kill: Kill) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        if let Some(info) = framework.pending_tasks.remove(&kill.task_id) {
            let status = TaskStatus {
                task_id: kill.task_id.clone(),
                state: TaskState::Killed,
                agent_id: Some(info.agent_id),
                message: Some("Killed before delivery to the agent".to_string()),
                uuid: None,
            };
            if let Some(connection) = &framework.connection {
                connection.send_scheduler_event(&SchedulerEvent::Update { status });
            }
            return;
        }
        if let Some(task) = framework.tasks.get(&kill.task_id) {
            let agent_id = task.agent_id.clone();
            self.transport.kill_task(&agent_id, &kill.task_id);
            return;
        }
        let status = TaskStatus {
            task_id: kill.task_id.clone(),
            state: TaskState::Lost,
            agent_id: kill.agent_id,
            message: Some("Attempted to kill an unknown task".to_string()),
            uuid: None,
        };
        if let Some(connection) = &framework.connection {
            connection.send_scheduler_event(&SchedulerEvent::Update { status });
        }
    }

    pub(crate) fn shutdown_executor(&mut self, framework_id: &FrameworkId, shutdown: Shutdown) {
        info!(
            "event=executor_shutdown framework={framework_id} executor={} agent={}",
            shutdown.executor_id, shutdown.agent_id
        );
        self.transport
            .shutdown_executor(&shutdown.agent_id, &shutdown.executor_id);
    }

    /// Retires an acknowledged terminal task into the completed bucket.
    pub(crate) fn acknowledge(&mut self, framework_id: &FrameworkId, acknowledge: Acknowledge) {
        let removed = {
            let Some(framework) = self.frameworks.get_mut(framework_id) else {
                return;
            };
            let terminal = framework
                .tasks
                .get(&acknowledge.task_id)
                .map(|task| {
                    matches!(
                        task.state,
                        TaskState::Finished
                            | TaskState::Failed
                            | TaskState::Killed
                            | TaskState::Lost
                            | TaskState::Gone
                    )
                })
                .unwrap_or(false);
            if terminal {
                framework.tasks.remove(&acknowledge.task_id)
            } else {
                None
            }
        };
        if let Some(task) = removed {
            if let Some(agent) = self.agents.registered.get_mut(&task.agent_id) {
                agent.used_resources -= task.resources.clone();
            }
            if let Some(framework) = self.frameworks.get_mut(framework_id) {
                framework.completed_tasks.push_back(task);
                if framework.completed_tasks.len() > COMPLETED_BUFFER_LIMIT {
                    framework.completed_tasks.pop_front();
                }
            }
        }
    }

    /// Removes an operation once its terminal status is acknowledged.
    pub(crate) fn acknowledge_operation_status(
        &mut self,
        framework_id: &FrameworkId,
        acknowledge: AcknowledgeOperationStatus,
    ) {
        let Some(agent_id) = acknowledge.agent_id else {
            return;
        };
        let Some(agent) = self.agents.registered.get_mut(&agent_id) else {
            return;
        };
        let terminal = agent
            .operations
            .get(&acknowledge.uuid)
            .map(|op| op.latest_status.state != OperationState::Pending)
            .unwrap_or(false);
        if terminal {
            agent.operations.remove(&acknowledge.uuid);
            info!(
                "event=operation_acknowledged framework={framework_id} agent={agent_id}"
            );
        }
    }

    /// Answers with the master's best knowledge of each task's state:
    /// tracked tasks report their current state, unreachable tasks
    /// UNREACHABLE, unknown tasks LOST. An empty list asks about every
    /// known task.
    pub(crate) fn reconcile(&mut self, framework_id: &FrameworkId, reconcile: Reconcile) {
        let Some(framework) = self.frameworks.get(framework_id) else {
            return;
        };
        let Some(connection) = framework.connection.clone() else {
            return;
        };

        let statuses: Vec<TaskStatus> = if reconcile.tasks.is_empty() {
            framework
                .tasks
                .values()
                .map(|task| TaskStatus {
                    task_id: task.task_id.clone(),
                    state: task.state,
                    agent_id: Some(task.agent_id.clone()),
                    message: Some("Reconciliation: latest known state".to_string()),
                    uuid: None,
                })
                .chain(framework.unreachable_tasks.values().map(|task| TaskStatus {
                    task_id: task.task_id.clone(),
                    state: TaskState::Unreachable,
                    agent_id: Some(task.agent_id.clone()),
                    message: Some("Reconciliation: task is unreachable".to_string()),
                    uuid: None,
                }))
                .collect()
        } else {
            reconcile
                .tasks
                .iter()
                .map(|entry| {
                    if let Some(task) = framework.tasks.get(&entry.task_id) {
                        TaskStatus {
                            task_id: task.task_id.clone(),
                            state: task.state,
                            agent_id: Some(task.agent_id.clone()),
                            message: Some("Reconciliation: latest known state".to_string()),
                            uuid: None,
                        }
                    } else if framework.unreachable_tasks.contains_key(&entry.task_id) {
                        TaskStatus {
                            task_id: entry.task_id.clone(),
                            state: TaskState::Unreachable,
                            agent_id: entry.agent_id.clone(),
                            message: Some("Reconciliation: task is unreachable".to_string()),
                            uuid: None,
                        }
                    } else {
                        TaskStatus {
                            task_id: entry.task_id.clone(),
                            state: TaskState::Lost,
                            agent_id: entry.agent_id.clone(),
                            message: Some("Reconciliation: task is unknown".to_string()),
                            uuid: None,
                        }
                    }
                })
                .collect()
        };

        for status in statuses {
            connection.send_scheduler_event(&SchedulerEvent::Update { status });
        }
    }

    /// Unlike the other scheduler calls this one returns a body: the
    /// status of each asked-about operation, OPERATION_UNKNOWN style
    /// for the rest.
    pub(crate) fn reconcile_operations(
        &self,
        framework_id: &FrameworkId,
        call: ReconcileOperations,
    ) -> SchedulerResponse {
        let owned: Vec<&super::Operation> = self
            .agents
            .registered
            .values()
            .flat_map(|agent| agent.operations.values())
            .filter(|op| op.framework_id.as_ref() == Some(framework_id))
            .collect();

        let operation_statuses = if call.operations.is_empty() {
            owned.iter().map(|op| op.latest_status.clone()).collect()
        } else {
            call.operations
                .iter()
                .map(|entry| {
                    owned
                        .iter()
                        .find(|op| {
                            op.latest_status.operation_id.as_ref() == Some(&entry.operation_id)
                        })
                        .map(|op| op.latest_status.clone())
                        .unwrap_or(OperationStatus {
                            operation_id: Some(entry.operation_id.clone()),
                            state: OperationState::Unknown,
                            message: Some("Operation is unknown".to_string()),
                            uuid: None,
                        })
                })
                .collect()
        };

        SchedulerResponse::ReconcileOperations { operation_statuses }
    }

    pub(crate) fn framework_message(&mut self, framework_id: &FrameworkId, message: Message) {
        info!(
            "event=framework_message framework={framework_id} agent={} executor={} bytes={}",
            message.agent_id,
            message.executor_id,
            message.data.len()
        );
        self.transport
            .framework_message(&message.agent_id, &message.executor_id, &message.data);
    }
}
