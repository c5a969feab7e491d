//! Read-only request handlers. Each runs on a worker thread with a
//! borrowed view of master state while the actor is paused, and filters
//! what it returns through the caller's approvers.

use super::Master;
use crate::auth::{Action, AuthObject, ObjectApprovers};
use crate::resources::Resources;
use crate::wire::{
    AgentSummary, ExecutorSummary, FrameworkId, GetAgents, GetExecutors, GetFrameworks, GetState,
    GetTasks, MasterResponse, OperationSnapshot, Role, Task,
};
use std::collections::BTreeMap;

fn framework_approved(approvers: &ObjectApprovers, master: &Master, id: &FrameworkId) -> bool {
    let object = master
        .frameworks
        .get(id)
        .map(|f| AuthObject {
            framework_info: Some(f.info.clone()),
            ..AuthObject::default()
        })
        .unwrap_or_default();
    approvers.approved(Action::ViewFramework, &object)
}

pub(crate) fn get_frameworks(master: &Master, approvers: &ObjectApprovers) -> GetFrameworks {
    let mut response = GetFrameworks::default();
    for framework in master.frameworks.values() {
        let object = AuthObject {
            framework_info: Some(framework.info.clone()),
            ..AuthObject::default()
        };
        if approvers.approved(Action::ViewFramework, &object) {
            response.frameworks.push(framework.summary());
        }
    }
    for summary in &master.completed_frameworks {
        let object = AuthObject {
            framework_info: Some(summary.framework_info.clone()),
            ..AuthObject::default()
        };
        if approvers.approved(Action::ViewFramework, &object) {
            response.completed_frameworks.push(summary.clone());
        }
    }
    response
}

pub(crate) fn get_agents(master: &Master, _approvers: &ObjectApprovers) -> GetAgents {
    let mut response = GetAgents::default();
    for agent in master.agents.registered.values() {
        let allocated: Resources = agent
            .offers
            .iter()
            .filter_map(|id| master.offers.get(id))
            .flat_map(|offer| offer.resources.iter().cloned())
            .collect();
        response.agents.push(AgentSummary {
            agent_info: agent.info.clone(),
            active: agent.active,
            total_resources: agent.total_resources.clone(),
            allocated_resources: agent.used_resources.clone() + allocated,
        });
    }
    response.recovered_agents = master.agents.recovered.values().cloned().collect();
    response
}

pub(crate) fn get_tasks(master: &Master, approvers: &ObjectApprovers) -> GetTasks {
    let mut response = GetTasks::default();
    for framework in master.frameworks.values() {
        let object = AuthObject {
            framework_info: Some(framework.info.clone()),
            ..AuthObject::default()
        };
        if !approvers.approved(Action::ViewTask, &object) {
            continue;
        }
        for info in framework.pending_tasks.values() {
            response.pending_tasks.push(Task {
                task_id: info.task_id.clone(),
                framework_id: framework.id.clone(),
                agent_id: info.agent_id.clone(),
                name: info.name.clone(),
                state: crate::wire::TaskState::Staging,
                resources: info.resources.clone(),
            });
        }
        response.tasks.extend(framework.tasks.values().cloned());
        response
            .unreachable_tasks
            .extend(framework.unreachable_tasks.values().cloned());
        response
            .completed_tasks
            .extend(framework.completed_tasks.iter().cloned());
    }
    response
}

pub(crate) fn get_executors(master: &Master, approvers: &ObjectApprovers) -> GetExecutors {
    let mut response = GetExecutors::default();
    for agent in master.agents.registered.values() {
        for executor in &agent.executors {
            if framework_approved(approvers, master, &executor.framework_id)
                && approvers.approved(Action::ViewExecutor, &AuthObject::any())
            {
                response.executors.push(ExecutorSummary {
                    executor_info: executor.clone(),
                    agent_id: agent.id.clone(),
                });
            }
        }
    }
    response
}

pub(crate) fn get_state(master: &Master, approvers: &ObjectApprovers) -> GetState {
    GetState {
        get_frameworks: get_frameworks(master, approvers),
        get_agents: get_agents(master, approvers),
        get_tasks: get_tasks(master, approvers),
        get_executors: get_executors(master, approvers),
    }
}

pub(crate) fn get_state_response(master: &Master, approvers: &ObjectApprovers) -> MasterResponse {
    MasterResponse::GetState(Box::new(get_state(master, approvers)))
}

/// The lighter snapshot behind the legacy summary endpoint: frameworks
/// and agents without per-task detail.
pub(crate) fn get_state_summary_response(
    master: &Master,
    approvers: &ObjectApprovers,
) -> MasterResponse {
    MasterResponse::GetState(Box::new(GetState {
        get_frameworks: get_frameworks(master, approvers),
        get_agents: get_agents(master, approvers),
        get_tasks: GetTasks::default(),
        get_executors: GetExecutors::default(),
    }))
}

pub(crate) fn get_frameworks_response(
    master: &Master,
    approvers: &ObjectApprovers,
) -> MasterResponse {
    MasterResponse::GetFrameworks(get_frameworks(master, approvers))
}

pub(crate) fn get_agents_response(master: &Master, approvers: &ObjectApprovers) -> MasterResponse {
    MasterResponse::GetAgents(get_agents(master, approvers))
}

pub(crate) fn get_tasks_response(master: &Master, approvers: &ObjectApprovers) -> MasterResponse {
    MasterResponse::GetTasks(get_tasks(master, approvers))
}

pub(crate) fn get_executors_response(
    master: &Master,
    approvers: &ObjectApprovers,
) -> MasterResponse {
    MasterResponse::GetExecutors(get_executors(master, approvers))
}

pub(crate) fn get_operations_response(
    master: &Master,
    approvers: &ObjectApprovers,
) -> MasterResponse {
    let mut operations = Vec::new();
    for agent in master.agents.registered.values() {
        for operation in agent.operations.values() {
            let approved = operation
                .framework_id
                .as_ref()
                .map(|id| framework_approved(approvers, master, id))
                .unwrap_or(true);
            if approved {
                operations.push(OperationSnapshot {
                    uuid: operation.uuid.clone(),
                    framework_id: operation.framework_id.clone(),
                    agent_id: operation.agent_id.clone(),
                    info: operation.info.clone(),
                    latest_status: operation.latest_status.clone(),
                });
            }
        }
    }
    MasterResponse::GetOperations { operations }
}

pub(crate) fn get_roles_response(master: &Master, approvers: &ObjectApprovers) -> MasterResponse {
    let mut by_role: BTreeMap<String, Role> = BTreeMap::new();
    for framework in master.frameworks.values() {
        for role in &framework.info.roles {
            if !approvers.approved(Action::ViewRole, &AuthObject::role(role.clone())) {
                continue;
            }
            let entry = by_role.entry(role.clone()).or_insert_with(|| Role {
                name: role.clone(),
                weight: 1.0,
                frameworks: Vec::new(),
                resources: Resources::new(),
            });
            entry.frameworks.push(framework.id.clone());
        }
    }
    for offer in master.offers.values() {
        for resource in offer.resources.iter() {
            if let Some(role) = &resource.allocated_to {
                if let Some(entry) = by_role.get_mut(role) {
                    entry.resources.add(resource.clone());
                }
            }
        }
    }
    MasterResponse::GetRoles {
        roles: by_role.into_values().collect(),
    }
}
