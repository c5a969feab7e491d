//! Legacy form endpoints and the human-facing maintenance and state
//! routes. Everything here delegates to the same pipelines as the
//! operator API; only the request and response shapes differ.

use super::api;
use super::http::{HttpRequest, Response};
use super::server::{check_principal, leader_gate, ApiContext};
use crate::auth::{Action, Principal};
use crate::maintenance::{MachineId, Schedule};
use crate::resources::Resource;
use crate::wire::{AgentId, FrameworkId, MasterResponse, OfferOperation};
use std::collections::HashMap;

fn form_values(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

fn parse_resources(values: &HashMap<String, String>, key: &str) -> Result<Vec<Resource>, Response> {
    let value = values.get(key).ok_or_else(|| {
        Response::bad_request(format!("Missing '{key}' query parameter in the request body"))
    })?;
    serde_json::from_str(value).map_err(|err| {
        Response::bad_request(format!(
            "Error in parsing '{key}' query parameter in the request body: {err}"
        ))
    })
}

fn parse_agent_id(values: &HashMap<String, String>) -> Result<AgentId, Response> {
    values
        .get("slaveId")
        .map(|value| AgentId::new(value.clone()))
        .ok_or_else(|| {
            Response::bad_request("Missing 'slaveId' query parameter in the request body")
        })
}

/// Shared preamble for the POST-only form endpoints.
async fn form_preamble(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<&Principal>,
) -> Result<HashMap<String, String>, Response> {
    check_principal(principal)?;
    leader_gate(ctx, request).await?;
    if request.method != "POST" {
        return Err(Response::method_not_allowed(&["POST"], &request.method));
    }
    Ok(form_values(&request.body))
}

pub(crate) async fn reserve(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    let values = match form_preamble(ctx, request, principal.as_ref()).await {
        Ok(values) => values,
        Err(response) => return response,
    };
    let agent_id = match parse_agent_id(&values) {
        Ok(agent_id) => agent_id,
        Err(response) => return response,
    };
    let resources = match parse_resources(&values, "resources") {
        Ok(resources) => resources,
        Err(response) => return response,
    };
    api::run_operation(
        ctx,
        agent_id,
        OfferOperation::Reserve {
            resources: resources.into(),
        },
        principal,
    )
    .await
}

pub(crate) async fn unreserve(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    let values = match form_preamble(ctx, request, principal.as_ref()).await {
        Ok(values) => values,
        Err(response) => return response,
    };
    let agent_id = match parse_agent_id(&values) {
        Ok(agent_id) => agent_id,
        Err(response) => return response,
    };
    let resources = match parse_resources(&values, "resources") {
        Ok(resources) => resources,
        Err(response) => return response,
    };
    api::run_operation(
        ctx,
        agent_id,
        OfferOperation::Unreserve {
            resources: resources.into(),
        },
        principal,
    )
    .await
}

pub(crate) async fn create_volumes(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    let values = match form_preamble(ctx, request, principal.as_ref()).await {
        Ok(values) => values,
        Err(response) => return response,
    };
    let agent_id = match parse_agent_id(&values) {
        Ok(agent_id) => agent_id,
        Err(response) => return response,
    };
    let volumes = match parse_resources(&values, "volumes") {
        Ok(volumes) => volumes,
        Err(response) => return response,
    };
    api::run_operation(
        ctx,
        agent_id,
        OfferOperation::Create {
            volumes: volumes.into(),
        },
        principal,
    )
    .await
}

pub(crate) async fn destroy_volumes(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    let values = match form_preamble(ctx, request, principal.as_ref()).await {
        Ok(values) => values,
        Err(response) => return response,
    };
    let agent_id = match parse_agent_id(&values) {
        Ok(agent_id) => agent_id,
        Err(response) => return response,
    };
    let volumes = match parse_resources(&values, "volumes") {
        Ok(volumes) => volumes,
        Err(response) => return response,
    };
    api::run_operation(
        ctx,
        agent_id,
        OfferOperation::Destroy {
            volumes: volumes.into(),
        },
        principal,
    )
    .await
}

pub(crate) async fn teardown(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    let values = match form_preamble(ctx, request, principal.as_ref()).await {
        Ok(values) => values,
        Err(response) => return response,
    };
    let Some(framework_id) = values.get("frameworkId") else {
        return Response::bad_request("Missing 'frameworkId' query parameter in the request body");
    };
    api::teardown(ctx, FrameworkId::new(framework_id.clone()), principal).await
}

/// GET returns the schedule as JSON filtered by viewer authorization;
/// POST replaces it wholesale.
pub(crate) async fn maintenance_schedule(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    if let Err(response) = leader_gate(ctx, request).await {
        return response;
    }
    match request.method.as_str() {
        "GET" => {
            let approvers = match api::approvers_for(
                ctx,
                principal.as_ref(),
                &[Action::GetMaintenanceSchedule],
            )
            .await
            {
                Ok(approvers) => approvers,
                Err(response) => return response,
            };
            match ctx
                .context
                .master
                .call(move |m| m.maintenance_schedule_filtered(&approvers))
                .await
            {
                Ok(schedule) => Response::json(200, &schedule),
                Err(err) => Response::internal_error(err.to_string()),
            }
        }
        "POST" => {
            let schedule: Schedule = match serde_json::from_slice(&request.body) {
                Ok(schedule) => schedule,
                Err(err) => return Response::bad_request(err.to_string()),
            };
            api::update_maintenance_schedule(ctx, schedule, principal).await
        }
        other => Response::method_not_allowed(&["GET", "POST"], other),
    }
}

pub(crate) async fn maintenance_status(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    if let Err(response) = leader_gate(ctx, request).await {
        return response;
    }
    if request.method != "GET" {
        return Response::method_not_allowed(&["GET"], &request.method);
    }
    let approvers =
        match api::approvers_for(ctx, principal.as_ref(), &[Action::GetMaintenanceStatus]).await {
            Ok(approvers) => approvers,
            Err(response) => return response,
        };
    let statuses = ctx.context.allocator.inverse_offer_statuses().await;
    match ctx
        .context
        .master
        .call(move |m| m.maintenance_status(&approvers, statuses))
        .await
    {
        Ok(status) => Response::json(200, &status),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

fn parse_machine_ids(body: &[u8]) -> Result<Vec<MachineId>, Response> {
    serde_json::from_slice(body).map_err(|err| Response::bad_request(err.to_string()))
}

pub(crate) async fn machine_down(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    if let Err(response) = leader_gate(ctx, request).await {
        return response;
    }
    if request.method != "POST" {
        return Response::method_not_allowed(&["POST"], &request.method);
    }
    match parse_machine_ids(&request.body) {
        Ok(machines) => api::start_maintenance(ctx, machines, principal).await,
        Err(response) => response,
    }
}

pub(crate) async fn machine_up(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    if let Err(response) = leader_gate(ctx, request).await {
        return response;
    }
    if request.method != "POST" {
        return Response::method_not_allowed(&["POST"], &request.method);
    }
    match parse_machine_ids(&request.body) {
        Ok(machines) => api::stop_maintenance(ctx, machines, principal).await,
        Err(response) => response,
    }
}

/// The read-only state routes, all funneled through the batching
/// scheduler and returned as JSON.
pub(crate) async fn read_only(
    ctx: &ApiContext,
    request: &HttpRequest,
    path: &str,
    principal: Option<Principal>,
) -> Response {
    if let Err(response) = check_principal(principal.as_ref()) {
        return response;
    }
    if let Err(response) = leader_gate(ctx, request).await {
        return response;
    }
    if request.method != "GET" {
        return Response::method_not_allowed(&["GET"], &request.method);
    }

    let handler: crate::master::ReadOnlyHandler = match path {
        "/state" => crate::master::read_only_state,
        "/state-summary" => crate::master::read_only_state_summary,
        "/frameworks" => crate::master::read_only_frameworks,
        "/slaves" => crate::master::read_only_agents,
        "/tasks" => crate::master::read_only_tasks,
        "/roles" => crate::master::read_only_roles,
        other => return Response::not_found(format!("no route for GET {other}")),
    };

    let approvers = match api::approvers_for(
        ctx,
        principal.as_ref(),
        &[
            Action::ViewFramework,
            Action::ViewTask,
            Action::ViewExecutor,
            Action::ViewRole,
        ],
    )
    .await
    {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };

    match ctx.context.master.batched_read(handler, approvers).await {
        Ok(response) => match &response {
            MasterResponse::GetState(state) => Response::json(200, state),
            MasterResponse::GetFrameworks(frameworks) => Response::json(200, frameworks),
            MasterResponse::GetAgents(agents) => Response::json(200, agents),
            MasterResponse::GetTasks(tasks) => Response::json(200, tasks),
            other => Response::json(200, other),
        },
        Err(err) => Response::internal_error(err.to_string()),
    }
}
