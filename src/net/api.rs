//! The operator API endpoint: one entry point, exhaustive dispatch on
//! call kind. Mutating calls run the validation, authorization,
//! rescind, and apply pipeline; reads run through the batching
//! scheduler; SUBSCRIBE opens the event stream.

use super::http::{HttpRequest, Response};
use super::media::{self, RequestMediaTypes};
use super::server::{check_principal, leader_gate, ApiContext};
use super::registry_failure;
use crate::auth::{Action, AuthObject, ObjectApprovers, Principal};
use crate::files::FilesError;
use crate::maintenance::{MachineId, Schedule};
use crate::master::{GonePrecondition, HttpConnection};
use crate::pipe::pipe;
use crate::recordio::RecordReader;
use crate::registry::{RegistryError, RegistryOperation};
use crate::wire::{
    self, AgentId, ContentType, FrameworkId, MasterCall, MasterResponse, OfferOperation, StreamId,
};
use bytes::Bytes;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) async fn api(
    ctx: &ApiContext,
    request: &HttpRequest,
    principal: Option<Principal>,
) -> Response {
    if let Err(response) = check_principal(principal.as_ref()) {
        return response;
    }
    if let Err(response) = leader_gate(ctx, request).await {
        return response;
    }
    if request.method != "POST" {
        return Response::method_not_allowed(&["POST"], &request.method);
    }
    let media = match media::negotiate(request) {
        Ok(media) => media,
        Err(response) => return response,
    };

    let call: MasterCall = if media.content.is_streaming() {
        // The body is a framed record stream; the first record is the
        // call, which must turn out to be SUBSCRIBE.
        let (writer, reader) = pipe();
        let _ = writer.write(Bytes::from(request.body.clone()));
        writer.close();
        let encoding = media.request_encoding();
        let mut reader = RecordReader::new(reader, move |bytes| {
            wire::deserialize::<MasterCall>(encoding, bytes).map_err(|err| err.to_string())
        });
        match reader.read().await {
            Ok(Some(call)) => call,
            Ok(None) => return Response::bad_request("Received EOF while reading request body"),
            Err(err) => return Response::bad_request(err.to_string()),
        }
    } else {
        match wire::deserialize(media.content, &request.body) {
            Ok(call) => call,
            Err(err) => {
                return Response::bad_request(format!("Failed to parse body into a call: {err}"));
            }
        }
    };

    dispatch(ctx, call, media, principal).await
}

async fn dispatch(
    ctx: &ApiContext,
    call: MasterCall,
    media: RequestMediaTypes,
    principal: Option<Principal>,
) -> Response {
    // A streaming request or response only makes sense for a call that
    // opens a stream.
    let subscribing = matches!(call, MasterCall::Subscribe);
    if media.content.is_streaming() && !subscribing {
        return Response::unsupported_media_type(format!(
            "Streaming 'Content-Type' {} is not supported for {} call",
            media.content,
            call.name()
        ));
    }
    if media.accept.is_streaming() && !subscribing {
        return Response::not_acceptable(format!(
            "Streaming response is not supported for {} call",
            call.name()
        ));
    }

    info!("event=processing_call call={}", call.name());

    let accept = media.accept;
    match call {
        MasterCall::Unknown
        | MasterCall::GetWeights
        | MasterCall::UpdateWeights
        | MasterCall::GetQuota
        | MasterCall::UpdateQuota
        | MasterCall::SetQuota
        | MasterCall::RemoveQuota => Response::not_implemented(),

        MasterCall::GetHealth => {
            respond(&MasterResponse::GetHealth { healthy: true }, accept)
        }

        MasterCall::GetFlags => get_flags(ctx, principal, accept).await,

        MasterCall::GetVersion => {
            let version = match ctx.context.master.call(|m| m.config.version.clone()).await {
                Ok(version) => version,
                Err(err) => return Response::internal_error(err.to_string()),
            };
            respond(&MasterResponse::GetVersion { version }, accept)
        }

        MasterCall::GetMetrics { timeout_ms } => get_metrics(ctx, timeout_ms, accept).await,

        MasterCall::GetLoggingLevel => {
            let level = match ctx.context.master.call(|m| m.logging_level).await {
                Ok(level) => level,
                Err(err) => return Response::internal_error(err.to_string()),
            };
            respond(&MasterResponse::GetLoggingLevel { level }, accept)
        }

        MasterCall::SetLoggingLevel { level, duration_ms } => {
            let approvers =
                match approvers_for(ctx, principal.as_ref(), &[Action::SetLogLevel]).await {
                    Ok(approvers) => approvers,
                    Err(response) => return response,
                };
            if !approvers.approved(Action::SetLogLevel, &AuthObject::any()) {
                return Response::empty(403);
            }
            let duration = Duration::from_millis(duration_ms);
            match ctx
                .context
                .master
                .call(move |m| m.set_logging_level(level, duration))
                .await
            {
                Ok(()) => Response::ok(),
                Err(err) => Response::internal_error(err.to_string()),
            }
        }

        MasterCall::ListFiles { path } => {
            match ctx.context.files.browse(&path, principal.as_ref()).await {
                Ok(file_infos) => respond(&MasterResponse::ListFiles { file_infos }, accept),
                Err(err) => files_error_response(err),
            }
        }

        MasterCall::ReadFile {
            path,
            offset,
            length,
        } => {
            match ctx
                .context
                .files
                .read(offset, length, &path, principal.as_ref())
                .await
            {
                Ok((size, data)) => respond(&MasterResponse::ReadFile { size, data }, accept),
                Err(err) => files_error_response(err),
            }
        }

        MasterCall::GetState => {
            batched(ctx, principal, VIEW_ACTIONS, crate::master::read_only_state, accept).await
        }
        MasterCall::GetAgents => {
            batched(ctx, principal, VIEW_ACTIONS, crate::master::read_only_agents, accept).await
        }
        MasterCall::GetFrameworks => {
            batched(
                ctx,
                principal,
                VIEW_ACTIONS,
                crate::master::read_only_frameworks,
                accept,
            )
            .await
        }
        MasterCall::GetExecutors => {
            batched(
                ctx,
                principal,
                VIEW_ACTIONS,
                crate::master::read_only_executors,
                accept,
            )
            .await
        }
        MasterCall::GetOperations => {
            batched(
                ctx,
                principal,
                VIEW_ACTIONS,
                crate::master::read_only_operations,
                accept,
            )
            .await
        }
        MasterCall::GetTasks => {
            batched(ctx, principal, VIEW_ACTIONS, crate::master::read_only_tasks, accept).await
        }
        MasterCall::GetRoles => {
            batched(ctx, principal, VIEW_ACTIONS, crate::master::read_only_roles, accept).await
        }

        MasterCall::GetMaster => {
            let master_info = ctx.self_info.clone();
            respond(&MasterResponse::GetMaster { master_info }, accept)
        }

        MasterCall::Subscribe => subscribe(ctx, media, principal).await,

        MasterCall::ReserveResources {
            agent_id,
            resources,
        } => {
            run_operation(
                ctx,
                agent_id,
                OfferOperation::Reserve {
                    resources: resources.into(),
                },
                principal,
            )
            .await
        }
        MasterCall::UnreserveResources {
            agent_id,
            resources,
        } => {
            run_operation(
                ctx,
                agent_id,
                OfferOperation::Unreserve {
                    resources: resources.into(),
                },
                principal,
            )
            .await
        }
        MasterCall::CreateVolumes { agent_id, volumes } => {
            run_operation(
                ctx,
                agent_id,
                OfferOperation::Create {
                    volumes: volumes.into(),
                },
                principal,
            )
            .await
        }
        MasterCall::DestroyVolumes { agent_id, volumes } => {
            run_operation(
                ctx,
                agent_id,
                OfferOperation::Destroy {
                    volumes: volumes.into(),
                },
                principal,
            )
            .await
        }
        MasterCall::GrowVolume {
            agent_id,
            volume,
            addition,
        } => {
            run_operation(
                ctx,
                agent_id,
                OfferOperation::GrowVolume { volume, addition },
                principal,
            )
            .await
        }
        MasterCall::ShrinkVolume {
            agent_id,
            volume,
            subtract,
        } => {
            run_operation(
                ctx,
                agent_id,
                OfferOperation::ShrinkVolume { volume, subtract },
                principal,
            )
            .await
        }

        MasterCall::GetMaintenanceStatus => {
            get_maintenance_status(ctx, principal, accept).await
        }
        MasterCall::GetMaintenanceSchedule => {
            get_maintenance_schedule(ctx, principal, accept).await
        }
        MasterCall::UpdateMaintenanceSchedule { schedule } => {
            update_maintenance_schedule(ctx, schedule, principal).await
        }
        MasterCall::StartMaintenance { machines } => {
            start_maintenance(ctx, machines, principal).await
        }
        MasterCall::StopMaintenance { machines } => {
            stop_maintenance(ctx, machines, principal).await
        }

        MasterCall::Teardown { framework_id } => teardown(ctx, framework_id, principal).await,

        MasterCall::MarkAgentGone { agent_id } => mark_agent_gone(ctx, agent_id, principal).await,
    }
}

const VIEW_ACTIONS: &[Action] = &[
    Action::ViewFramework,
    Action::ViewTask,
    Action::ViewExecutor,
    Action::ViewRole,
];

fn respond(response: &MasterResponse, accept: ContentType) -> Response {
    match wire::serialize(accept, response) {
        Ok(body) => Response::ok_with(accept.as_media_type(), body),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

/// Authorizer failures surface as 500; denials are the caller's
/// problem, not this helper's.
pub(crate) async fn approvers_for(
    ctx: &ApiContext,
    principal: Option<&Principal>,
    actions: &[Action],
) -> Result<Arc<ObjectApprovers>, Response> {
    ObjectApprovers::create(ctx.context.authorizer.as_ref(), principal, actions)
        .await
        .map_err(|err| Response::internal_error(err.to_string()))
}

async fn batched(
    ctx: &ApiContext,
    principal: Option<Principal>,
    actions: &[Action],
    handler: crate::master::ReadOnlyHandler,
    accept: ContentType,
) -> Response {
    let approvers = match approvers_for(ctx, principal.as_ref(), actions).await {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };
    match ctx.context.master.batched_read(handler, approvers).await {
        Ok(response) => respond(&response, accept),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

async fn get_flags(
    ctx: &ApiContext,
    principal: Option<Principal>,
    accept: ContentType,
) -> Response {
    let approvers = match approvers_for(ctx, principal.as_ref(), &[Action::ViewFlags]).await {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };
    if !approvers.approved(Action::ViewFlags, &AuthObject::any()) {
        return Response::empty(403);
    }
    match ctx.context.master.call(|m| m.config.flags.clone()).await {
        Ok(flags) => respond(&MasterResponse::GetFlags { flags }, accept),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

/// GET_METRICS carries the only explicit timeout on this surface: a
/// snapshot that cannot be gathered in time degrades to whatever is
/// available, which for the master gauges is an empty map.
async fn get_metrics(ctx: &ApiContext, timeout_ms: Option<u64>, accept: ContentType) -> Response {
    let snapshot = ctx.context.master.call(|m| m.metrics_snapshot());
    let metrics = match timeout_ms {
        Some(timeout_ms) => {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), snapshot).await {
                Ok(Ok(metrics)) => metrics,
                Ok(Err(err)) => return Response::internal_error(err.to_string()),
                Err(_elapsed) => BTreeMap::new(),
            }
        }
        None => match snapshot.await {
            Ok(metrics) => metrics,
            Err(err) => return Response::internal_error(err.to_string()),
        },
    };
    respond(&MasterResponse::GetMetrics { metrics }, accept)
}

fn files_error_response(err: FilesError) -> Response {
    match err {
        FilesError::Invalid(message) => Response::bad_request(message),
        FilesError::Unauthorized(message) => Response::forbidden(message),
        FilesError::NotFound(message) => Response::not_found(message),
        FilesError::Unknown(message) => Response::internal_error(message),
    }
}

/// Operator SUBSCRIBE: a streaming response whose first record is
/// SUBSCRIBED carrying a consistent snapshot, followed by HEARTBEAT.
/// Snapshot, both records, and subscriber registration happen in one
/// actor turn so no event can interleave.
async fn subscribe(
    ctx: &ApiContext,
    media: RequestMediaTypes,
    principal: Option<Principal>,
) -> Response {
    let approvers = match approvers_for(ctx, principal.as_ref(), VIEW_ACTIONS).await {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };

    let (writer, reader) = pipe();
    // The response is a record stream; its Content-Type names the
    // encoding inside the frames, honoring 'Message-Accept' when the
    // client asked for a streaming 'Accept'.
    let content_type = media.response_encoding();
    let connection = HttpConnection::new(writer, content_type, StreamId::random());

    if let Err(err) = ctx
        .context
        .master
        .call(move |m| m.subscribe_operator(connection, approvers))
        .await
    {
        return Response::internal_error(err.to_string());
    }

    Response::Stream {
        status: 200,
        headers: vec![(
            "Content-Type".to_string(),
            content_type.as_media_type().to_string(),
        )],
        reader,
    }
}

/// The shared mutating-operation pipeline. Legacy form endpoints
/// delegate here as well.
pub(crate) async fn run_operation(
    ctx: &ApiContext,
    agent_id: AgentId,
    operation: OfferOperation,
    principal: Option<Principal>,
) -> Response {
    let prepare_principal = principal.clone();
    let prepare_agent = agent_id.clone();
    let prepared = match ctx
        .context
        .master
        .call(move |m| {
            m.prepare_operation(&prepare_agent, operation, prepare_principal.as_ref())
        })
        .await
    {
        Ok(Ok(prepared)) => prepared,
        Ok(Err(message)) => return Response::bad_request(message),
        Err(err) => return Response::internal_error(err.to_string()),
    };

    let actions: Vec<Action> = {
        let mut actions: Vec<Action> = prepared.auth.iter().map(|(action, _)| *action).collect();
        actions.dedup();
        actions
    };
    let approvers = match approvers_for(ctx, principal.as_ref(), &actions).await {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };
    for (action, object) in &prepared.auth {
        if !approvers.approved(*action, object) {
            return Response::empty(403);
        }
    }

    let operation = prepared.operation.clone();
    let required = prepared.required.clone();
    let rescind_agent = agent_id.clone();
    let rescind_operation = operation.clone();
    if let Err(err) = ctx
        .context
        .master
        .call(move |m| m.rescind_covering_offers(&rescind_agent, required, &rescind_operation))
        .await
    {
        return Response::internal_error(err.to_string());
    }

    match ctx.context.transport.apply(&agent_id, &operation).await {
        Ok(()) => {
            let uuid = uuid::Uuid::new_v4().as_bytes().to_vec();
            let record_agent = agent_id.clone();
            let _ = ctx
                .context
                .master
                .call(move |m| m.record_applied_operation(&record_agent, operation, None, uuid))
                .await;
            Response::accepted()
        }
        Err(failure) => Response::conflict(failure),
    }
}

async fn get_maintenance_schedule(
    ctx: &ApiContext,
    principal: Option<Principal>,
    accept: ContentType,
) -> Response {
    let approvers =
        match approvers_for(ctx, principal.as_ref(), &[Action::GetMaintenanceSchedule]).await {
            Ok(approvers) => approvers,
            Err(response) => return response,
        };
    match ctx
        .context
        .master
        .call(move |m| m.maintenance_schedule_filtered(&approvers))
        .await
    {
        Ok(schedule) => respond(&MasterResponse::GetMaintenanceSchedule { schedule }, accept),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

async fn get_maintenance_status(
    ctx: &ApiContext,
    principal: Option<Principal>,
    accept: ContentType,
) -> Response {
    let approvers =
        match approvers_for(ctx, principal.as_ref(), &[Action::GetMaintenanceStatus]).await {
            Ok(approvers) => approvers,
            Err(response) => return response,
        };
    // The responses live in the allocator and may be stale relative to
    // master state; the fold on the actor is defensive about that.
    let statuses = ctx.context.allocator.inverse_offer_statuses().await;
    match ctx
        .context
        .master
        .call(move |m| m.maintenance_status(&approvers, statuses))
        .await
    {
        Ok(status) => respond(&MasterResponse::GetMaintenanceStatus { status }, accept),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

pub(crate) async fn update_maintenance_schedule(
    ctx: &ApiContext,
    schedule: Schedule,
    principal: Option<Principal>,
) -> Response {
    let approvers =
        match approvers_for(ctx, principal.as_ref(), &[Action::UpdateMaintenanceSchedule]).await {
            Ok(approvers) => approvers,
            Err(response) => return response,
        };

    let checked = ctx
        .context
        .master
        .call({
            let schedule = schedule.clone();
            move |m| m.check_schedule_update(&schedule, &approvers)
        })
        .await;
    match checked {
        Ok(Ok(())) => {}
        Ok(Err(refusal)) => return maintenance_refusal(refusal),
        Err(err) => return Response::internal_error(err.to_string()),
    }

    if let Err(err) = ctx
        .context
        .registrar
        .apply(RegistryOperation::UpdateMaintenanceSchedule {
            schedule: schedule.clone(),
        })
        .await
    {
        registry_failure("update_maintenance_schedule", &err);
    }

    match ctx
        .context
        .master
        .call(move |m| m.apply_schedule_update(schedule))
        .await
    {
        Ok(()) => Response::ok(),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

pub(crate) async fn start_maintenance(
    ctx: &ApiContext,
    machines: Vec<MachineId>,
    principal: Option<Principal>,
) -> Response {
    let approvers = match approvers_for(ctx, principal.as_ref(), &[Action::StartMaintenance]).await
    {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };

    let checked = ctx
        .context
        .master
        .call({
            let machines = machines.clone();
            move |m| m.check_start_maintenance(&machines, &approvers)
        })
        .await;
    match checked {
        Ok(Ok(())) => {}
        Ok(Err(refusal)) => return maintenance_refusal(refusal),
        Err(err) => return Response::internal_error(err.to_string()),
    }

    if let Err(err) = ctx
        .context
        .registrar
        .apply(RegistryOperation::StartMaintenance {
            machines: machines.clone(),
        })
        .await
    {
        registry_failure("start_maintenance", &err);
    }

    match ctx
        .context
        .master
        .call(move |m| m.complete_start_maintenance(&machines))
        .await
    {
        Ok(()) => Response::ok(),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

pub(crate) async fn stop_maintenance(
    ctx: &ApiContext,
    machines: Vec<MachineId>,
    principal: Option<Principal>,
) -> Response {
    let approvers = match approvers_for(ctx, principal.as_ref(), &[Action::StopMaintenance]).await {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };

    let checked = ctx
        .context
        .master
        .call({
            let machines = machines.clone();
            move |m| m.check_stop_maintenance(&machines, &approvers)
        })
        .await;
    match checked {
        Ok(Ok(())) => {}
        Ok(Err(refusal)) => return maintenance_refusal(refusal),
        Err(err) => return Response::internal_error(err.to_string()),
    }

    if let Err(err) = ctx
        .context
        .registrar
        .apply(RegistryOperation::StopMaintenance {
            machines: machines.clone(),
        })
        .await
    {
        registry_failure("stop_maintenance", &err);
    }

    match ctx
        .context
        .master
        .call(move |m| m.complete_stop_maintenance(&machines))
        .await
    {
        Ok(()) => Response::ok(),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

fn maintenance_refusal(refusal: crate::master::MaintenanceRefusal) -> Response {
    match refusal {
        crate::master::MaintenanceRefusal::BadRequest(message) => Response::bad_request(message),
        crate::master::MaintenanceRefusal::Forbidden => Response::empty(403),
    }
}

pub(crate) async fn teardown(
    ctx: &ApiContext,
    framework_id: FrameworkId,
    principal: Option<Principal>,
) -> Response {
    let lookup_id = framework_id.clone();
    let info = match ctx
        .context
        .master
        .call(move |m| m.framework(&lookup_id).map(|f| f.info.clone()))
        .await
    {
        Ok(Some(info)) => info,
        Ok(None) => return Response::bad_request("No framework found with specified ID"),
        Err(err) => return Response::internal_error(err.to_string()),
    };

    let approvers = match approvers_for(ctx, principal.as_ref(), &[Action::TeardownFramework]).await
    {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };
    let object = AuthObject {
        value: info.principal.clone(),
        framework_info: Some(info),
        ..AuthObject::default()
    };
    if !approvers.approved(Action::TeardownFramework, &object) {
        return Response::empty(403);
    }

    match ctx
        .context
        .master
        .call(move |m| m.remove_framework(&framework_id))
        .await
    {
        Ok(()) => Response::ok(),
        Err(err) => Response::internal_error(err.to_string()),
    }
}

async fn mark_agent_gone(
    ctx: &ApiContext,
    agent_id: AgentId,
    principal: Option<Principal>,
) -> Response {
    let approvers = match approvers_for(ctx, principal.as_ref(), &[Action::MarkAgentGone]).await {
        Ok(approvers) => approvers,
        Err(response) => return response,
    };
    if !approvers.approved(Action::MarkAgentGone, &AuthObject::any()) {
        return Response::empty(403);
    }

    let begin_agent = agent_id.clone();
    let precondition = match ctx
        .context
        .master
        .call(move |m| m.begin_mark_agent_gone(&begin_agent))
        .await
    {
        Ok(precondition) => precondition,
        Err(err) => return Response::internal_error(err.to_string()),
    };

    let gone_time_ms = match precondition {
        GonePrecondition::AlreadyGone => return Response::ok(),
        GonePrecondition::TransitionInFlight(message) => {
            return Response::service_unavailable(message);
        }
        GonePrecondition::NotFound => {
            return Response::not_found(format!("Agent '{agent_id}' not found"));
        }
        GonePrecondition::Proceed { gone_time_ms } => gone_time_ms,
    };

    match ctx
        .context
        .registrar
        .apply(RegistryOperation::MarkAgentGone {
            agent_id: agent_id.clone(),
            gone_time_ms,
        })
        .await
    {
        Ok(_) => {
            let complete_agent = agent_id.clone();
            match ctx
                .context
                .master
                .call(move |m| m.complete_mark_agent_gone(&complete_agent, gone_time_ms))
                .await
            {
                Ok(()) => Response::ok(),
                Err(err) => Response::internal_error(err.to_string()),
            }
        }
        Err(RegistryError::Discarded) => {
            let abandon_agent = agent_id.clone();
            let _ = ctx
                .context
                .master
                .call(move |m| m.abandon_mark_agent_gone(&abandon_agent))
                .await;
            Response::service_unavailable(format!(
                "Transition of agent '{agent_id}' to gone was discarded"
            ))
        }
        Err(err @ RegistryError::Failed(_)) => registry_failure("mark_agent_gone", &err),
    }
}
