//! The scheduler API endpoint. SUBSCRIBE opens the framed event stream
//! and mints the stream identity; every other call must pass the
//! framework/principal/stream-id gauntlet and is answered 202 once
//! handed to the master.

use super::http::{HttpRequest, Response};
use super::media::accepts_media_type;
use super::server::{check_principal, leader_gate, ApiContext};
use super::STREAM_ID_HEADER;
use crate::auth::Principal;
use crate::master::{HttpConnection, Master};
use crate::pipe::pipe;
use crate::validation::validate_scheduler_call;
use crate::wire::{
    self, ContentType, SchedulerCall, SchedulerCallKind, StreamId, APPLICATION_JSON,
    APPLICATION_PROTOBUF,
};
use log::{info, warn};

pub(crate) async fn scheduler(
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

    let content = match request.header("Content-Type") {
        None => return Response::bad_request("Expecting 'Content-Type' to be present"),
        Some(value) => match ContentType::from_media_type(value) {
            Some(content) if !content.is_streaming() => content,
            _ => {
                return Response::unsupported_media_type(format!(
                    "Expecting 'Content-Type' of {APPLICATION_JSON} or {APPLICATION_PROTOBUF}"
                ));
            }
        },
    };

    let mut call: SchedulerCall = match wire::deserialize(content, &request.body) {
        Ok(call) => call,
        Err(err) => {
            return Response::bad_request(format!("Failed to parse body into a call: {err}"));
        }
    };

    if let Err(err) = validate_scheduler_call(&call, principal.as_ref()) {
        return Response::bad_request(format!("Failed to validate scheduler call: {err}"));
    }

    // The accept type only matters for the calls that answer with a
    // body; for the rest the response is an empty 202.
    let needs_accept = matches!(
        call.kind,
        SchedulerCallKind::Subscribe(_) | SchedulerCallKind::ReconcileOperations(_)
    );
    let accept_header = request.header("Accept");
    let accept = if accepts_media_type(accept_header, APPLICATION_JSON) {
        ContentType::Json
    } else if accepts_media_type(accept_header, APPLICATION_PROTOBUF) {
        ContentType::Protobuf
    } else if needs_accept {
        return Response::not_acceptable(format!(
            "Expecting 'Accept' to allow '{APPLICATION_PROTOBUF}' or '{APPLICATION_JSON}'"
        ));
    } else {
        ContentType::Json
    };

    if let SchedulerCallKind::Subscribe(subscribe) = &mut call.kind {
        if request.header(STREAM_ID_HEADER).is_some() {
            return Response::bad_request(format!(
                "Subscribe calls should not include the '{STREAM_ID_HEADER}' header"
            ));
        }

        // An authenticated framework may omit its principal; adopt the
        // authenticated one so authorization sees it. Validation has
        // already rejected the case where both are set and differ.
        if let Some(value) = principal.as_ref().and_then(|p| p.value.clone()) {
            if subscribe.framework_info.principal.is_none() {
                warn!(
                    "event=framework_principal_adopted principal={value} \
                     framework={}",
                    subscribe.framework_info.name
                );
                subscribe.framework_info.principal = Some(value);
            }
        }

        let subscribe = subscribe.clone();
        let (writer, reader) = pipe();
        let stream_id = StreamId::random();
        let connection = HttpConnection::new(writer, accept, stream_id);

        if let Err(err) = ctx
            .context
            .master
            .call(move |m| m.subscribe_framework(subscribe, connection))
            .await
        {
            return Response::internal_error(err.to_string());
        }

        return Response::Stream {
            status: 200,
            headers: vec![
                (
                    "Content-Type".to_string(),
                    accept.as_media_type().to_string(),
                ),
                (STREAM_ID_HEADER.to_string(), stream_id.to_string()),
            ],
            reader,
        };
    }

    let principal_value = principal.and_then(|p| p.value);
    let header_stream_id = request.header(STREAM_ID_HEADER).map(str::to_string);
    match ctx
        .context
        .master
        .call(move |m| handle_call(m, call, principal_value, header_stream_id, accept))
        .await
    {
        Ok(response) => response,
        Err(err) => Response::internal_error(err.to_string()),
    }
}

/// The non-subscribe gauntlet and dispatch, in one actor turn so calls
/// on a connection are processed in arrival order.
fn handle_call(
    master: &mut Master,
    call: SchedulerCall,
    principal: Option<String>,
    header_stream_id: Option<String>,
    accept: ContentType,
) -> Response {
    // Validation guarantees the id is present for non-subscribe calls.
    let Some(framework_id) = call.framework_id.clone() else {
        return Response::bad_request("Expecting 'framework_id' to be present");
    };

    {
        let Some(framework) = master.framework(&framework_id) else {
            return Response::bad_request("Framework cannot be found");
        };

        if let Some(principal) = &principal {
            if framework.info.principal.as_deref() != Some(principal.as_str()) {
                return Response::bad_request(format!(
                    "Authenticated principal '{principal}' does not match principal '{}' set in \
                     the framework description",
                    framework.info.principal.as_deref().unwrap_or("")
                ));
            }
        }

        if !framework.connected {
            return Response::forbidden("Framework is not subscribed");
        }
        let Some(stream_id) = framework.stream_id() else {
            return Response::forbidden("Framework is not connected via HTTP");
        };

        let Some(header_stream_id) = header_stream_id else {
            return Response::bad_request(format!(
                "All non-subscribe calls should include the '{STREAM_ID_HEADER}' header"
            ));
        };
        if header_stream_id != stream_id.to_string() {
            return Response::bad_request(format!(
                "The stream ID '{header_stream_id}' included in this request didn't match the \
                 stream ID currently associated with framework ID {framework_id}"
            ));
        }
    }

    match call.kind {
        SchedulerCallKind::Subscribe(_) => {
            // Handled before reaching the actor.
            Response::internal_error("unexpected SUBSCRIBE call")
        }
        SchedulerCallKind::Teardown => {
            master.remove_framework(&framework_id);
            Response::accepted()
        }
        SchedulerCallKind::Accept(accept_call) => {
            master.accept_offers(&framework_id, accept_call);
            Response::accepted()
        }
        SchedulerCallKind::Decline(decline) => {
            master.decline_offers(&framework_id, decline);
            Response::accepted()
        }
        SchedulerCallKind::AcceptInverseOffers(call) => {
            master.settle_inverse_offers(&framework_id, call, true);
            Response::accepted()
        }
        SchedulerCallKind::DeclineInverseOffers(call) => {
            master.settle_inverse_offers(&framework_id, call, false);
            Response::accepted()
        }
        SchedulerCallKind::Revive => {
            master.revive(&framework_id);
            Response::accepted()
        }
        SchedulerCallKind::Suppress => {
            master.suppress(&framework_id);
            Response::accepted()
        }
        SchedulerCallKind::Kill(kill) => {
            master.kill_task(&framework_id, kill);
            Response::accepted()
        }
        SchedulerCallKind::Shutdown(shutdown) => {
            master.shutdown_executor(&framework_id, shutdown);
            Response::accepted()
        }
        SchedulerCallKind::Acknowledge(acknowledge) => {
            master.acknowledge(&framework_id, acknowledge);
            Response::accepted()
        }
        SchedulerCallKind::AcknowledgeOperationStatus(acknowledge) => {
            master.acknowledge_operation_status(&framework_id, acknowledge);
            Response::accepted()
        }
        SchedulerCallKind::Reconcile(reconcile) => {
            master.reconcile(&framework_id, reconcile);
            Response::accepted()
        }
        SchedulerCallKind::ReconcileOperations(reconcile) => {
            let body = master.reconcile_operations(&framework_id, reconcile);
            match wire::serialize(accept, &body) {
                Ok(bytes) => Response::ok_with(accept.as_media_type(), bytes),
                Err(err) => Response::internal_error(err.to_string()),
            }
        }
        SchedulerCallKind::Message(message) => {
            master.framework_message(&framework_id, message);
            Response::accepted()
        }
        SchedulerCallKind::Request(request) => {
            info!(
                "event=resource_request framework={framework_id} entries={}",
                request.resources.len()
            );
            Response::accepted()
        }
        SchedulerCallKind::Unknown => {
            warn!("event=unknown_scheduler_call framework={framework_id}");
            Response::not_implemented()
        }
    }
}
