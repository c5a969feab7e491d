//! The request-plane listener: accepts plaintext connections, parses
//! one request per connection, routes it, and writes the response
//! (draining subscriber pipes for streaming responses).

use super::api;
use super::http::{read_request, write_response, HttpRequest, Response};
use super::legacy;
use super::scheduler;
use super::{Authenticator, NetError};
use crate::allocator::Allocator;
use crate::auth::{Authorizer, Principal};
use crate::files::Files;
use crate::master::{AgentTransport, MasterHandle};
use crate::registry::Registrar;
use crate::wire::MasterInfo;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

const DEFAULT_MAX_CONNECTIONS: usize = 64;

pub struct HttpServerConfig {
    pub bind: SocketAddr,
    pub max_connections: usize,
}

impl HttpServerConfig {
    pub fn new(bind: SocketAddr) -> HttpServerConfig {
        HttpServerConfig {
            bind,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// The collaborators the request plane drives. The master handle is
/// the only way handlers touch cluster state; everything else is
/// awaited off the actor.
#[derive(Clone)]
pub struct MasterContext {
    pub master: MasterHandle,
    pub authorizer: Arc<dyn Authorizer>,
    pub registrar: Arc<dyn Registrar>,
    pub allocator: Arc<dyn Allocator>,
    pub transport: Arc<dyn AgentTransport>,
    pub files: Arc<dyn Files>,
    pub authenticator: Arc<dyn Authenticator>,
}

pub(crate) struct ApiContext {
    pub(crate) context: MasterContext,
    pub(crate) self_info: MasterInfo,
}

/// Leader and recovery state sampled at the top of a request.
pub(crate) struct GateSnapshot {
    pub(crate) elected: bool,
    pub(crate) recovered: bool,
    pub(crate) leader: Option<MasterInfo>,
}

pub struct HttpServer;

pub struct HttpServerHandle {
    local_addr: SocketAddr,
    accept_loop: tokio::task::JoinHandle<()>,
}

impl HttpServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.accept_loop.abort();
    }
}

impl Drop for HttpServerHandle {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

impl HttpServer {
    pub async fn spawn(
        config: HttpServerConfig,
        context: MasterContext,
    ) -> Result<HttpServerHandle, NetError> {
        let listener = TcpListener::bind(config.bind).await?;
        let local_addr = listener.local_addr()?;
        info!("event=http_server_listening addr={local_addr}");

        let self_info = context.master.call(|m| m.info().clone()).await?;
        let ctx = Arc::new(ApiContext { context, self_info });
        let limiter = Arc::new(Semaphore::new(config.max_connections));

        let accept_loop = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("event=http_accept_error error={err}");
                        continue;
                    }
                };
                let Ok(permit) = limiter.clone().try_acquire_owned() else {
                    warn!("event=http_connection_rejected addr={peer} reason=too_many_connections");
                    continue;
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = handle_connection(stream, ctx).await {
                        warn!("event=http_connection_error addr={peer} error={err}");
                    }
                });
            }
        });

        Ok(HttpServerHandle {
            local_addr,
            accept_loop,
        })
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    ctx: Arc<ApiContext>,
) -> Result<(), NetError> {
    let request = read_request(&mut stream).await?;
    let response = route(&ctx, request).await;
    write_response(&mut stream, response).await
}

async fn route(ctx: &ApiContext, request: HttpRequest) -> Response {
    let principal = ctx.context.authenticator.authenticate(&request);

    // Paths may carry the master's id as their first segment; routing
    // ignores it, redirect loop prevention does not.
    let routed_path = request
        .path
        .strip_prefix(&format!("/{}", ctx.self_info.id))
        .filter(|rest| rest.starts_with('/'))
        .unwrap_or(&request.path)
        .to_string();

    match routed_path.as_str() {
        "/health" => Response::ok(),
        "/redirect" => redirect_endpoint(ctx, &request).await,
        "/api/v1" => api::api(ctx, &request, principal).await,
        "/api/v1/scheduler" => scheduler::scheduler(ctx, &request, principal).await,
        "/master/maintenance/schedule" => {
            legacy::maintenance_schedule(ctx, &request, principal).await
        }
        "/master/maintenance/status" => legacy::maintenance_status(ctx, &request, principal).await,
        "/master/machine/down" => legacy::machine_down(ctx, &request, principal).await,
        "/master/machine/up" => legacy::machine_up(ctx, &request, principal).await,
        "/reserve" => legacy::reserve(ctx, &request, principal).await,
        "/unreserve" => legacy::unreserve(ctx, &request, principal).await,
        "/create-volumes" => legacy::create_volumes(ctx, &request, principal).await,
        "/destroy-volumes" => legacy::destroy_volumes(ctx, &request, principal).await,
        "/teardown" => legacy::teardown(ctx, &request, principal).await,
        "/state" | "/state-summary" | "/frameworks" | "/slaves" | "/tasks" | "/roles" => {
            legacy::read_only(ctx, &request, routed_path.as_str(), principal).await
        }
        _ => {
            // Unknown paths still honor redirect loop prevention for
            // suffixed redirect targets.
            if routed_path.starts_with("/redirect/") {
                match gate_snapshot(ctx).await {
                    Ok(gate) => redirect_response(ctx, &gate, &request),
                    Err(response) => response,
                }
            } else {
                Response::not_found(format!("no route for {} {}", request.method, request.path))
            }
        }
    }
}

/// The `/redirect` helper always points at the current leader's base
/// path, regardless of which instance serves it.
async fn redirect_endpoint(ctx: &ApiContext, request: &HttpRequest) -> Response {
    match gate_snapshot(ctx).await {
        Ok(gate) => redirect_response(ctx, &gate, request),
        Err(response) => response,
    }
}

pub(crate) async fn gate_snapshot(ctx: &ApiContext) -> Result<GateSnapshot, Response> {
    ctx.context
        .master
        .call(|master| GateSnapshot {
            elected: master.elected(),
            recovered: master.recovered(),
            leader: master.leader().cloned(),
        })
        .await
        .map_err(|err| Response::internal_error(err.to_string()))
}

/// Redirects a request to the leading master with a protocol-relative
/// `Location`, preventing loops for requests already on a redirect
/// path.
pub(crate) fn redirect_response(
    ctx: &ApiContext,
    gate: &GateSnapshot,
    request: &HttpRequest,
) -> Response {
    let Some(leader) = &gate.leader else {
        warn!(
            "event=redirect_failed path={} reason=no_leader_elected",
            request.path
        );
        return Response::service_unavailable("No leader elected");
    };

    let base_path = leader.base_path();
    let redirect_path = "/redirect";
    let master_redirect_path = format!("/{}/redirect", ctx.self_info.id);

    if request.path == redirect_path || request.path == master_redirect_path {
        // Redirecting the redirect endpoint itself would loop; point
        // at the leader's base url instead.
        return Response::temporary_redirect(base_path);
    }
    if request.path.starts_with(&format!("{redirect_path}/"))
        || request.path.starts_with(&format!("{master_redirect_path}/"))
    {
        return Response::not_found("");
    }

    info!(
        "event=redirecting path={} leader={}",
        request.path, base_path
    );
    Response::temporary_redirect(format!("{base_path}{}", request.target()))
}

/// Common gate for every leader-only endpoint: redirect when not the
/// leader, refuse service until recovery completes.
pub(crate) async fn leader_gate(ctx: &ApiContext, request: &HttpRequest) -> Result<(), Response> {
    let gate = gate_snapshot(ctx).await?;
    if !gate.elected {
        return Err(redirect_response(ctx, &gate, request));
    }
    if !gate.recovered {
        return Err(Response::service_unavailable(
            "Master has not finished recovery",
        ));
    }
    Ok(())
}

/// An authenticated principal must carry a value string; claims-only
/// principals are refused before any work happens.
pub(crate) fn check_principal(principal: Option<&Principal>) -> Result<(), Response> {
    if let Some(principal) = principal {
        if principal.value.is_none() {
            return Err(Response::forbidden(
                "The request's authenticated principal contains claims, but no value string. \
                 The master currently requires that principals have a value",
            ));
        }
    }
    Ok(())
}
