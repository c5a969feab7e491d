//! The master's HTTP request plane.
//!
//! One plaintext listener serves the operator API, the scheduler API,
//! the legacy form endpoints, and the health/redirect helpers. Every
//! leader-only endpoint goes through the same gate: redirect to the
//! leader when this instance is not elected, refuse service until
//! recovery completes.

mod api;
mod http;
mod legacy;
mod media;
mod scheduler;
mod server;

pub use http::{HttpRequest, Response};
pub use media::RequestMediaTypes;
pub use server::{HttpServer, HttpServerConfig, HttpServerHandle, MasterContext};

use crate::auth::Principal;
use thiserror::Error;

/// Request header carrying the subscription identity.
pub const STREAM_ID_HEADER: &str = "Mesos-Stream-Id";
/// Secondary content negotiation headers, meaningful only for framed
/// streams.
pub const MESSAGE_CONTENT_TYPE_HEADER: &str = "Message-Content-Type";
pub const MESSAGE_ACCEPT_HEADER: &str = "Message-Accept";

/// Errors emitted by the networking helpers.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
    #[error("master actor has terminated")]
    ActorGone(#[from] crate::master::ActorGone),
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed before headers were complete")]
    ConnectionClosedBeforeHeaders,
    #[error("connection closed before the body was complete")]
    ConnectionClosedBeforeBody,
    #[error("request headers exceed the maximum size")]
    HeadersTooLarge,
    #[error("request body exceeds the maximum size")]
    BodyTooLarge,
    #[error("malformed request: {0}")]
    RequestParse(httparse::Error),
    #[error("request line is missing a method")]
    MissingMethod,
    #[error("request line is missing a path")]
    MissingPath,
    #[error("header `{name}` is not valid UTF-8")]
    InvalidHeaderValue { name: String },
    #[error("invalid Content-Length value")]
    InvalidContentLengthValue,
}

/// Maps a request to its authenticated principal. Authentication
/// itself is outside this plane; deployments plug their scheme in
/// here.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &HttpRequest) -> Option<Principal>;
}

/// Treats every request as unauthenticated.
pub struct NullAuthenticator;

impl Authenticator for NullAuthenticator {
    fn authenticate(&self, _request: &HttpRequest) -> Option<Principal> {
        None
    }
}

/// A registry commit failed after validation: the master is not
/// allowed to diverge from the log, so the process ends here.
pub(crate) fn registry_failure(context: &str, error: &crate::registry::RegistryError) -> ! {
    log::error!("event=registry_commit_failed context={context} error={error}");
    std::process::abort();
}
