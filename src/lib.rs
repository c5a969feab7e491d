//! Core library for the Drover cluster resource manager master.
//! Exposes the leader-only HTTP request plane, the maintenance state
//! machine, and the supporting value types they are built on.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod allocator;
pub mod auth;
pub mod files;
pub mod maintenance;
pub mod master;
pub mod net;
pub mod pipe;
pub mod queue;
pub mod recordio;
pub mod registry;
pub mod resources;
pub mod testing;
pub mod uri;
pub mod validation;
pub mod wire;

pub use allocator::{Allocator, InverseOfferStatus};
pub use auth::{Action, Authorizer, AuthorizerError, ObjectApprovers, Principal};
pub use files::{Files, FilesError};
pub use maintenance::{Machine, MachineId, MachineMode, Schedule, Unavailability, Window};
pub use master::{
    Master, MasterConfig, MasterHandle, DEFAULT_HEARTBEAT_INTERVAL, MAX_BATCH_WORKERS,
};
pub use net::{HttpServer, HttpServerConfig, HttpServerHandle, MasterContext, NetError};
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use queue::Queue;
pub use recordio::{encode_record, RecordIoError, RecordReader};
pub use registry::{Registrar, RegistryError, RegistryOperation};
pub use resources::{Resource, ResourceError, Resources};
pub use uri::{Uri, UriError};
pub use wire::{
    AgentId, ContentType, FrameworkId, MasterCall, MasterEvent, MasterInfo, MasterResponse,
    OfferId, OperationId, SchedulerCall, SchedulerEvent, StreamId, TaskId,
};
