//! In-memory collaborator implementations for tests and examples: a
//! permissive/denying authorizer pair, a recording allocator, a
//! scriptable registrar, and a map-backed files subsystem.

use crate::allocator::{Allocator, InverseOfferStatus};
use crate::auth::{Action, AuthObject, Authorizer, AuthorizerError, ObjectApprover, Principal};
use crate::files::{Files, FilesError};
use crate::maintenance::Unavailability;
use crate::master::AgentTransport;
use crate::registry::{Registrar, RegistryError, RegistryOperation};
use crate::resources::Resources;
use crate::wire::{AgentId, ExecutorId, FileInfo, Filters, FrameworkId, OfferOperation, TaskId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Approves every request.
pub struct PermissiveAuthorizer;

/// Denies every request.
pub struct DenyingAuthorizer;

struct ConstApprover(bool);

impl ObjectApprover for ConstApprover {
    fn approved(&self, _object: &AuthObject) -> bool {
        self.0
    }
}

#[async_trait]
impl Authorizer for PermissiveAuthorizer {
    async fn get_approver(
        &self,
        _principal: Option<&Principal>,
        _action: Action,
    ) -> Result<Arc<dyn ObjectApprover>, AuthorizerError> {
        Ok(Arc::new(ConstApprover(true)))
    }
}

#[async_trait]
impl Authorizer for DenyingAuthorizer {
    async fn get_approver(
        &self,
        _principal: Option<&Principal>,
        _action: Action,
    ) -> Result<Arc<dyn ObjectApprover>, AuthorizerError> {
        Ok(Arc::new(ConstApprover(false)))
    }
}

/// Allocator that ignores everything and reports no inverse-offer
/// responses.
pub struct NullAllocator;

#[async_trait]
impl Allocator for NullAllocator {
    fn recover_resources(
        &self,
        _framework_id: &FrameworkId,
        _agent_id: &AgentId,
        _resources: &Resources,
        _filters: &Filters,
    ) {
    }

    fn update_unavailability(&self, _agent_id: &AgentId, _unavailability: Option<Unavailability>) {}

    fn revive_offers(&self, _framework_id: &FrameworkId, _roles: &[String]) {}

    fn suppress_offers(&self, _framework_id: &FrameworkId, _roles: &[String]) {}

    async fn inverse_offer_statuses(
        &self,
    ) -> HashMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>> {
        HashMap::new()
    }
}

/// Allocator that records recoveries and serves a scripted set of
/// inverse-offer responses.
#[derive(Default)]
pub struct RecordingAllocator {
    pub recovered: Mutex<Vec<(FrameworkId, AgentId, Resources, f64)>>,
    pub statuses: Mutex<HashMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>>>,
}

#[async_trait]
impl Allocator for RecordingAllocator {
    fn recover_resources(
        &self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &Resources,
        filters: &Filters,
    ) {
        self.recovered.lock().push((
            framework_id.clone(),
            agent_id.clone(),
            resources.clone(),
            filters.refuse_seconds(),
        ));
    }

    fn update_unavailability(&self, _agent_id: &AgentId, _unavailability: Option<Unavailability>) {}

    fn revive_offers(&self, _framework_id: &FrameworkId, _roles: &[String]) {}

    fn suppress_offers(&self, _framework_id: &FrameworkId, _roles: &[String]) {}

    async fn inverse_offer_statuses(
        &self,
    ) -> HashMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>> {
        self.statuses.lock().clone()
    }
}

/// Agent transport that accepts every operation and drops every
/// message.
pub struct NullAgentTransport;

#[async_trait]
impl AgentTransport for NullAgentTransport {
    async fn apply(&self, _agent_id: &AgentId, _operation: &OfferOperation) -> Result<(), String> {
        Ok(())
    }

    fn shutdown_agent(&self, _agent_id: &AgentId, _message: &str) {}

    fn kill_task(&self, _agent_id: &AgentId, _task_id: &TaskId) {}

    fn shutdown_executor(&self, _agent_id: &AgentId, _executor_id: &ExecutorId) {}

    fn framework_message(&self, _agent_id: &AgentId, _executor_id: &ExecutorId, _data: &[u8]) {}
}

/// Agent transport that rejects every operation with a fixed reason.
pub struct RejectingAgentTransport(pub String);

#[async_trait]
impl AgentTransport for RejectingAgentTransport {
    async fn apply(&self, _agent_id: &AgentId, _operation: &OfferOperation) -> Result<(), String> {
        Err(self.0.clone())
    }

    fn shutdown_agent(&self, _agent_id: &AgentId, _message: &str) {}

    fn kill_task(&self, _agent_id: &AgentId, _task_id: &TaskId) {}

    fn shutdown_executor(&self, _agent_id: &AgentId, _executor_id: &ExecutorId) {}

    fn framework_message(&self, _agent_id: &AgentId, _executor_id: &ExecutorId, _data: &[u8]) {}
}

/// Registrar recording applied operations; flip `fail` to simulate a
/// log write failure, `discard` to simulate a dropped operation.
#[derive(Default)]
pub struct InMemoryRegistrar {
    pub applied: Mutex<Vec<RegistryOperation>>,
    pub fail: AtomicBool,
    pub discard: AtomicBool,
}

#[async_trait]
impl Registrar for InMemoryRegistrar {
    async fn apply(&self, operation: RegistryOperation) -> Result<bool, RegistryError> {
        if self.discard.load(Ordering::Acquire) {
            return Err(RegistryError::Discarded);
        }
        if self.fail.load(Ordering::Acquire) {
            return Err(RegistryError::Failed("simulated log failure".to_string()));
        }
        self.applied.lock().push(operation);
        Ok(true)
    }
}

/// Map-backed files subsystem.
#[derive(Default)]
pub struct InMemoryFiles {
    pub entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryFiles {
    pub fn with_file(path: impl Into<String>, data: impl Into<Vec<u8>>) -> InMemoryFiles {
        let files = InMemoryFiles::default();
        files.entries.lock().insert(path.into(), data.into());
        files
    }
}

#[async_trait]
impl Files for InMemoryFiles {
    async fn browse(
        &self,
        path: &str,
        _principal: Option<&Principal>,
    ) -> Result<Vec<FileInfo>, FilesError> {
        let entries = self.entries.lock();
        let mut found: Vec<FileInfo> = entries
            .iter()
            .filter(|(name, _)| name.starts_with(path))
            .map(|(name, data)| FileInfo {
                path: name.clone(),
                size: data.len() as u64,
            })
            .collect();
        if found.is_empty() {
            return Err(FilesError::NotFound(format!("'{path}' not found")));
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    async fn read(
        &self,
        offset: u64,
        length: Option<u64>,
        path: &str,
        _principal: Option<&Principal>,
    ) -> Result<(u64, Vec<u8>), FilesError> {
        let entries = self.entries.lock();
        let data = entries
            .get(path)
            .ok_or_else(|| FilesError::NotFound(format!("'{path}' not found")))?;
        let size = data.len() as u64;
        if offset > size {
            return Err(FilesError::Invalid(format!(
                "offset {offset} is past the end of '{path}'"
            )));
        }
        let start = offset as usize;
        let end = length
            .map(|l| (offset + l).min(size) as usize)
            .unwrap_or(data.len());
        Ok((size, data[start..end].to_vec()))
    }
}
