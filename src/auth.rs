//! Authorization interface: the capability oracle the request plane
//! consults, and cached per-principal approval snapshots.

use crate::maintenance::MachineId;
use crate::wire::FrameworkInfo;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthorizerError {
    #[error("authorizer unavailable: {0}")]
    Unavailable(String),
}

/// The authenticated identity behind an HTTP request. A principal may
/// carry claims without a value string; the request plane rejects those
/// before doing any work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub value: Option<String>,
    pub claims: BTreeMap<String, String>,
}

impl Principal {
    pub fn from_value(value: impl Into<String>) -> Principal {
        Principal {
            value: Some(value.into()),
            claims: BTreeMap::new(),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => f.write_str(value),
            None => f.write_str("<claims-only>"),
        }
    }
}

/// Actions the master asks the authorizer about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ViewFramework,
    ViewTask,
    ViewExecutor,
    ViewRole,
    ViewFlags,
    GetMaintenanceSchedule,
    GetMaintenanceStatus,
    UpdateMaintenanceSchedule,
    StartMaintenance,
    StopMaintenance,
    MarkAgentGone,
    ReserveResources,
    UnreserveResources,
    CreateVolume,
    DestroyVolume,
    ResizeVolume,
    TeardownFramework,
    SetLogLevel,
}

/// The object an action applies to. Absent fields mean "any".
#[derive(Debug, Clone, Default)]
pub struct AuthObject {
    pub value: Option<String>,
    pub role: Option<String>,
    pub machine_id: Option<MachineId>,
    pub framework_info: Option<FrameworkInfo>,
}

impl AuthObject {
    pub fn any() -> AuthObject {
        AuthObject::default()
    }

    pub fn machine(machine_id: MachineId) -> AuthObject {
        AuthObject {
            machine_id: Some(machine_id),
            ..AuthObject::default()
        }
    }

    pub fn role(role: impl Into<String>) -> AuthObject {
        AuthObject {
            role: Some(role.into()),
            ..AuthObject::default()
        }
    }
}

/// A decision procedure for one (principal, action) pair, valid as a
/// snapshot: decisions may be cached and consulted repeatedly without
/// further authorizer round-trips.
pub trait ObjectApprover: Send + Sync {
    fn approved(&self, object: &AuthObject) -> bool;
}

/// The external capability oracle. Implementations must tolerate
/// concurrent calls; the master never serializes access to it.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn get_approver(
        &self,
        principal: Option<&Principal>,
        action: Action,
    ) -> Result<Arc<dyn ObjectApprover>, AuthorizerError>;
}

/// A cached snapshot of authorization decisions for one principal
/// across a fixed set of actions.
pub struct ObjectApprovers {
    approvers: HashMap<Action, Arc<dyn ObjectApprover>>,
}

impl ObjectApprovers {
    pub async fn create(
        authorizer: &dyn Authorizer,
        principal: Option<&Principal>,
        actions: &[Action],
    ) -> Result<Arc<ObjectApprovers>, AuthorizerError> {
        let mut approvers = HashMap::with_capacity(actions.len());
        for &action in actions {
            approvers.insert(action, authorizer.get_approver(principal, action).await?);
        }
        Ok(Arc::new(ObjectApprovers { approvers }))
    }

    /// Approval for `object`; actions that were not requested at
    /// creation time are denied.
    pub fn approved(&self, action: Action, object: &AuthObject) -> bool {
        self.approvers
            .get(&action)
            .map(|approver| approver.approved(object))
            .unwrap_or(false)
    }
}
