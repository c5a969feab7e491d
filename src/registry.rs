//! Interface to the registrar: the replicated, linearizable log of
//! cluster membership and maintenance state.
//!
//! The master never proceeds past a failed commit. A `Failed` result is
//! fatal by design (the process aborts rather than diverge from the
//! log); `Discarded` means the operation was dropped before reaching
//! the log and no local state may change.

use crate::maintenance::{MachineId, Schedule};
use crate::wire::AgentId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry operation failed: {0}")]
    Failed(String),
    #[error("registry operation was discarded")]
    Discarded,
}

/// A state transition to be committed to the replicated log before the
/// master applies it locally.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryOperation {
    AdmitAgent {
        agent_id: AgentId,
    },
    RemoveAgent {
        agent_id: AgentId,
    },
    MarkAgentGone {
        agent_id: AgentId,
        gone_time_ms: u64,
    },
    UpdateMaintenanceSchedule {
        schedule: Schedule,
    },
    StartMaintenance {
        machines: Vec<MachineId>,
    },
    StopMaintenance {
        machines: Vec<MachineId>,
    },
}

/// Serialized, ordered commits against the cluster registry. `Ok(true)`
/// means the operation mutated the registry; `Ok(false)` means it was a
/// no-op (already applied).
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn apply(&self, operation: RegistryOperation) -> Result<bool, RegistryError>;
}
