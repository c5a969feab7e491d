//! Machine maintenance primitives: identifiers, modes, unavailability
//! windows, and the validation rules for schedule updates and mode
//! transitions.

use crate::wire::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaintenanceError {
    #[error("machine must carry a hostname or an IP")]
    IncompleteMachine,
    #[error("machine `{0}` appears more than once")]
    DuplicateMachine(MachineId),
    #[error("machine `{0}` is DOWN and cannot be drained by a schedule update")]
    DownMachineInSchedule(MachineId),
    #[error("machine `{0}` is not part of a maintenance schedule")]
    UnknownMachine(MachineId),
    #[error("machine `{0}` is not in DRAINING mode and cannot be brought down")]
    NotDraining(MachineId),
    #[error("machine `{0}` is not in DOWN mode and cannot be brought up")]
    NotDown(MachineId),
}

/// Identity of a node in the maintenance graph. At least one of the
/// fields must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

impl MachineId {
    pub fn hostname(hostname: impl Into<String>) -> MachineId {
        MachineId {
            hostname: Some(hostname.into()),
            ip: None,
        }
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.hostname, &self.ip) {
            (Some(hostname), Some(ip)) => write!(f, "{hostname} ({ip})"),
            (Some(hostname), None) => f.write_str(hostname),
            (None, Some(ip)) => f.write_str(ip),
            (None, None) => f.write_str("<unknown>"),
        }
    }
}

/// Maintenance mode of a machine. Machines never named by a schedule
/// are implicitly unknown and treated as `Up`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineMode {
    #[default]
    Up,
    Draining,
    Down,
}

/// A planned window in which machines will become unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unavailability {
    pub start_nanos: i64,
    #[serde(default)]
    pub duration_nanos: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub machine_ids: Vec<MachineId>,
    pub unavailability: Unavailability,
}

/// The cluster-wide maintenance plan, replaced wholesale by schedule
/// updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub windows: Vec<Window>,
}

impl Schedule {
    /// Machines named anywhere in the schedule, with their window's
    /// unavailability.
    pub fn unavailabilities(&self) -> HashMap<MachineId, Unavailability> {
        let mut result = HashMap::new();
        for window in &self.windows {
            for id in &window.machine_ids {
                result.insert(id.clone(), window.unavailability);
            }
        }
        result
    }
}

/// Per-machine master state.
#[derive(Debug, Clone, Default)]
pub struct Machine {
    pub mode: MachineMode,
    pub unavailability: Option<Unavailability>,
    pub agents: HashSet<AgentId>,
}

/// Validates a machine list: complete identities, no duplicates.
pub fn validate_machines(machines: &[MachineId]) -> Result<(), MaintenanceError> {
    let mut seen = HashSet::new();
    for id in machines {
        let hostname_missing = id.hostname.as_deref().map_or(true, str::is_empty);
        let ip_missing = id.ip.as_deref().map_or(true, str::is_empty);
        if hostname_missing && ip_missing {
            return Err(MaintenanceError::IncompleteMachine);
        }
        if !seen.insert(id.clone()) {
            return Err(MaintenanceError::DuplicateMachine(id.clone()));
        }
    }
    Ok(())
}

/// Validates a replacement schedule against current machine modes: every
/// machine is named at most once, identities are complete, and no DOWN
/// machine is pulled back into DRAINING by the edit.
pub fn validate_schedule(
    schedule: &Schedule,
    machines: &HashMap<MachineId, Machine>,
) -> Result<(), MaintenanceError> {
    let mut seen = HashSet::new();
    for window in &schedule.windows {
        validate_machines(&window.machine_ids)?;
        for id in &window.machine_ids {
            if !seen.insert(id.clone()) {
                return Err(MaintenanceError::DuplicateMachine(id.clone()));
            }
            if let Some(machine) = machines.get(id) {
                if machine.mode == MachineMode::Down {
                    return Err(MaintenanceError::DownMachineInSchedule(id.clone()));
                }
            }
        }
    }
    Ok(())
}
