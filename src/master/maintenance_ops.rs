//! Actor-side maintenance logic: schedule ingest and diffing, the
//! DRAINING/DOWN/UP transitions, and the status fold over allocator
//! inverse-offer responses.
//!
//! Every transition is committed through the registrar before any of
//! the `complete_*` functions below touch local state.

use super::Master;
use crate::allocator::InverseOfferStatus;
use crate::auth::{Action, AuthObject, ObjectApprovers};
use crate::maintenance::{
    self, Machine, MachineId, MachineMode, Schedule, Unavailability,
};
use crate::wire::{AgentId, ClusterStatus, DrainingMachine, FrameworkId};
use log::info;
use std::collections::HashMap;

/// Why a maintenance request cannot proceed.
pub(crate) enum MaintenanceRefusal {
    BadRequest(String),
    Forbidden,
}

impl Master {
    /// The current schedule with unapproved machines filtered out.
    /// Windows left without machines are dropped from the view.
    pub(crate) fn maintenance_schedule_filtered(&self, approvers: &ObjectApprovers) -> Schedule {
        let mut filtered = Schedule::default();
        for window in &self.maintenance_schedule.windows {
            let machine_ids: Vec<MachineId> = window
                .machine_ids
                .iter()
                .filter(|id| {
                    approvers.approved(
                        Action::GetMaintenanceSchedule,
                        &AuthObject::machine((*id).clone()),
                    )
                })
                .cloned()
                .collect();
            if !machine_ids.is_empty() {
                filtered.windows.push(crate::maintenance::Window {
                    machine_ids,
                    unavailability: window.unavailability,
                });
            }
        }
        filtered
    }

    /// Validates a replacement schedule against current machine modes.
    pub(crate) fn check_schedule_update(
        &self,
        schedule: &Schedule,
        approvers: &ObjectApprovers,
    ) -> Result<(), MaintenanceRefusal> {
        maintenance::validate_schedule(schedule, &self.machines)
            .map_err(|err| MaintenanceRefusal::BadRequest(err.to_string()))?;
        for window in &schedule.windows {
            for id in &window.machine_ids {
                if !approvers.approved(
                    Action::UpdateMaintenanceSchedule,
                    &AuthObject::machine(id.clone()),
                ) {
                    return Err(MaintenanceRefusal::Forbidden);
                }
            }
        }
        Ok(())
    }

    /// Local commit of a schedule replacement. Only differences between
    /// the old and new schedule are applied: a machine entry carries
    /// more than the schedule does (its mode), so entries are updated
    /// in place rather than rebuilt.
    pub(crate) fn apply_schedule_update(&mut self, schedule: Schedule) {
        let unavailabilities = schedule.unavailabilities();

        // Machines dropped from the schedule transition DRAINING -> UP;
        // machines kept update their unavailability unless they are
        // about to be newly drained by the loop below. Each machine is
        // touched by exactly one of the two loops so a single inverse
        // offer results per machine.
        let existing: Vec<MachineId> = self.machines.keys().cloned().collect();
        for id in existing {
            match unavailabilities.get(&id) {
                Some(unavailability) => {
                    if self.machines[&id].mode == MachineMode::Up {
                        continue;
                    }
                    self.update_unavailability(&id, Some(*unavailability));
                }
                None => {
                    if let Some(machine) = self.machines.get_mut(&id) {
                        machine.mode = MachineMode::Up;
                    }
                    info!("event=machine_mode machine={id} mode=UP reason=schedule_removed");
                    self.update_unavailability(&id, None);
                    self.prune_machine(&id);
                }
            }
        }

        // New machines enter in DRAINING with their window's
        // unavailability.
        for window in &schedule.windows {
            for id in &window.machine_ids {
                if self
                    .machines
                    .get(id)
                    .map(|m| m.mode != MachineMode::Up)
                    .unwrap_or(false)
                {
                    continue;
                }
                let machine = self.machines.entry(id.clone()).or_insert_with(Machine::default);
                machine.mode = MachineMode::Draining;
                info!("event=machine_mode machine={id} mode=DRAINING");
                let unavailability = window.unavailability;
                self.update_unavailability(id, Some(unavailability));
            }
        }

        self.maintenance_schedule = schedule;
    }

    /// DRAINING -> DOWN preconditions: every named machine is known,
    /// draining, and approved.
    pub(crate) fn check_start_maintenance(
        &self,
        machines: &[MachineId],
        approvers: &ObjectApprovers,
    ) -> Result<(), MaintenanceRefusal> {
        maintenance::validate_machines(machines)
            .map_err(|err| MaintenanceRefusal::BadRequest(err.to_string()))?;
        for id in machines {
            let machine = self.machines.get(id).ok_or_else(|| {
                MaintenanceRefusal::BadRequest(format!(
                    "Machine '{id}' is not part of a maintenance schedule"
                ))
            })?;
            if machine.mode != MachineMode::Draining {
                return Err(MaintenanceRefusal::BadRequest(format!(
                    "Machine '{id}' is not in DRAINING mode and cannot be brought down"
                )));
            }
            if !approvers.approved(Action::StartMaintenance, &AuthObject::machine(id.clone())) {
                return Err(MaintenanceRefusal::Forbidden);
            }
        }
        Ok(())
    }

    /// Local commit of DOWN: shut down and forcibly remove every agent
    /// on the named machines, then flip the mode.
    ///
    /// The shutdown message may be dropped by the network, so removal
    /// never depends on it; forced removal emits LOST status updates to
    /// frameworks unconditionally.
    pub(crate) fn complete_start_maintenance(&mut self, machines: &[MachineId]) {
        for id in machines {
            let agents: Vec<AgentId> = self
                .machines
                .get(id)
                .map(|machine| machine.agents.iter().cloned().collect())
                .unwrap_or_default();
            for agent_id in agents {
                self.transport
                    .shutdown_agent(&agent_id, "Operator initiated 'Machine DOWN'");
                self.remove_agent(&agent_id, "Operator initiated 'Machine DOWN'");
            }
            if let Some(machine) = self.machines.get_mut(id) {
                machine.mode = MachineMode::Down;
            }
            info!("event=machine_mode machine={id} mode=DOWN");
        }
    }

    /// DOWN -> UP preconditions.
    pub(crate) fn check_stop_maintenance(
        &self,
        machines: &[MachineId],
        approvers: &ObjectApprovers,
    ) -> Result<(), MaintenanceRefusal> {
        maintenance::validate_machines(machines)
            .map_err(|err| MaintenanceRefusal::BadRequest(err.to_string()))?;
        for id in machines {
            let machine = self.machines.get(id).ok_or_else(|| {
                MaintenanceRefusal::BadRequest(format!(
                    "Machine '{id}' is not part of a maintenance schedule"
                ))
            })?;
            if machine.mode != MachineMode::Down {
                return Err(MaintenanceRefusal::BadRequest(format!(
                    "Machine '{id}' is not in DOWN mode and cannot be brought up"
                )));
            }
            if !approvers.approved(Action::StopMaintenance, &AuthObject::machine(id.clone())) {
                return Err(MaintenanceRefusal::Forbidden);
            }
        }
        Ok(())
    }

    /// Local commit of UP: reactivate the machines and delete them from
    /// the schedule, dropping windows (and machine entries) left empty.
    pub(crate) fn complete_stop_maintenance(&mut self, machines: &[MachineId]) {
        for id in machines {
            if let Some(machine) = self.machines.get_mut(id) {
                machine.mode = MachineMode::Up;
                machine.unavailability = None;
            }
            info!("event=machine_mode machine={id} mode=UP");
            self.update_unavailability(id, None);
        }

        for window in &mut self.maintenance_schedule.windows {
            window.machine_ids.retain(|id| !machines.contains(id));
        }
        self.maintenance_schedule
            .windows
            .retain(|window| !window.machine_ids.is_empty());

        for id in machines {
            self.prune_machine(id);
        }
    }

    /// GET_MAINTENANCE_STATUS fold: draining machines carry the
    /// inverse-offer responses the allocator has observed for their
    /// agents, down machines just their id, UP machines are omitted.
    pub(crate) fn maintenance_status(
        &self,
        approvers: &ObjectApprovers,
        statuses: HashMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>>,
    ) -> ClusterStatus {
        let mut status = ClusterStatus::default();
        for (id, machine) in &self.machines {
            if !approvers.approved(
                Action::GetMaintenanceStatus,
                &AuthObject::machine(id.clone()),
            ) {
                continue;
            }
            match machine.mode {
                MachineMode::Draining => {
                    let mut draining = DrainingMachine {
                        id: id.clone(),
                        statuses: Vec::new(),
                    };
                    for agent_id in &machine.agents {
                        if let Some(responses) = statuses.get(agent_id) {
                            draining.statuses.extend(responses.values().cloned());
                        }
                    }
                    status.draining_machines.push(draining);
                }
                MachineMode::Down => {
                    status.down_machines.push(id.clone());
                }
                MachineMode::Up => {}
            }
        }
        status
    }

    /// Records a machine's planned unavailability and lets the
    /// allocator react for every agent on the machine.
    fn update_unavailability(
        &mut self,
        machine_id: &MachineId,
        unavailability: Option<Unavailability>,
    ) {
        let Some(machine) = self.machines.get_mut(machine_id) else {
            return;
        };
        machine.unavailability = unavailability;
        for agent_id in machine.agents.clone() {
            self.allocator
                .update_unavailability(&agent_id, unavailability);
        }
    }

    /// Machine entries exist while a schedule references them or
    /// agents run on them; a machine back in UP with neither is
    /// dropped.
    fn prune_machine(&mut self, machine_id: &MachineId) {
        let in_schedule = self
            .maintenance_schedule
            .windows
            .iter()
            .any(|w| w.machine_ids.contains(machine_id));
        if in_schedule {
            return;
        }
        if let Some(machine) = self.machines.get(machine_id) {
            if machine.mode == MachineMode::Up && machine.agents.is_empty() {
                self.machines.remove(machine_id);
            }
        }
    }
}
