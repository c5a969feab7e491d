//! Actor-side pieces of the mutating-operation pipeline: preparation
//! (lookup, upgrade, semantic validation, authorization requirements),
//! speculative offer rescinding, and post-apply bookkeeping.

use super::{Master, Operation};
use crate::auth::{Action, AuthObject, Principal};
use crate::resources::Resources;
use crate::validation;
use crate::wire::{
    AgentId, Filters, FrameworkId, OfferId, OfferOperation, OperationState, OperationStatus,
};
use log::info;

/// A validated operation ready for authorization and apply: the
/// resources it will consume and the approvals it needs.
pub struct PreparedOperation {
    pub agent_id: AgentId,
    pub operation: OfferOperation,
    pub required: Resources,
    pub auth: Vec<(Action, AuthObject)>,
}

impl Master {
    /// Steps one to three of the pipeline: agent lookup, resource
    /// format upgrade, and per-kind semantic validation. The returned
    /// error text goes back to the caller as 400 BadRequest.
    pub(crate) fn prepare_operation(
        &self,
        agent_id: &AgentId,
        mut operation: OfferOperation,
        principal: Option<&Principal>,
    ) -> Result<PreparedOperation, String> {
        let agent = self
            .agents
            .registered
            .get(agent_id)
            .ok_or_else(|| "No agent found with specified ID".to_string())?;

        upgrade_operation(&mut operation).map_err(|err| err.to_string())?;

        let mut auth = Vec::new();
        let required = match &operation {
            OfferOperation::Launch { .. } => {
                return Err("LAUNCH is only valid inside an offer accept".to_string());
            }
            OfferOperation::Reserve { resources } => {
                validation::validate_reserve(resources, principal, &agent.capabilities).map_err(
                    |err| format!("Invalid RESERVE operation on agent {agent_id}: {err}"),
                )?;
                for resource in resources.iter() {
                    auth.push((
                        Action::ReserveResources,
                        AuthObject::role(resource.reservation_role()),
                    ));
                }
                // Only one reservation is pushed at a time, so the
                // resources with one reservation popped must be present
                // on the agent.
                resources.pop_reservation()
            }
            OfferOperation::Unreserve { resources } => {
                validation::validate_unreserve(resources)
                    .map_err(|err| format!("Invalid UNRESERVE operation: {err}"))?;
                for resource in resources.iter() {
                    auth.push((
                        Action::UnreserveResources,
                        AuthObject {
                            value: resource
                                .reservations
                                .last()
                                .and_then(|r| r.principal.clone()),
                            ..AuthObject::default()
                        },
                    ));
                }
                resources.clone()
            }
            OfferOperation::Create { volumes } => {
                validation::validate_create(volumes, &agent.checkpointed_resources, principal)
                    .map_err(|err| {
                        format!("Invalid CREATE operation on agent {agent_id}: {err}")
                    })?;
                for volume in volumes.iter() {
                    auth.push((
                        Action::CreateVolume,
                        AuthObject::role(volume.reservation_role()),
                    ));
                }
                // DiskInfo is created when the operation is applied;
                // what must exist beforehand is the bare disk.
                volumes.strip_disk()
            }
            OfferOperation::Destroy { volumes } => {
                validation::validate_destroy(
                    volumes,
                    &agent.checkpointed_resources,
                    &agent.used_resources,
                )
                .map_err(|err| format!("Invalid DESTROY operation: {err}"))?;
                for volume in volumes.iter() {
                    auth.push((
                        Action::DestroyVolume,
                        AuthObject {
                            value: volume
                                .disk
                                .as_ref()
                                .and_then(|d| d.persistence.as_ref())
                                .and_then(|p| p.principal.clone()),
                            ..AuthObject::default()
                        },
                    ));
                }
                volumes.clone()
            }
            OfferOperation::GrowVolume { volume, addition } => {
                validation::validate_grow_volume(volume, addition, &agent.capabilities).map_err(
                    |err| format!("Invalid GROW_VOLUME operation on agent {agent_id}: {err}"),
                )?;
                auth.push((
                    Action::ResizeVolume,
                    AuthObject::role(volume.reservation_role()),
                ));
                vec![volume.clone(), addition.clone()].into()
            }
            OfferOperation::ShrinkVolume { volume, subtract } => {
                validation::validate_shrink_volume(volume, subtract, &agent.capabilities).map_err(
                    |err| format!("Invalid SHRINK_VOLUME operation on agent {agent_id}: {err}"),
                )?;
                auth.push((
                    Action::ResizeVolume,
                    AuthObject::role(volume.reservation_role()),
                ));
                vec![volume.clone()].into()
            }
        };

        Ok(PreparedOperation {
            agent_id: agent_id.clone(),
            operation,
            required,
            auth,
        })
    }

    /// Step five: greedily rescind outstanding offers on the agent
    /// until the recovered tally covers the operation.
    ///
    /// What looks available in the allocator may already be scheduled
    /// for re-offer, so this is pessimistic on purpose: rescinding with
    /// the default refuse interval virtually always wins the race when
    /// the resources would come back to the same frameworks.
    pub(crate) fn rescind_covering_offers(
        &mut self,
        agent_id: &AgentId,
        required: Resources,
        operation: &OfferOperation,
    ) {
        let offer_ids: Vec<OfferId> = self
            .agents
            .registered
            .get(agent_id)
            .map(|agent| agent.offers.iter().cloned().collect())
            .unwrap_or_default();

        let mut required = required;
        let mut total_recovered = Resources::new();

        for offer_id in offer_ids {
            let Some(offer) = self.offers.get(&offer_id) else {
                continue;
            };
            let recovered = offer.resources.unallocate();

            // Skip offers whose rescission would not move the tally.
            if required == required.clone() - recovered.clone() {
                continue;
            }

            let Some(offer) = self.remove_offer(&offer_id, true) else {
                continue;
            };
            info!(
                "event=offer_rescinded offer={offer_id} agent={agent_id} \
                 framework={} reason=operation_requires_resources",
                offer.framework_id
            );
            self.allocator.recover_resources(
                &offer.framework_id,
                agent_id,
                &offer.resources,
                &Filters::default(),
            );

            total_recovered += recovered.clone();
            required -= recovered;

            if total_recovered.apply(operation).is_ok() {
                break;
            }
        }
    }

    /// Step six bookkeeping once the agent accepted the operation:
    /// fold it into the agent's totals and track it until its terminal
    /// status is acknowledged.
    pub(crate) fn record_applied_operation(
        &mut self,
        agent_id: &AgentId,
        operation: OfferOperation,
        framework_id: Option<FrameworkId>,
        uuid: Vec<u8>,
    ) {
        let Some(agent) = self.agents.registered.get_mut(agent_id) else {
            return;
        };
        if let Ok(total) = agent.total_resources.apply(&operation) {
            agent.total_resources = total;
            agent.checkpointed_resources = agent
                .total_resources
                .iter()
                .filter(|r| {
                    r.is_reserved()
                        || r.disk
                            .as_ref()
                            .and_then(|d| d.persistence.as_ref())
                            .is_some()
                })
                .cloned()
                .collect();
        }
        agent.operations.insert(
            uuid.clone(),
            Operation {
                uuid: uuid.clone(),
                framework_id,
                agent_id: agent_id.clone(),
                info: operation,
                latest_status: OperationStatus {
                    operation_id: None,
                    state: OperationState::Pending,
                    message: None,
                    uuid: Some(uuid),
                },
            },
        );
    }
}

fn upgrade_operation(operation: &mut OfferOperation) -> Result<(), crate::resources::ResourceError> {
    match operation {
        OfferOperation::Launch { .. } => Ok(()),
        OfferOperation::Reserve { resources } | OfferOperation::Unreserve { resources } => {
            resources.upgrade()
        }
        OfferOperation::Create { volumes } | OfferOperation::Destroy { volumes } => {
            volumes.upgrade()
        }
        OfferOperation::GrowVolume { volume, addition } => {
            volume.upgrade()?;
            addition.upgrade()
        }
        OfferOperation::ShrinkVolume { volume, subtract } => {
            volume.upgrade()?;
            subtract.upgrade()
        }
    }
}
