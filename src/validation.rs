//! Structural validation of incoming calls and semantic validation of
//! resource operations. All failures surface as a textual reason the
//! request plane returns as 400 BadRequest.

use crate::auth::Principal;
use crate::resources::{Resource, Resources};
use crate::wire::{SchedulerCall, SchedulerCallKind};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(message: impl Into<String>) -> ValidationError {
        ValidationError(message.into())
    }
}

/// Agent capability gating refined reservations.
pub const CAPABILITY_RESERVATION_REFINEMENT: &str = "RESERVATION_REFINEMENT";
/// Agent capability gating volume resizing.
pub const CAPABILITY_RESIZE_VOLUME: &str = "RESIZE_VOLUME";

/// Validates a scheduler call before dispatch. Payload presence is
/// enforced by decoding; what remains are the identity agreements and
/// identifier well-formedness checks.
pub fn validate_scheduler_call(
    call: &SchedulerCall,
    principal: Option<&Principal>,
) -> Result<(), ValidationError> {
    if let SchedulerCallKind::Subscribe(subscribe) = &call.kind {
        let info = &subscribe.framework_info;
        if info.id != call.framework_id {
            return Err(ValidationError::new(
                "'framework_id' differs from 'subscribe.framework_info.id'",
            ));
        }
        if let (Some(principal), Some(info_principal)) =
            (principal.and_then(|p| p.value.as_deref()), info.principal.as_deref())
        {
            if principal != info_principal {
                return Err(ValidationError::new(format!(
                    "Authenticated principal '{principal}' does not match principal \
                     '{info_principal}' set in the framework description"
                )));
            }
        }
        return Ok(());
    }

    // All calls except SUBSCRIBE must identify their framework.
    if call.framework_id.is_none() {
        return Err(ValidationError::new("Expecting 'framework_id' to be present"));
    }

    match &call.kind {
        SchedulerCallKind::Acknowledge(acknowledge) => {
            validate_uuid(&acknowledge.uuid)?;
        }
        SchedulerCallKind::AcknowledgeOperationStatus(acknowledge) => {
            validate_uuid(&acknowledge.uuid)?;
            if acknowledge.agent_id.is_none() {
                return Err(ValidationError::new("Expecting 'agent_id' to be present"));
            }
            if acknowledge.resource_provider_id.is_none() {
                return Err(ValidationError::new(
                    "Expecting 'resource_provider_id' to be present",
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

fn validate_uuid(uuid: &[u8]) -> Result<(), ValidationError> {
    if uuid.len() != 16 {
        return Err(ValidationError::new(format!(
            "Expecting 'uuid' to be 16 bytes, got {}",
            uuid.len()
        )));
    }
    Ok(())
}

fn validate_principal(
    reservation_principal: Option<&str>,
    principal: Option<&Principal>,
) -> Result<(), ValidationError> {
    if let (Some(reserved), Some(principal)) = (
        reservation_principal,
        principal.and_then(|p| p.value.as_deref()),
    ) {
        if reserved != principal {
            return Err(ValidationError::new(format!(
                "reservation principal '{reserved}' does not match request principal \
                 '{principal}'"
            )));
        }
    }
    Ok(())
}

pub fn validate_reserve(
    resources: &Resources,
    principal: Option<&Principal>,
    agent_capabilities: &[String],
) -> Result<(), ValidationError> {
    for resource in resources.iter() {
        if !resource.is_reserved() {
            return Err(ValidationError::new(format!(
                "resource {resource} is not dynamically reserved"
            )));
        }
        validate_principal(
            resource
                .reservations
                .last()
                .and_then(|r| r.principal.as_deref()),
            principal,
        )?;
        if resource.reservations.len() > 1
            && !agent_capabilities
                .iter()
                .any(|c| c == CAPABILITY_RESERVATION_REFINEMENT)
        {
            return Err(ValidationError::new(format!(
                "resource {resource} has a refined reservation but the agent lacks the \
                 {CAPABILITY_RESERVATION_REFINEMENT} capability"
            )));
        }
    }
    Ok(())
}

pub fn validate_unreserve(resources: &Resources) -> Result<(), ValidationError> {
    for resource in resources.iter() {
        if !resource.is_reserved() {
            return Err(ValidationError::new(format!(
                "resource {resource} is not dynamically reserved"
            )));
        }
    }
    Ok(())
}

pub fn validate_create(
    volumes: &Resources,
    checkpointed: &Resources,
    principal: Option<&Principal>,
) -> Result<(), ValidationError> {
    for volume in volumes.iter() {
        let disk = volume.disk.as_ref().ok_or_else(|| {
            ValidationError::new(format!("volume {volume} is missing disk information"))
        })?;
        let persistence = disk.persistence.as_ref().ok_or_else(|| {
            ValidationError::new(format!("volume {volume} is missing a persistence ID"))
        })?;
        if disk.volume.is_none() {
            return Err(ValidationError::new(format!(
                "volume {volume} is missing a container path"
            )));
        }
        if !volume.is_reserved() {
            return Err(ValidationError::new(format!(
                "volume {volume} must be created on reserved resources"
            )));
        }
        validate_principal(persistence.principal.as_deref(), principal)?;

        let duplicate = checkpointed.iter().any(|existing| {
            existing
                .disk
                .as_ref()
                .and_then(|d| d.persistence.as_ref())
                .map(|p| p.id == persistence.id)
                .unwrap_or(false)
        });
        if duplicate {
            return Err(ValidationError::new(format!(
                "persistence ID '{}' already exists on the agent",
                persistence.id
            )));
        }
    }
    Ok(())
}

pub fn validate_destroy(
    volumes: &Resources,
    checkpointed: &Resources,
    used: &Resources,
) -> Result<(), ValidationError> {
    for volume in volumes.iter() {
        if volume
            .disk
            .as_ref()
            .and_then(|d| d.persistence.as_ref())
            .is_none()
        {
            return Err(ValidationError::new(format!(
                "volume {volume} is not a persistent volume"
            )));
        }
        if !checkpointed.contains_resource(volume) {
            return Err(ValidationError::new(format!(
                "volume {volume} does not exist on the agent"
            )));
        }
        if used.contains_resource(volume) {
            return Err(ValidationError::new(format!(
                "volume {volume} is still in use by a task"
            )));
        }
    }
    Ok(())
}

fn validate_resize_pair(
    volume: &Resource,
    quantity: &Resource,
    agent_capabilities: &[String],
) -> Result<(), ValidationError> {
    if !agent_capabilities
        .iter()
        .any(|c| c == CAPABILITY_RESIZE_VOLUME)
    {
        return Err(ValidationError::new(format!(
            "the agent lacks the {CAPABILITY_RESIZE_VOLUME} capability"
        )));
    }
    if volume
        .disk
        .as_ref()
        .and_then(|d| d.persistence.as_ref())
        .is_none()
    {
        return Err(ValidationError::new(format!(
            "volume {volume} is not a persistent volume"
        )));
    }
    if quantity
        .disk
        .as_ref()
        .and_then(|d| d.persistence.as_ref())
        .is_some()
    {
        return Err(ValidationError::new(format!(
            "resize quantity {quantity} must not itself be a persistent volume"
        )));
    }
    if volume.name != quantity.name || volume.reservations != quantity.reservations {
        return Err(ValidationError::new(format!(
            "resize quantity {quantity} does not match volume {volume}"
        )));
    }
    Ok(())
}

pub fn validate_grow_volume(
    volume: &Resource,
    addition: &Resource,
    agent_capabilities: &[String],
) -> Result<(), ValidationError> {
    validate_resize_pair(volume, addition, agent_capabilities)?;
    if addition.value <= 0.0 {
        return Err(ValidationError::new("grow quantity must be positive"));
    }
    Ok(())
}

pub fn validate_shrink_volume(
    volume: &Resource,
    subtract: &Resource,
    agent_capabilities: &[String],
) -> Result<(), ValidationError> {
    validate_resize_pair(volume, subtract, agent_capabilities)?;
    if subtract.value <= 0.0 || subtract.value >= volume.value {
        return Err(ValidationError::new(
            "shrink quantity must be positive and smaller than the volume",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Reservation;
    use crate::wire::{
        Acknowledge, FrameworkId, FrameworkInfo, Subscribe, TaskId,
    };

    fn subscribe_call(framework_id: Option<&str>, info_id: Option<&str>) -> SchedulerCall {
        SchedulerCall {
            framework_id: framework_id.map(FrameworkId::from),
            kind: SchedulerCallKind::Subscribe(Subscribe {
                framework_info: FrameworkInfo {
                    name: "fw".to_string(),
                    id: info_id.map(FrameworkId::from),
                    ..FrameworkInfo::default()
                },
            }),
        }
    }

    #[test]
    fn subscribe_ids_must_agree() {
        assert!(validate_scheduler_call(&subscribe_call(None, None), None).is_ok());
        assert!(validate_scheduler_call(&subscribe_call(Some("a"), Some("a")), None).is_ok());
        assert!(validate_scheduler_call(&subscribe_call(Some("a"), None), None).is_err());
        assert!(validate_scheduler_call(&subscribe_call(Some("a"), Some("b")), None).is_err());
    }

    #[test]
    fn subscribe_principal_must_agree() {
        let mut call = subscribe_call(None, None);
        if let SchedulerCallKind::Subscribe(subscribe) = &mut call.kind {
            subscribe.framework_info.principal = Some("alice".to_string());
        }
        let alice = Principal::from_value("alice");
        let bob = Principal::from_value("bob");
        assert!(validate_scheduler_call(&call, Some(&alice)).is_ok());
        assert!(validate_scheduler_call(&call, Some(&bob)).is_err());
    }

    #[test]
    fn non_subscribe_requires_framework_id() {
        let call = SchedulerCall {
            framework_id: None,
            kind: SchedulerCallKind::Teardown,
        };
        assert!(validate_scheduler_call(&call, None).is_err());
    }

    #[test]
    fn acknowledge_uuid_must_be_sixteen_bytes() {
        let call = SchedulerCall {
            framework_id: Some(FrameworkId::from("fw")),
            kind: SchedulerCallKind::Acknowledge(Acknowledge {
                agent_id: "agent".into(),
                task_id: TaskId::from("t"),
                uuid: vec![0; 15],
            }),
        };
        assert!(validate_scheduler_call(&call, None).is_err());
    }

    #[test]
    fn reserve_requires_reservations() {
        let unreserved: Resources = vec![Resource::scalar("cpus", 1.0)].into();
        assert!(validate_reserve(&unreserved, None, &[]).is_err());

        let reserved: Resources = vec![Resource::scalar("cpus", 1.0).push_reservation(
            Reservation {
                role: "batch".to_string(),
                principal: None,
            },
        )]
        .into();
        assert!(validate_reserve(&reserved, None, &[]).is_ok());
    }

    #[test]
    fn refined_reservation_needs_capability() {
        let refined: Resources = vec![Resource::scalar("cpus", 1.0)
            .push_reservation(Reservation {
                role: "eng".to_string(),
                principal: None,
            })
            .push_reservation(Reservation {
                role: "eng/batch".to_string(),
                principal: None,
            })]
        .into();
        assert!(validate_reserve(&refined, None, &[]).is_err());
        assert!(validate_reserve(
            &refined,
            None,
            &[CAPABILITY_RESERVATION_REFINEMENT.to_string()]
        )
        .is_ok());
    }
}
