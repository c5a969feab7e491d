//! Scalar resource model and the algebra the operation pipeline is
//! built on: reservation stacks, persistent volume metadata, and
//! apply/contains/subtract over resource bags.
//!
//! Scalar arithmetic is done in milli-units so that repeated addition
//! and subtraction of fractional CPU values stays exact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource is missing a name")]
    MissingName,
    #[error("resource `{0}` has an invalid scalar value")]
    InvalidValue(String),
    #[error("resource `{0}` sets both the legacy `role` and `reservations`")]
    AmbiguousReservation(String),
    #[error("{0}")]
    Apply(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reservation {
    pub role: String,
    #[serde(default)]
    pub principal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Persistence {
    pub id: String,
    #[serde(default)]
    pub principal: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeMode {
    Rw,
    Ro,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Volume {
    pub container_path: String,
    pub mode: VolumeMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(default)]
    pub persistence: Option<Persistence>,
    #[serde(default)]
    pub volume: Option<Volume>,
}

/// One named scalar quantity plus its reservation and volume metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub value: f64,
    /// Legacy single-role field; `upgrade` folds it into `reservations`.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    #[serde(default)]
    pub disk: Option<DiskInfo>,
    /// Role this resource is currently allocated to, set on offered
    /// resources only.
    #[serde(default)]
    pub allocated_to: Option<String>,
}

fn millis(value: f64) -> i64 {
    (value * 1000.0).round() as i64
}

impl Resource {
    pub fn scalar(name: impl Into<String>, value: f64) -> Resource {
        Resource {
            name: name.into(),
            value,
            role: None,
            reservations: Vec::new(),
            disk: None,
            allocated_to: None,
        }
    }

    /// Normalizes to the canonical representation: the legacy `role`
    /// field becomes the sole entry of the reservation stack.
    pub fn upgrade(&mut self) -> Result<(), ResourceError> {
        if self.name.is_empty() {
            return Err(ResourceError::MissingName);
        }
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(ResourceError::InvalidValue(self.name.clone()));
        }
        if let Some(role) = self.role.take() {
            if !self.reservations.is_empty() {
                self.role = Some(role);
                return Err(ResourceError::AmbiguousReservation(self.name.clone()));
            }
            if role != "*" {
                self.reservations.push(Reservation {
                    role,
                    principal: None,
                });
            }
        }
        Ok(())
    }

    pub fn is_reserved(&self) -> bool {
        !self.reservations.is_empty()
    }

    /// Role of the outermost reservation, `*` when unreserved.
    pub fn reservation_role(&self) -> &str {
        self.reservations
            .last()
            .map(|r| r.role.as_str())
            .unwrap_or("*")
    }

    pub fn pop_reservation(mut self) -> Resource {
        self.reservations.pop();
        self
    }

    pub fn push_reservation(mut self, reservation: Reservation) -> Resource {
        self.reservations.push(reservation);
        self
    }

    pub fn strip_disk(mut self) -> Resource {
        self.disk = None;
        self
    }

    pub fn unallocate(mut self) -> Resource {
        self.allocated_to = None;
        self
    }

    /// True when two resources differ only in quantity.
    fn same_metadata(&self, other: &Resource) -> bool {
        self.name == other.name
            && self.reservations == other.reservations
            && self.disk == other.disk
            && self.allocated_to == other.allocated_to
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):{}", self.name, self.reservation_role(), self.value)
    }
}

/// A bag of resources, kept normalized: entries with identical metadata
/// are merged and zero quantities dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources(Vec<Resource>);

impl Resources {
    pub fn new() -> Resources {
        Resources(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.0.iter()
    }

    pub fn add(&mut self, resource: Resource) {
        if millis(resource.value) <= 0 {
            return;
        }
        for existing in &mut self.0 {
            if existing.same_metadata(&resource) {
                existing.value =
                    (millis(existing.value) + millis(resource.value)) as f64 / 1000.0;
                return;
            }
        }
        self.0.push(resource);
    }

    /// Subtracts what it can; quantities never go negative.
    pub fn subtract(&mut self, resource: &Resource) {
        for existing in &mut self.0 {
            if existing.same_metadata(resource) {
                let remaining = millis(existing.value) - millis(resource.value);
                existing.value = remaining.max(0) as f64 / 1000.0;
                break;
            }
        }
        self.0.retain(|r| millis(r.value) > 0);
    }

    pub fn contains(&self, other: &Resources) -> bool {
        other.iter().all(|needed| {
            self.iter()
                .any(|have| have.same_metadata(needed) && millis(have.value) >= millis(needed.value))
        })
    }

    pub fn contains_resource(&self, needed: &Resource) -> bool {
        self.iter()
            .any(|have| have.same_metadata(needed) && millis(have.value) >= millis(needed.value))
    }

    pub fn pop_reservation(&self) -> Resources {
        self.iter().cloned().map(Resource::pop_reservation).collect()
    }

    pub fn strip_disk(&self) -> Resources {
        self.iter().cloned().map(Resource::strip_disk).collect()
    }

    pub fn unallocate(&self) -> Resources {
        self.iter().cloned().map(Resource::unallocate).collect()
    }

    /// Runs `upgrade` over every resource in the bag.
    pub fn upgrade(&mut self) -> Result<(), ResourceError> {
        for resource in &mut self.0 {
            resource.upgrade()?;
        }
        Ok(())
    }

    /// Applies a mutating operation to this total, failing when the
    /// operation's inputs are not contained.
    pub fn apply(
        &self,
        operation: &crate::wire::OfferOperation,
    ) -> Result<Resources, ResourceError> {
        use crate::wire::OfferOperation::*;

        let mut result = self.clone();
        match operation {
            Launch { .. } => {}
            Reserve { resources } => {
                for resource in resources.iter() {
                    let unreserved = resource.clone().pop_reservation();
                    if !result.contains_resource(&unreserved) {
                        return Err(ResourceError::Apply(format!(
                            "Invalid RESERVE operation: {unreserved} is not contained in the total"
                        )));
                    }
                    result.subtract(&unreserved);
                    Resources::add(&mut result, resource.clone());
                }
            }
            Unreserve { resources } => {
                for resource in resources.iter() {
                    if !result.contains_resource(resource) {
                        return Err(ResourceError::Apply(format!(
                            "Invalid UNRESERVE operation: {resource} is not contained in the total"
                        )));
                    }
                    result.subtract(resource);
                    Resources::add(&mut result, resource.clone().pop_reservation());
                }
            }
            Create { volumes } => {
                for volume in volumes.iter() {
                    let stripped = volume.clone().strip_disk();
                    if !result.contains_resource(&stripped) {
                        return Err(ResourceError::Apply(format!(
                            "Invalid CREATE operation: {stripped} is not contained in the total"
                        )));
                    }
                    result.subtract(&stripped);
                    Resources::add(&mut result, volume.clone());
                }
            }
            Destroy { volumes } => {
                for volume in volumes.iter() {
                    if !result.contains_resource(volume) {
                        return Err(ResourceError::Apply(format!(
                            "Invalid DESTROY operation: {volume} is not contained in the total"
                        )));
                    }
                    result.subtract(volume);
                    Resources::add(&mut result, volume.clone().strip_disk());
                }
            }
            GrowVolume { volume, addition } => {
                if !result.contains_resource(volume) || !result.contains_resource(addition) {
                    return Err(ResourceError::Apply(format!(
                        "Invalid GROW_VOLUME operation: {volume} plus {addition} is not \
                         contained in the total"
                    )));
                }
                result.subtract(volume);
                result.subtract(addition);
                let mut grown = volume.clone();
                grown.value = (millis(volume.value) + millis(addition.value)) as f64 / 1000.0;
                Resources::add(&mut result, grown);
            }
            ShrinkVolume { volume, subtract } => {
                if !result.contains_resource(volume) {
                    return Err(ResourceError::Apply(format!(
                        "Invalid SHRINK_VOLUME operation: {volume} is not contained in the total"
                    )));
                }
                if millis(subtract.value) >= millis(volume.value) {
                    return Err(ResourceError::Apply(format!(
                        "Invalid SHRINK_VOLUME operation: cannot subtract {} from a volume of {}",
                        subtract.value, volume.value
                    )));
                }
                result.subtract(volume);
                let mut shrunk = volume.clone();
                shrunk.value = (millis(volume.value) - millis(subtract.value)) as f64 / 1000.0;
                Resources::add(&mut result, shrunk);
                let mut freed = subtract.clone();
                freed.disk = None;
                Resources::add(&mut result, freed);
            }
        }
        Ok(result)
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Resources {
        let mut resources = Resources::new();
        for resource in iter {
            Resources::add(&mut resources, resource);
        }
        resources
    }
}

impl From<Vec<Resource>> for Resources {
    fn from(resources: Vec<Resource>) -> Resources {
        resources.into_iter().collect()
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(mut self, other: Resources) -> Resources {
        self += other;
        self
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, other: Resources) {
        for resource in other.0 {
            self.add(resource);
        }
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(mut self, other: Resources) -> Resources {
        self -= other;
        self
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, other: Resources) {
        for resource in &other.0 {
            self.subtract(resource);
        }
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for resource in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{resource}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::OfferOperation;

    fn cpus(value: f64) -> Resource {
        Resource::scalar("cpus", value)
    }

    fn reserved(resource: Resource, role: &str) -> Resource {
        resource.push_reservation(Reservation {
            role: role.to_string(),
            principal: None,
        })
    }

    fn volume(value: f64, id: &str) -> Resource {
        let mut disk = reserved(Resource::scalar("disk", value), "data");
        disk.disk = Some(DiskInfo {
            persistence: Some(Persistence {
                id: id.to_string(),
                principal: None,
            }),
            volume: Some(Volume {
                container_path: "data".to_string(),
                mode: VolumeMode::Rw,
            }),
        });
        disk
    }

    #[test]
    fn merges_identical_metadata() {
        let total: Resources = vec![cpus(1.5), cpus(2.5)].into();
        assert!(total.contains_resource(&cpus(4.0)));
        assert!(!total.contains_resource(&cpus(4.1)));
    }

    #[test]
    fn subtract_clamps_and_drops_empties() {
        let mut total: Resources = vec![cpus(2.0)].into();
        total.subtract(&cpus(3.0));
        assert!(total.is_empty());
    }

    #[test]
    fn upgrade_folds_legacy_role() {
        let mut resource = cpus(1.0);
        resource.role = Some("batch".to_string());
        resource.upgrade().unwrap();
        assert_eq!("batch", resource.reservation_role());
        assert_eq!(None, resource.role);

        let mut invalid = cpus(0.0);
        assert_eq!(
            Err(ResourceError::InvalidValue("cpus".to_string())),
            invalid.upgrade()
        );
    }

    #[test]
    fn apply_reserve_and_unreserve() {
        let total: Resources = vec![cpus(4.0)].into();
        let wanted: Resources = vec![reserved(cpus(2.0), "batch")].into();

        let reserve = OfferOperation::Reserve {
            resources: wanted.clone(),
        };
        let applied = total.apply(&reserve).unwrap();
        assert!(applied.contains_resource(&reserved(cpus(2.0), "batch")));
        assert!(applied.contains_resource(&cpus(2.0)));

        let unreserve = OfferOperation::Unreserve { resources: wanted };
        let reverted = applied.apply(&unreserve).unwrap();
        assert!(reverted.contains_resource(&cpus(4.0)));

        // Reserving more than the total fails.
        let excessive = OfferOperation::Reserve {
            resources: vec![reserved(cpus(8.0), "batch")].into(),
        };
        assert!(reverted.apply(&excessive).is_err());
    }

    #[test]
    fn apply_create_and_destroy() {
        let total: Resources = vec![reserved(Resource::scalar("disk", 100.0), "data")].into();
        let create = OfferOperation::Create {
            volumes: vec![volume(64.0, "v1")].into(),
        };
        let applied = total.apply(&create).unwrap();
        assert!(applied.contains_resource(&volume(64.0, "v1")));

        let destroy = OfferOperation::Destroy {
            volumes: vec![volume(64.0, "v1")].into(),
        };
        let reverted = applied.apply(&destroy).unwrap();
        assert!(reverted.contains_resource(&reserved(Resource::scalar("disk", 100.0), "data")));
    }

    #[test]
    fn apply_grow_and_shrink() {
        let total: Resources =
            vec![volume(64.0, "v1"), reserved(Resource::scalar("disk", 36.0), "data")].into();

        let grow = OfferOperation::GrowVolume {
            volume: volume(64.0, "v1"),
            addition: reserved(Resource::scalar("disk", 36.0), "data"),
        };
        let grown = total.apply(&grow).unwrap();
        assert!(grown.contains_resource(&volume(100.0, "v1")));

        let shrink = OfferOperation::ShrinkVolume {
            volume: volume(100.0, "v1"),
            subtract: {
                let mut s = volume(40.0, "v1");
                s.disk = None;
                s
            },
        };
        let shrunk = grown.apply(&shrink).unwrap();
        assert!(shrunk.contains_resource(&volume(60.0, "v1")));
        assert!(shrunk.contains_resource(&reserved(Resource::scalar("disk", 40.0), "data")));
    }
}
