//! Interface to the allocator: the offer source. The master calls it
//! from the actor thread only, except for the inverse-offer status
//! snapshot which is an async read.

use crate::maintenance::Unavailability;
use crate::resources::Resources;
use crate::wire::{AgentId, Filters, FrameworkId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A framework's latest answer to an inverse offer, as observed by the
/// allocator. Cleared on master failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverseOfferStatus {
    pub framework_id: FrameworkId,
    pub status: InverseOfferStatusKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InverseOfferStatusKind {
    Unknown,
    Accept,
    Decline,
}

#[async_trait]
pub trait Allocator: Send + Sync {
    /// Returns resources from a rescinded or declined offer to the pool.
    /// The filter suppresses immediate re-offers to the same framework.
    fn recover_resources(
        &self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &Resources,
        filters: &Filters,
    );

    /// Tells the allocator about a machine's (possibly cleared) planned
    /// unavailability so it can extend or retract inverse offers.
    fn update_unavailability(&self, agent_id: &AgentId, unavailability: Option<Unavailability>);

    fn revive_offers(&self, framework_id: &FrameworkId, roles: &[String]);

    fn suppress_offers(&self, framework_id: &FrameworkId, roles: &[String]);

    /// Latest inverse-offer responses per agent. The data may be stale
    /// relative to master state; callers fold it defensively.
    async fn inverse_offer_statuses(
        &self,
    ) -> HashMap<AgentId, HashMap<FrameworkId, InverseOfferStatus>>;
}
