//! The gone transition: terminal removal of an agent, guarded against
//! every concurrent registry transition for the same agent.

use super::Master;
use crate::wire::AgentId;
use log::{info, warn};

/// Outcome of the precondition check, evaluated in order. Each variant
/// maps to a distinct response.
pub enum GonePrecondition {
    /// 200: the agent already transitioned to gone.
    AlreadyGone,
    /// 503: another registry transition for this agent is in flight.
    TransitionInFlight(String),
    /// 404: the agent is not registered, recovered, or unreachable.
    NotFound,
    /// The agent was placed in the marking-gone set; commit may
    /// proceed.
    Proceed { gone_time_ms: u64 },
}

impl Master {
    /// Checks the ordered preconditions and, when they pass, claims the
    /// per-agent transition slot.
    pub(crate) fn begin_mark_agent_gone(&mut self, agent_id: &AgentId) -> GonePrecondition {
        info!("event=marking_agent_gone agent={agent_id}");

        if self.agents.gone.contains_key(agent_id) {
            warn!("event=agent_already_gone agent={agent_id}");
            return GonePrecondition::AlreadyGone;
        }
        if self.agents.marking_gone.contains(agent_id) {
            warn!("event=mark_gone_rejected agent={agent_id} reason=gone_transition_in_progress");
            return GonePrecondition::TransitionInFlight(format!(
                "Agent '{agent_id}' is already being transitioned to gone"
            ));
        }
        if self.agents.removing.contains(agent_id) {
            warn!("event=mark_gone_rejected agent={agent_id} reason=remove_transition_in_progress");
            return GonePrecondition::TransitionInFlight(format!(
                "Agent '{agent_id}' is being transitioned to removed"
            ));
        }
        if self.agents.marking_unreachable.contains(agent_id) {
            warn!(
                "event=mark_gone_rejected agent={agent_id} \
                 reason=unreachable_transition_in_progress"
            );
            return GonePrecondition::TransitionInFlight(format!(
                "Agent '{agent_id}' is being transitioned to unreachable"
            ));
        }

        let known = self.agents.registered.contains_key(agent_id)
            || self.agents.recovered.contains_key(agent_id)
            || self.agents.unreachable.contains_key(agent_id);
        if !known {
            return GonePrecondition::NotFound;
        }

        self.agents.marking_gone.insert(agent_id.clone());
        GonePrecondition::Proceed {
            gone_time_ms: Master::now_ms(),
        }
    }

    /// Completes the transition after the registry commit: emits LOST
    /// updates, purges operations and offers, and records the agent as
    /// gone.
    pub(crate) fn complete_mark_agent_gone(&mut self, agent_id: &AgentId, gone_time_ms: u64) {
        self.agents.marking_gone.remove(agent_id);
        self.agents.recovered.remove(agent_id);
        self.agents.unreachable.remove(agent_id);

        // The agent may not be currently registered (unreachable or
        // recovered); local cleanup is then a no-op.
        if self.agents.registered.contains_key(agent_id) {
            self.remove_agent(agent_id, "Agent marked gone by the operator");
        }

        self.agents.gone.insert(agent_id.clone(), gone_time_ms);
        info!("event=agent_gone agent={agent_id} gone_time_ms={gone_time_ms}");
    }

    /// Releases the transition slot when the registry operation was
    /// discarded before reaching the log.
    pub(crate) fn abandon_mark_agent_gone(&mut self, agent_id: &AgentId) {
        self.agents.marking_gone.remove(agent_id);
    }
}
