//! Phase runners and the table they play on.
//!
//! Each runner drives one phase's protocol: which seat acts when, what it
//! is shown, and what its answer changes. Calls are strictly sequential
//! because later seats see what earlier seats said.

mod day;
mod night;
mod night_zero;

pub use day::{DayOutcome, DayPhase};
pub use night::{KillDecision, NightOutcome, NightPhase};
pub use night_zero::NightZeroPhase;

use crate::actions::{ActionOutput, ActionType};
use crate::agent::PlayerAgent;
use crate::events::EventLog;
use crate::game::GameError;
use crate::memory::PlayerMemory;
use crate::prompt::ActionContext;
use crate::state::{GameState, GameStateManager, Role};
use crate::transcript::{TranscriptEntry, TranscriptManager};
use serde_json::json;
use std::collections::BTreeMap;

/// Everything one game owns: state, history and the seats.
#[derive(Debug)]
pub struct Table {
    pub state: GameStateManager,
    pub transcript: TranscriptManager,
    pub events: EventLog,
    agents: BTreeMap<String, PlayerAgent>,
    memories: BTreeMap<String, PlayerMemory>,
    /// Per seat, the event index its next call starts reading from.
    cursors: BTreeMap<String, usize>,
}

impl Table {
    pub fn new(state: GameStateManager, events: EventLog, agents: Vec<PlayerAgent>) -> Self {
        let memories = agents
            .iter()
            .map(|a| (a.name().to_string(), PlayerMemory::new()))
            .collect();
        let cursors = agents.iter().map(|a| (a.name().to_string(), 0)).collect();
        let agents = agents
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();

        Self {
            state,
            transcript: TranscriptManager::new(),
            events,
            agents,
            memories,
            cursors,
        }
    }

    pub fn agent(&self, name: &str) -> Option<&PlayerAgent> {
        self.agents.get(name)
    }

    pub fn memory(&self, name: &str) -> Option<&PlayerMemory> {
        self.memories.get(name)
    }

    pub fn memories(&self) -> &BTreeMap<String, PlayerMemory> {
        &self.memories
    }

    /// Replace a seat's memory with `update` applied to it.
    pub fn remember(&mut self, name: &str, update: impl FnOnce(&PlayerMemory) -> PlayerMemory) {
        if let Some(memory) = self.memories.get_mut(name) {
            *memory = update(memory);
        }
    }

    /// Living seats holding `role`, in seat order.
    pub fn living_with_role(&self, role: Role) -> Vec<String> {
        self.state.living_with_role(role)
    }

    /// Ask a seat for one action.
    ///
    /// The seat is shown the public events appended since its previous call
    /// under `recent_events`, and its memory is replaced by the returned copy.
    pub async fn consult(
        &mut self,
        name: &str,
        state: &GameState,
        transcript: &[TranscriptEntry],
        action_type: ActionType,
        context: ActionContext,
    ) -> Result<ActionOutput, GameError> {
        let cursor = self.cursors.get(name).copied().unwrap_or(0);
        let recent = self.events.public_view(cursor);
        self.cursors.insert(name.to_string(), self.events.len());
        let context = context.with("recent_events", &recent);

        let memory = self.memories.get(name).cloned().unwrap_or_default();
        let agent = self
            .agents
            .get_mut(name)
            .ok_or_else(|| GameError::UnknownAgent(name.to_string()))?;

        let response = agent.act(state, transcript, &memory, action_type, context).await;
        self.memories.insert(name.to_string(), response.memory);
        Ok(response.output)
    }
}

/// Where a speaker stands in an ordered list of speakers.
pub(crate) fn speaking_position(order: &[String], index: usize) -> serde_json::Value {
    json!({
        "position": index + 1,
        "total": order.len(),
        "spoken": &order[..index],
        "remaining": &order[index + 1..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaking_position() {
        let order: Vec<String> = ["A", "B", "C"].map(String::from).to_vec();
        let pos = speaking_position(&order, 1);
        assert_eq!(pos["position"], 2);
        assert_eq!(pos["total"], 3);
        assert_eq!(pos["spoken"], json!(["A"]));
        assert_eq!(pos["remaining"], json!(["C"]));

        let last = speaking_position(&order, 2);
        assert_eq!(last["remaining"], json!([]));
    }
}
