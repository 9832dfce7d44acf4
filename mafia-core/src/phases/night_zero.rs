use super::Table;
use crate::actions::ActionType;
use crate::events::Scene;
use crate::game::GameError;
use crate::memory::Strategy;
use crate::prompt::ActionContext;
use crate::state::Role;
use tracing::info;

/// Night zero: the mafia agree on a plan. Nobody dies.
///
/// Mafia seats speak once each in seat order. Every seat is shown the
/// strategies of the seats before it, and at the end every mafia memory
/// holds all of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NightZeroPhase;

impl NightZeroPhase {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, table: &mut Table) -> Result<Vec<Strategy>, GameError> {
        let snapshot = table.state.public_state();
        table.events.phase_start(Scene::new(&snapshot, "phase_start"));

        let mafia = table.living_with_role(Role::Mafia);
        info!(mafia = mafia.len(), "Night zero");

        let mut strategies: Vec<Strategy> = Vec::new();
        for name in &mafia {
            let state = table.state.public_state();
            let mut context = ActionContext::night_zero();
            if !strategies.is_empty() {
                context.insert("partner_strategies", &strategies);
            }

            let output = table.consult(name, &state, &[], ActionType::Speak, context).await?;
            let text = output.text().to_string();
            table
                .events
                .night_zero_strategy(Scene::new(&state, "night_zero"), name, &text, &output.raw);
            strategies.push(Strategy {
                speaker: name.clone(),
                text,
            });
        }

        for name in &mafia {
            table.remember(name, |memory| memory.with_strategies(strategies.clone()));
        }

        Ok(strategies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameConfig, GameRunner};
    use crate::testing::{standard_seating, ScriptedProvider, TaggedPromptBuilder};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_disclosure_is_cumulative() {
        let provider = Arc::new(ScriptedProvider::sensible());
        let config = GameConfig::from_seating(standard_seating());
        let mut runner =
            GameRunner::new(config, provider.clone(), Arc::new(TaggedPromptBuilder)).unwrap();
        runner.table_mut().state.advance_phase();

        let strategies = NightZeroPhase.run(runner.table_mut()).await.unwrap();
        let speakers: Vec<&str> = strategies.iter().map(|s| s.speaker.as_str()).collect();
        assert_eq!(speakers, vec!["Alice", "Diana", "Heidi"]);

        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        let seen: Vec<usize> = calls
            .iter()
            .map(|c| {
                c.tags()
                    .context
                    .get("partner_strategies")
                    .and_then(|v| v.as_array())
                    .map_or(0, Vec::len)
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2]);

        for name in ["Alice", "Diana", "Heidi"] {
            let memory = runner.table().memory(name).unwrap();
            assert_eq!(memory.facts.night_zero_strategies.len(), 3);
        }
        assert!(runner.table().memory("Bob").unwrap().facts.night_zero_strategies.is_empty());
        // Only the phase start is public.
        assert_eq!(runner.table().events.public_view(0).len(), 1);
    }
}
