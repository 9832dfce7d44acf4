//! The game loop.
//!
//! [`GameRunner`] owns one table and plays it to the end: night zero once,
//! then day and night in turn, checking the win condition after every death.

use crate::agent::{PlayerAgent, DEFAULT_MAX_ATTEMPTS};
use crate::events::{Event, EventLog, ObserverError, Scene};
use crate::persist::{GameLog, GameMetadata, PlayerEntry, PlayerOutcome};
use crate::phases::{DayPhase, NightPhase, NightZeroPhase, Table};
use crate::prompt::{Persona, PromptBuilder};
use crate::provider::Provider;
use crate::state::{GameStateManager, Role, StateError, Team, PLAYER_COUNT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Errors that stop a game.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("No agent seated as {0}")]
    UnknownAgent(String),

    #[error("Game did not finish within {0} rounds")]
    RoundLimitExceeded(u32),
}

/// Everything needed to set up one game.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Names to seat by seeded shuffle. Ignored when `seating` is set.
    pub player_names: Vec<String>,

    /// A fixed seating, seat = position.
    pub seating: Option<Vec<(String, Role)>>,

    /// Persona per player name. Missing entries get a persona named after
    /// the player.
    pub personas: BTreeMap<String, Persona>,

    /// Seed for seating, roles and fallback picks.
    pub seed: Option<u64>,

    /// Provider calls per action before the default is used.
    pub max_attempts: u32,

    /// Limit on a single provider call.
    pub provider_timeout: Option<Duration>,

    /// Days allowed before the game is abandoned.
    pub max_rounds: Option<u32>,
}

impl GameConfig {
    /// Create a config that seats `names` by seeded shuffle.
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            player_names: names.into_iter().map(Into::into).collect(),
            seating: None,
            personas: BTreeMap::new(),
            seed: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            provider_timeout: None,
            max_rounds: None,
        }
    }

    /// Create a config with a fixed seating.
    pub fn from_seating<S: Into<String>>(seating: impl IntoIterator<Item = (S, Role)>) -> Self {
        let seating: Vec<(String, Role)> = seating
            .into_iter()
            .map(|(name, role)| (name.into(), role))
            .collect();
        let mut config = Self::new(seating.iter().map(|(name, _)| name.clone()));
        config.seating = Some(seating);
        config
    }

    pub fn with_persona(mut self, player: impl Into<String>, persona: Persona) -> Self {
        self.personas.insert(player.into(), persona);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    fn persona_for(&self, name: &str) -> Persona {
        self.personas
            .get(name)
            .cloned()
            .unwrap_or_else(|| Persona::new(name.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationKind {
    /// Voted out during the day.
    Day,
    /// Killed by the mafia.
    Night,
}

/// One death, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    pub round: u32,
    pub kind: EliminationKind,
    pub player: String,
    pub role: Role,
}

/// How the game ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: Uuid,
    pub winner: Team,
    /// The round in which the game ended.
    pub rounds: u32,
    pub final_living: Vec<String>,
    pub eliminations: Vec<Elimination>,
    pub final_roles: BTreeMap<String, Role>,
}

/// Plays one game from night zero to a win.
#[derive(Debug)]
pub struct GameRunner {
    config: GameConfig,
    table: Table,
    night_zero: NightZeroPhase,
    day: DayPhase,
    night: NightPhase,
    eliminations: Vec<Elimination>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<GameResult>,
}

impl GameRunner {
    /// Seat the table and build one agent per seat.
    ///
    /// Mafia agents learn their partners here. Each agent's fallback
    /// generator is seeded from the game seed offset by its seat.
    pub fn new(
        config: GameConfig,
        provider: Arc<dyn Provider>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Result<Self, GameError> {
        let state = match &config.seating {
            Some(seating) => GameStateManager::from_seating(seating.iter().cloned())?,
            None => GameStateManager::new(config.player_names.iter().cloned(), config.seed)?,
        };

        let agents = state
            .players()
            .iter()
            .map(|player| {
                let mut agent = PlayerAgent::new(
                    player.name.as_str(),
                    player.seat,
                    player.role,
                    config.persona_for(&player.name),
                    Arc::clone(&provider),
                    Arc::clone(&prompts),
                )
                .with_max_attempts(config.max_attempts)
                .with_timeout(config.provider_timeout);
                if player.role.is_mafia() {
                    agent = agent.with_partners(state.mafia_partners(&player.name));
                }
                if let Some(seed) = config.seed {
                    agent = agent.with_seed(seed.wrapping_add(player.seat as u64 + 1));
                }
                agent
            })
            .collect();

        let table = Table::new(state, EventLog::new(), agents);
        info!(game_id = %table.events.game_id(), players = PLAYER_COUNT, "Game created");

        Ok(Self {
            config,
            table,
            night_zero: NightZeroPhase::new(),
            day: DayPhase::new(),
            night: NightPhase::new(),
            eliminations: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            result: None,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    pub fn game_id(&self) -> Uuid {
        self.table.events.game_id()
    }

    pub fn eliminations(&self) -> &[Elimination] {
        &self.eliminations
    }

    /// The result, once the game has ended.
    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    /// Register a callback run after every event append.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&Event) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.table.events.add_observer(observer);
    }

    /// Play the game to the end.
    pub async fn run(&mut self) -> Result<GameResult, GameError> {
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }

        self.started_at = Utc::now();
        self.table.state.advance_phase();
        self.night_zero.run(&mut self.table).await?;

        let mut night_kill: Option<String> = None;
        loop {
            self.table.state.advance_phase();
            let round = self.table.state.round_number();
            if let Some(limit) = self.config.max_rounds {
                if round > limit {
                    return Err(GameError::RoundLimitExceeded(limit));
                }
            }

            let day = self.day.run(&mut self.table, night_kill.take()).await?;
            if let Some(player) = day.eliminated {
                self.record(round, EliminationKind::Day, player);
                if let Some(winner) = self.table.state.winner() {
                    return Ok(self.finish(winner));
                }
            }

            self.table.state.advance_phase();
            let night = self.night.run(&mut self.table).await?;
            if let Some(player) = night.killed {
                self.record(round, EliminationKind::Night, player.clone());
                night_kill = Some(player);
                if let Some(winner) = self.table.state.winner() {
                    return Ok(self.finish(winner));
                }
            }
        }
    }

    fn record(&mut self, round: u32, kind: EliminationKind, player: String) {
        if let Some(role) = self.table.state.role_of(&player) {
            self.eliminations.push(Elimination {
                round,
                kind,
                player,
                role,
            });
        }
    }

    fn finish(&mut self, winner: Team) -> GameResult {
        let final_roles = self.table.state.all_roles();
        let state = self.table.state.public_state();
        self.table
            .events
            .game_end(Scene::new(&state, "game_end"), winner, &final_roles);

        let result = GameResult {
            game_id: self.game_id(),
            winner,
            rounds: state.round_number,
            final_living: state.living_players,
            eliminations: self.eliminations.clone(),
            final_roles,
        };
        info!(winner = %winner, rounds = result.rounds, "Game over");

        self.ended_at = Some(Utc::now());
        self.result = Some(result.clone());
        result
    }

    /// The game as a log document, finished or not.
    pub fn game_log(&self) -> GameLog {
        let players = self
            .table
            .state
            .players()
            .iter()
            .map(|player| {
                let outcome = match self.eliminations.iter().find(|e| e.player == player.name) {
                    Some(e) if e.kind == EliminationKind::Day => PlayerOutcome::Eliminated,
                    Some(_) => PlayerOutcome::Killed,
                    None => PlayerOutcome::Survived,
                };
                let persona_id = self
                    .table
                    .agent(&player.name)
                    .map(|agent| agent.persona().id.clone())
                    .unwrap_or_default();
                PlayerEntry {
                    seat: player.seat,
                    persona_id,
                    name: player.name.clone(),
                    role: player.role,
                    outcome,
                }
            })
            .collect();

        GameLog::new(
            self.game_id(),
            self.started_at,
            self.ended_at,
            players,
            self.table.events.full_view().to_vec(),
            GameMetadata {
                seed: self.config.seed,
                player_count: PLAYER_COUNT,
            },
            self.table.transcript.full_transcript(),
            self.result.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionType;
    use crate::testing::{
        roster, speak, standard_seating, target, text, vote, ScriptedProvider, TaggedPromptBuilder,
    };

    fn runner(config: GameConfig) -> GameRunner {
        GameRunner::new(
            config,
            Arc::new(ScriptedProvider::sensible()),
            Arc::new(TaggedPromptBuilder),
        )
        .unwrap()
    }

    #[test]
    fn test_config_builders() {
        let config = GameConfig::new(roster())
            .with_seed(42)
            .with_max_attempts(0)
            .with_max_rounds(5)
            .with_persona("Alice", Persona::new("the_skeptic"));

        assert_eq!(config.seed, Some(42));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.max_rounds, Some(5));
        assert_eq!(config.persona_for("Alice").id, "the_skeptic");
        assert_eq!(config.persona_for("Bob").id, "bob");
    }

    #[test]
    fn test_wrong_roster_size() {
        let result = GameRunner::new(
            GameConfig::new(["Alice", "Bob"]),
            Arc::new(ScriptedProvider::sensible()),
            Arc::new(TaggedPromptBuilder),
        );
        assert!(matches!(result, Err(GameError::State(StateError::RosterSize { .. }))));
    }

    #[test]
    fn test_mafia_agents_know_partners() {
        let runner = runner(GameConfig::from_seating(standard_seating()));
        let alice = runner.table().agent("Alice").unwrap();
        assert_eq!(alice.partners(), ["Diana".to_string(), "Heidi".to_string()]);
        assert!(runner.table().agent("Bob").unwrap().partners().is_empty());
    }

    #[test]
    fn test_seeded_seating_is_reproducible() {
        let a = runner(GameConfig::new(roster()).with_seed(9));
        let b = runner(GameConfig::new(roster()).with_seed(9));
        assert_eq!(a.table().state.players(), b.table().state.players());
    }

    #[tokio::test]
    async fn test_round_limit() {
        // Everyone skips and the mafia never kill, so nothing ever ends.
        let provider = ScriptedProvider::new(|action, _| {
            Ok(match action {
                ActionType::Speak => speak("Nothing to add right now.", "skip"),
                ActionType::Vote => vote("skip"),
                ActionType::LastWords | ActionType::Defense => text("Farewell."),
                _ => target("skip"),
            })
        });
        let mut runner = GameRunner::new(
            GameConfig::from_seating(standard_seating()).with_max_rounds(2),
            Arc::new(provider),
            Arc::new(TaggedPromptBuilder),
        )
        .unwrap();

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, GameError::RoundLimitExceeded(2)));
        assert!(runner.eliminations().is_empty());
        assert!(runner.result().is_none());
    }
}
