//! The game log document.
//!
//! A finished (or abandoned) game serializes to one JSON document holding
//! the roster, every event unfiltered and the full transcript. Writing it
//! anywhere is the caller's business.

use crate::events::Event;
use crate::game::GameResult;
use crate::state::{Role, Team};
use crate::transcript::DayRound;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Current log schema.
pub const SCHEMA_VERSION: &str = "1.0";

/// Errors from reading or writing a game log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerOutcome {
    Survived,
    /// Voted out.
    Eliminated,
    /// Killed at night.
    Killed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub seat: usize,
    pub persona_id: String,
    pub name: String,
    pub role: Role,
    pub outcome: PlayerOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub seed: Option<u64>,
    pub player_count: usize,
}

/// One game, start to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameLog {
    pub schema_version: String,
    pub game_id: Uuid,
    pub timestamp_start: DateTime<Utc>,
    /// `None` while the game is unfinished.
    pub timestamp_end: Option<DateTime<Utc>>,
    pub winner: Option<Team>,
    pub players: Vec<PlayerEntry>,
    pub events: Vec<Event>,
    pub metadata: GameMetadata,
    #[serde(default)]
    pub transcript: Vec<DayRound>,
    #[serde(default)]
    pub result: Option<GameResult>,
}

impl GameLog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        game_id: Uuid,
        timestamp_start: DateTime<Utc>,
        timestamp_end: Option<DateTime<Utc>>,
        players: Vec<PlayerEntry>,
        events: Vec<Event>,
        metadata: GameMetadata,
        transcript: Vec<DayRound>,
        result: Option<GameResult>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            game_id,
            timestamp_start,
            timestamp_end,
            winner: result.as_ref().map(|r| r.winner),
            players,
            events,
            metadata,
            transcript,
            result,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.winner.is_some()
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, LogError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a log, rejecting other schema versions.
    pub fn from_json(content: &str) -> Result<Self, LogError> {
        let log: Self = serde_json::from_str(content)?;
        if log.schema_version != SCHEMA_VERSION {
            return Err(LogError::VersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: log.schema_version,
            });
        }
        Ok(log)
    }

    pub fn player(&self, name: &str) -> Option<&PlayerEntry> {
        self.players.iter().find(|p| p.name == name)
    }
}
