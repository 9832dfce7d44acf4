//! Mafia game engine for AI-controlled seats.
//!
//! This crate provides:
//! - Authoritative game state, phase transitions and win checks
//! - Day discussion and voting with a one-shot revote on ties
//! - The two-round mafia kill protocol, doctor protection and investigations
//! - A windowed transcript and an event log with public and private views
//! - Per-seat agents that validate, retry and fall back to safe defaults
//!
//! Provider clients and prompt text live outside the crate, behind the
//! [`Provider`] and [`PromptBuilder`] traits.
//!
//! # Quick Start
//!
//! ```ignore
//! use mafia_core::{GameConfig, GameRunner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GameConfig::new(names).with_seed(7);
//!     let mut runner = GameRunner::new(config, Arc::new(my_provider), Arc::new(my_prompts))?;
//!
//!     let result = runner.run().await?;
//!     println!("{} wins after {} rounds", result.winner, result.rounds);
//!
//!     let log = runner.game_log().to_json()?;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod agent;
pub mod events;
pub mod game;
pub mod memory;
pub mod persist;
pub mod phases;
pub mod prompt;
pub mod provider;
pub mod state;
pub mod testing;
pub mod transcript;
pub mod voting;

// Primary public API
pub use actions::{Action, ActionOutput, ActionType, ActionValidator, ValidationError};
pub use agent::{AgentResponse, PlayerAgent};
pub use events::{Event, EventLog, EventType};
pub use game::{Elimination, EliminationKind, GameConfig, GameError, GameResult, GameRunner};
pub use memory::PlayerMemory;
pub use persist::{GameLog, LogError};
pub use prompt::{ActionContext, Persona, PromptBuilder, PromptRequest};
pub use provider::{Provider, ProviderError, ProviderResult};
pub use state::{GameState, GameStateManager, Phase, Role, StateError, Team};
pub use transcript::{TranscriptEntry, TranscriptManager};
pub use voting::{Ballot, VoteOutcome, VoteResolver, VoteResult};
