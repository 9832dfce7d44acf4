//! Prompt assembly seam.
//!
//! The engine never formats prompt text itself. It gathers everything a seat
//! may see into a [`PromptRequest`] and hands it to a [`PromptBuilder`].

use crate::actions::ActionType;
use crate::memory::PlayerMemory;
use crate::state::{GameState, Role};
use crate::transcript::TranscriptEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity a seat plays as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Reference recorded in the game log.
    pub id: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

impl Persona {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            background: String::new(),
            traits: Vec::new(),
        }
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }

    pub fn with_traits<I, S>(mut self, traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.traits = traits.into_iter().map(Into::into).collect();
        self
    }
}

/// Extra, action-specific information for one call: partners, speaking
/// position, coordination proposals, recent events and so on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionContext {
    values: Map<String, Value>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a night-zero strategy speech.
    pub fn night_zero() -> Self {
        Self::new().with("night_zero", true)
    }

    /// Set `key`, replacing any earlier value.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values.insert(key.to_string(), value);
    }

    /// Fold `other` in; its keys win.
    pub fn merge(mut self, other: ActionContext) -> Self {
        self.values.extend(other.values);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_night_zero(&self) -> bool {
        self.get("night_zero").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Everything a prompt may draw on for one seat and one action.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub player: &'a str,
    pub seat: usize,
    pub role: Role,
    pub persona: &'a Persona,
    pub state: &'a GameState,
    pub transcript: &'a [TranscriptEntry],
    pub memory: &'a PlayerMemory,
    pub action_type: ActionType,
    pub context: &'a ActionContext,
}

/// Turns a [`PromptRequest`] into prompt text.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, request: &PromptRequest<'_>) -> String;
}

impl<F> PromptBuilder for F
where
    F: Fn(&PromptRequest<'_>) -> String + Send + Sync,
{
    fn build(&self, request: &PromptRequest<'_>) -> String {
        self(request)
    }
}
