//! Testing utilities for the Mafia engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedProvider` for deterministic games without a model behind them
//! - `TaggedPromptBuilder` whose prompts tests can parse back with `PromptTags`
//! - Response builders and assertion helpers

use crate::actions::ActionType;
use crate::events::{EventLog, EventType};
use crate::prompt::{PromptBuilder, PromptRequest};
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::state::{GameStateManager, Role, SKIP};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Ten names for a full table.
pub fn roster() -> Vec<&'static str> {
    vec![
        "Alice", "Bob", "Charlie", "Diana", "Eve", "Frank", "Grace", "Heidi", "Ivan", "Judy",
    ]
}

/// A fixed seating that satisfies the role template.
///
/// Mafia sit at seats 0, 3 and 7; Charlie is the detective and Frank the
/// doctor.
pub fn standard_seating() -> Vec<(&'static str, Role)> {
    vec![
        ("Alice", Role::Mafia),
        ("Bob", Role::Town),
        ("Charlie", Role::Detective),
        ("Diana", Role::Mafia),
        ("Eve", Role::Town),
        ("Frank", Role::Doctor),
        ("Grace", Role::Town),
        ("Heidi", Role::Mafia),
        ("Ivan", Role::Town),
        ("Judy", Role::Town),
    ]
}

// ============================================================================
// Prompts
// ============================================================================

/// Writes one `key: value` line per request field.
///
/// The output is meant for machines: [`PromptTags::parse`] reads it back.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedPromptBuilder;

impl PromptBuilder for TaggedPromptBuilder {
    fn build(&self, request: &PromptRequest<'_>) -> String {
        let context = serde_json::to_string(request.context.values()).unwrap_or_default();
        let memory = serde_json::to_string(request.memory).unwrap_or_default();
        let transcript: Vec<String> = request
            .transcript
            .iter()
            .map(|entry| {
                let detail = if entry.is_full() { "full" } else { "compressed" };
                format!("{}:{}", entry.round_number(), detail)
            })
            .collect();

        [
            format!("player: {}", request.player),
            format!("seat: {}", request.seat),
            format!("role: {}", request.role),
            format!("persona: {}", request.persona.id),
            format!("action: {}", request.action_type),
            format!("phase: {}", request.state.phase),
            format!("round: {}", request.state.round_number),
            format!("living: {}", request.state.living_players.join(",")),
            format!("nominated: {}", request.state.nominated_players.join(",")),
            format!("transcript: {}", transcript.join(",")),
            format!("memory: {memory}"),
            format!("context: {context}"),
        ]
        .join("\n")
    }
}

/// The header of a prompt produced by [`TaggedPromptBuilder`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptTags {
    pub player: String,
    pub seat: usize,
    pub role: String,
    pub persona: String,
    pub action: String,
    pub phase: String,
    pub round: u32,
    pub living: Vec<String>,
    pub nominated: Vec<String>,
    /// `round:detail` per transcript entry.
    pub transcript: Vec<String>,
    pub memory: Value,
    pub context: Value,
}

impl PromptTags {
    /// Parse the tagged header. Unknown lines, such as a retry error
    /// suffix, are ignored.
    pub fn parse(prompt: &str) -> Self {
        let list = |value: &str| -> Vec<String> {
            value
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut tags = PromptTags::default();
        for line in prompt.lines() {
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            match key {
                "player" => tags.player = value.to_string(),
                "seat" => tags.seat = value.parse().unwrap_or_default(),
                "role" => tags.role = value.to_string(),
                "persona" => tags.persona = value.to_string(),
                "action" => tags.action = value.to_string(),
                "phase" => tags.phase = value.to_string(),
                "round" => tags.round = value.parse().unwrap_or_default(),
                "living" => tags.living = list(value),
                "nominated" => tags.nominated = list(value),
                "transcript" => tags.transcript = list(value),
                "memory" => tags.memory = serde_json::from_str(value).unwrap_or_default(),
                "context" => tags.context = serde_json::from_str(value).unwrap_or_default(),
                _ => {}
            }
        }
        tags
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// Names listed under a context key holding an array of strings.
    pub fn context_names(&self, key: &str) -> Vec<String> {
        self.context
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_night_zero(&self) -> bool {
        self.context.get("night_zero").and_then(Value::as_bool).unwrap_or(false)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub action_type: ActionType,
    pub prompt: String,
}

impl ScriptedCall {
    pub fn tags(&self) -> PromptTags {
        PromptTags::parse(&self.prompt)
    }
}

type Script = dyn Fn(ActionType, &str) -> ProviderResult<Value> + Send + Sync;

/// A provider driven by a closure. Every call is recorded.
pub struct ScriptedProvider {
    script: Box<Script>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(ActionType, &str) -> ProviderResult<Value> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script over the parsed prompt header.
    pub fn tagged<F>(script: F) -> Self
    where
        F: Fn(ActionType, &PromptTags) -> ProviderResult<Value> + Send + Sync + 'static,
    {
        Self::new(move |action, prompt| script(action, &PromptTags::parse(prompt)))
    }

    /// Always fails with a transport error.
    pub fn failing() -> Self {
        Self::new(|_, _| Err(ProviderError::Transport("connection refused".to_string())))
    }

    /// Plays legally and predictably: nominates, votes and kills the first
    /// eligible name in the living list, protects itself.
    pub fn sensible() -> Self {
        Self::tagged(|action, tags| Ok(sensible_answer(action, tags)))
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Recorded calls of one action type.
    pub fn calls_of(&self, action_type: ActionType) -> Vec<ScriptedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.action_type == action_type)
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn act(&self, action_type: ActionType, prompt: &str) -> ProviderResult<Value> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ScriptedCall {
                action_type,
                prompt: prompt.to_string(),
            });
        }
        (self.script)(action_type, prompt)
    }
}

/// The answer [`ScriptedProvider::sensible`] gives.
pub fn sensible_answer(action: ActionType, tags: &PromptTags) -> Value {
    let partners = tags.context_names("partners");
    let first_other = |exclude_partners: bool| {
        tags.living
            .iter()
            .find(|p| **p != tags.player && !(exclude_partners && partners.contains(p)))
            .cloned()
            .unwrap_or_else(|| SKIP.to_string())
    };

    match action {
        ActionType::Speak if tags.is_night_zero() => {
            speak(format!("{} suggests we stay quiet on day one.", tags.player), "")
        }
        ActionType::Speak => {
            let nominee = first_other(false);
            speak(format!("I have doubts about {nominee} so far."), &nominee)
        }
        ActionType::Vote => {
            let choice = tags
                .nominated
                .iter()
                .find(|p| **p != tags.player)
                .cloned()
                .unwrap_or_else(|| SKIP.to_string());
            vote(&choice)
        }
        ActionType::NightKill => target(&first_other(true)),
        ActionType::Investigation => target(&first_other(false)),
        ActionType::DoctorProtect => target(&tags.player),
        ActionType::Defense => text(format!("{} is not the one you want.", tags.player)),
        ActionType::LastWords => text("Remember how the votes fell."),
    }
}

// ============================================================================
// Response builders
// ============================================================================

pub fn speak(speech: impl Into<String>, nomination: &str) -> Value {
    json!({ "speech": speech.into(), "nomination": nomination })
}

pub fn vote(choice: &str) -> Value {
    json!({ "vote": choice })
}

pub fn target(name: &str) -> Value {
    json!({ "target": name })
}

pub fn text(content: impl Into<String>) -> Value {
    json!({ "text": content.into() })
}

// ============================================================================
// Assertion helpers
// ============================================================================

/// Assert the seating matches the role template.
#[track_caller]
pub fn assert_role_counts(
    state: &GameStateManager,
    mafia: usize,
    doctor: usize,
    detective: usize,
    town: usize,
) {
    let count = |role| state.players_with_role(role).len();
    assert_eq!(count(Role::Mafia), mafia, "mafia count");
    assert_eq!(count(Role::Doctor), doctor, "doctor count");
    assert_eq!(count(Role::Detective), detective, "detective count");
    assert_eq!(count(Role::Town), town, "town count");
}

/// Assert the public view hides every private key and never shows
/// investigations.
#[track_caller]
pub fn assert_public_view_clean(log: &EventLog) {
    let public = log.public_view(0);
    assert!(
        public.iter().all(|e| e.event_type != EventType::Investigation),
        "investigation leaked into the public view"
    );

    let mut public_iter = public.iter();
    for event in log.full_view() {
        if event.event_type.always_private() || event.fully_private() {
            continue;
        }
        let shown = public_iter.next().expect("public view is missing an event");
        for key in &event.private_fields {
            assert!(
                !shown.data.contains_key(key),
                "private field '{key}' of {} leaked",
                event.event_type
            );
        }
    }
    assert!(public_iter.next().is_none(), "public view has extra events");
}

/// Assert the player is dead.
#[track_caller]
pub fn assert_dead(state: &GameStateManager, name: &str) {
    assert!(!state.is_alive(name), "expected {name} to be dead");
}

/// Assert the player is alive.
#[track_caller]
pub fn assert_alive(state: &GameStateManager, name: &str) {
    assert!(state.is_alive(name), "expected {name} to be alive");
}
