//! One seat at the table: persona, role and the decision loop.
//!
//! Each call builds a prompt, asks the provider, validates the answer and
//! retries with the validation error appended. A provider that gives up
//! (transport failure, its own retries exhausted, timeout) ends the loop
//! at once. Whatever happens the agent returns a legal action, falling back
//! to the validator's default.

use crate::actions::{Action, ActionOutput, ActionScope, ActionType, ActionValidator};
use crate::memory::{LastAction, PlayerMemory};
use crate::prompt::{ActionContext, Persona, PromptBuilder, PromptRequest};
use crate::provider::{act_within, Provider};
use crate::state::{GameState, Role};
use crate::transcript::TranscriptEntry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts per decision before falling back to the default.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What an agent call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub output: ActionOutput,
    /// The caller's memory with this call's beliefs and action folded in.
    pub memory: PlayerMemory,
    /// True when the output is the validator's default.
    pub fell_back: bool,
}

/// An AI-controlled seat.
pub struct PlayerAgent {
    name: String,
    seat: usize,
    role: Role,
    persona: Persona,
    partners: Vec<String>,
    provider: Arc<dyn Provider>,
    prompts: Arc<dyn PromptBuilder>,
    validator: ActionValidator,
    rng: StdRng,
    max_attempts: u32,
    timeout: Option<Duration>,
}

impl fmt::Debug for PlayerAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerAgent")
            .field("name", &self.name)
            .field("seat", &self.seat)
            .field("role", &self.role)
            .field("persona", &self.persona.id)
            .field("partners", &self.partners)
            .finish_non_exhaustive()
    }
}

impl PlayerAgent {
    pub fn new(
        name: impl Into<String>,
        seat: usize,
        role: Role,
        persona: Persona,
        provider: Arc<dyn Provider>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Self {
        Self {
            name: name.into(),
            seat,
            role,
            persona,
            partners: Vec::new(),
            provider,
            prompts,
            validator: ActionValidator::new(),
            rng: StdRng::from_entropy(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: None,
        }
    }

    /// Set the other mafia members, in seat order.
    pub fn with_partners(mut self, partners: Vec<String>) -> Self {
        self.partners = partners;
        self
    }

    /// Seed the generator used for fallback picks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seat(&self) -> usize {
        self.seat
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn partners(&self) -> &[String] {
        &self.partners
    }

    /// Every mafia name this seat knows, itself included. Empty for town.
    pub fn mafia_names(&self) -> Vec<String> {
        if !self.role.is_mafia() {
            return Vec::new();
        }
        std::iter::once(self.name.clone())
            .chain(self.partners.iter().cloned())
            .collect()
    }

    /// Decide one action.
    ///
    /// `memory` is never modified; the updated copy comes back in the
    /// response.
    pub async fn act(
        &mut self,
        state: &GameState,
        transcript: &[TranscriptEntry],
        memory: &PlayerMemory,
        action_type: ActionType,
        context: ActionContext,
    ) -> AgentResponse {
        let context = self.role_context(memory).merge(context);
        let mafia_names = self.mafia_names();
        let player = self.name.clone();
        let scope = ActionScope {
            state,
            player: &player,
            mafia_names: &mafia_names,
            night_zero: context.is_night_zero(),
        };

        let prompt = self.prompts.build(&PromptRequest {
            player: &player,
            seat: self.seat,
            role: self.role,
            persona: &self.persona,
            state,
            transcript,
            memory,
            action_type,
            context: &context,
        });

        let (output, fell_back) = match self.attempt(&prompt, action_type, scope).await {
            Some(output) => (output, false),
            None => (self.validator.default_output(action_type, scope, &mut self.rng), true),
        };

        AgentResponse {
            memory: remember(memory, &output),
            output,
            fell_back,
        }
    }

    /// The validate-retry loop. `None` means use the default.
    async fn attempt(
        &self,
        prompt: &str,
        action_type: ActionType,
        scope: ActionScope<'_>,
    ) -> Option<ActionOutput> {
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let prompt = match &last_error {
                Some(error) => format!(
                    "{prompt}\n\n[ERROR] Your previous response was invalid: {error}. \
                     Please try again and ensure your output is valid."
                ),
                None => prompt.to_string(),
            };

            match act_within(self.provider.as_ref(), action_type, &prompt, self.timeout).await {
                Ok(raw) => match self.validator.validate(&raw, action_type, scope) {
                    Ok(output) => return Some(output),
                    Err(e) => {
                        debug!(
                            player = %self.name,
                            action = %action_type,
                            attempt,
                            error = %e,
                            "Rejected agent output"
                        );
                        last_error = Some(e.to_string());
                    }
                },
                Err(e) if e.is_retryable() => {
                    debug!(
                        player = %self.name,
                        action = %action_type,
                        attempt,
                        error = %e,
                        "Provider returned an invalid response"
                    );
                    last_error = Some(e.to_string());
                }
                Err(e) => {
                    warn!(
                        player = %self.name,
                        action = %action_type,
                        error = %e,
                        "Provider failed; using default action"
                    );
                    return None;
                }
            }
        }

        warn!(
            player = %self.name,
            action = %action_type,
            attempts = self.max_attempts,
            error = last_error.as_deref().unwrap_or(""),
            "No valid output; using default action"
        );
        None
    }

    /// Context every call of this seat carries.
    fn role_context(&self, memory: &PlayerMemory) -> ActionContext {
        match self.role {
            Role::Mafia => ActionContext::new().with("partners", &self.partners),
            Role::Detective => {
                let results: Vec<Value> = memory
                    .investigation_results()
                    .into_iter()
                    .map(|(target, result)| json!({ "target": target, "result": result }))
                    .collect();
                ActionContext::new().with("investigation_results", results)
            }
            Role::Doctor | Role::Town => ActionContext::new(),
        }
    }
}

/// Fold declared belief fields and the action taken into a copy of `memory`.
fn remember(memory: &PlayerMemory, output: &ActionOutput) -> PlayerMemory {
    let mut next = memory.clone();

    let suspicions = output
        .field("suspicions")
        .or_else(|| output.field("suspicion_updates"))
        .and_then(Value::as_object);
    if let Some(map) = suspicions.filter(|m| !m.is_empty()) {
        let suspicions: BTreeMap<String, String> = map
            .iter()
            .map(|(name, note)| {
                let note = match note {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), note)
            })
            .collect();
        next = next.with_suspicions(suspicions);
    }

    let strategy = output
        .field("strategy")
        .or_else(|| output.field("current_goal"))
        .and_then(Value::as_str);
    if let Some(strategy) = strategy {
        next = next.with_strategy(strategy);
    }

    let last = match &output.action {
        Action::Speak { speech, nomination } => Some(LastAction::Speak {
            speech: speech.clone(),
            nomination: nomination.clone(),
        }),
        Action::Vote { vote } => Some(LastAction::Vote(vote.clone())),
        Action::NightKill { target, .. } => Some(LastAction::NightKill(target.clone())),
        Action::Investigation { target } => Some(LastAction::Investigation(target.clone())),
        Action::DoctorProtect { target } => Some(LastAction::DoctorProtect(target.clone())),
        Action::Defense { .. } | Action::LastWords { .. } => None,
    };
    match last {
        Some(action) => next.with_last_action(action),
        None => next,
    }
}
