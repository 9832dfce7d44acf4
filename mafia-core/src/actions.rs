//! Agent actions: validation of raw provider output and safe defaults.

use crate::state::{GameState, SKIP};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Shortest speech, in characters after trimming, that counts as a speech.
pub const MIN_SPEECH_LEN: usize = 10;

/// Kinds of decision an agent can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Speak,
    Vote,
    Defense,
    LastWords,
    NightKill,
    Investigation,
    DoctorProtect,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Speak => "speak",
            ActionType::Vote => "vote",
            ActionType::Defense => "defense",
            ActionType::LastWords => "last_words",
            ActionType::NightKill => "night_kill",
            ActionType::Investigation => "investigation",
            ActionType::DoctorProtect => "doctor_protect",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an agent's output was rejected.
///
/// The message is written for the agent: it is appended to the next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Response must be a JSON object")]
    NotAnObject,

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Speech is too short or empty")]
    SpeechTooShort,

    #[error("Nomination 'skip' is only allowed on Day 1")]
    SkipNotAllowed,

    #[error("Invalid nomination '{nomination}'. Must be one of: {}", .options.join(", "))]
    InvalidNomination { nomination: String, options: Vec<String> },

    #[error("Invalid vote '{vote}'. Must be one of: {}", .options.join(", "))]
    InvalidVote { vote: String, options: Vec<String> },

    #[error("Invalid target '{target}'. Must be one of: {}", .options.join(", "))]
    InvalidTarget { target: String, options: Vec<String> },

    #[error("Invalid target '{0}'. Cannot target Mafia members")]
    MafiaTarget(String),

    #[error("Cannot investigate yourself")]
    SelfInvestigation,
}

/// A validated decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Speak { speech: String, nomination: String },
    Vote { vote: String },
    Defense { text: String },
    LastWords { text: String },
    NightKill { target: String, message: String },
    Investigation { target: String },
    DoctorProtect { target: String },
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::Speak { .. } => ActionType::Speak,
            Action::Vote { .. } => ActionType::Vote,
            Action::Defense { .. } => ActionType::Defense,
            Action::LastWords { .. } => ActionType::LastWords,
            Action::NightKill { .. } => ActionType::NightKill,
            Action::Investigation { .. } => ActionType::Investigation,
            Action::DoctorProtect { .. } => ActionType::DoctorProtect,
        }
    }
}

/// A validated action plus the full output it came from.
///
/// `raw` keeps the agent's reasoning fields; its decision fields are
/// normalized to match `action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutput {
    pub action: Action,
    pub raw: Value,
}

impl ActionOutput {
    fn new(action: Action, raw: Value) -> Self {
        Self { action, raw }
    }

    /// The named player or "skip" this action points at, if it has one.
    pub fn target(&self) -> Option<&str> {
        match &self.action {
            Action::Speak { nomination, .. } => Some(nomination),
            Action::Vote { vote } => Some(vote),
            Action::NightKill { target, .. }
            | Action::Investigation { target }
            | Action::DoctorProtect { target } => Some(target),
            Action::Defense { .. } | Action::LastWords { .. } => None,
        }
    }

    /// The spoken text of a speech, defense or last words.
    pub fn text(&self) -> &str {
        match &self.action {
            Action::Speak { speech, .. } => speech,
            Action::Defense { text } | Action::LastWords { text } => text,
            Action::NightKill { message, .. } => message,
            _ => "",
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }
}

/// Who is acting and under which rules.
#[derive(Debug, Clone, Copy)]
pub struct ActionScope<'a> {
    pub state: &'a GameState,
    pub player: &'a str,
    /// Every mafia-aligned name, when the actor is mafia.
    pub mafia_names: &'a [String],
    /// Night-zero speeches carry no nomination.
    pub night_zero: bool,
}

/// Checks agent output against the rules and supplies safe defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionValidator;

impl ActionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate and normalize raw provider output.
    pub fn validate(
        &self,
        output: &Value,
        action_type: ActionType,
        scope: ActionScope<'_>,
    ) -> Result<ActionOutput, ValidationError> {
        let fields = output.as_object().ok_or(ValidationError::NotAnObject)?;
        let text_of = |key: &str| fields.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        let state = scope.state;

        let (action, normalized) = match action_type {
            ActionType::Speak => {
                let speech = text_of("speech");
                if speech.trim().chars().count() < MIN_SPEECH_LEN {
                    return Err(ValidationError::SpeechTooShort);
                }
                let nomination = if scope.night_zero {
                    text_of("nomination")
                } else {
                    self.check_nomination(&text_of("nomination"), state)?
                };
                (
                    Action::Speak {
                        speech,
                        nomination: nomination.clone(),
                    },
                    Some(("nomination", nomination)),
                )
            }
            ActionType::Vote => {
                let vote = text_of("vote");
                let mut options = state.nominated_players.clone();
                options.push(SKIP.to_string());
                let vote = canonical(&vote, &options).ok_or_else(|| ValidationError::InvalidVote {
                    vote: vote.clone(),
                    options,
                })?;
                (Action::Vote { vote: vote.clone() }, Some(("vote", vote)))
            }
            ActionType::NightKill => {
                let target = required(fields, "target")?;
                let target = if target.trim().eq_ignore_ascii_case(SKIP) {
                    SKIP.to_string()
                } else {
                    let living = canonical(&target, &state.living_players).ok_or_else(|| {
                        let mut options = state.living_players.clone();
                        options.push(SKIP.to_string());
                        ValidationError::InvalidTarget {
                            target: target.clone(),
                            options,
                        }
                    })?;
                    if scope.mafia_names.contains(&living) {
                        return Err(ValidationError::MafiaTarget(living));
                    }
                    living
                };
                (
                    Action::NightKill {
                        target: target.clone(),
                        message: text_of("message"),
                    },
                    Some(("target", target)),
                )
            }
            ActionType::Investigation => {
                let target = required(fields, "target")?;
                let target = canonical(&target, &state.living_players).ok_or_else(|| {
                    ValidationError::InvalidTarget {
                        target: target.clone(),
                        options: state.living_players.clone(),
                    }
                })?;
                if target == scope.player {
                    return Err(ValidationError::SelfInvestigation);
                }
                (
                    Action::Investigation {
                        target: target.clone(),
                    },
                    Some(("target", target)),
                )
            }
            // The night phase decides whether a protection target counts;
            // an unknown name is passed through as written.
            ActionType::DoctorProtect => {
                let target = text_of("target");
                let target = canonical(&target, &state.living_players).unwrap_or(target);
                (
                    Action::DoctorProtect {
                        target: target.clone(),
                    },
                    Some(("target", target)),
                )
            }
            ActionType::Defense => (Action::Defense { text: text_of("text") }, None),
            ActionType::LastWords => (Action::LastWords { text: text_of("text") }, None),
        };

        let mut raw = output.clone();
        if let (Some((key, value)), Some(map)) = (normalized, raw.as_object_mut()) {
            map.insert(key.to_string(), Value::String(value));
        }
        Ok(ActionOutput::new(action, raw))
    }

    fn check_nomination(
        &self,
        nomination: &str,
        state: &GameState,
    ) -> Result<String, ValidationError> {
        let first_day = state.is_first_day();

        if nomination.trim().eq_ignore_ascii_case(SKIP) {
            return if first_day {
                Ok(SKIP.to_string())
            } else {
                Err(ValidationError::SkipNotAllowed)
            };
        }

        canonical(nomination, &state.living_players).ok_or_else(|| {
            let mut options = state.living_players.clone();
            if first_day {
                options.push(SKIP.to_string());
            }
            ValidationError::InvalidNomination {
                nomination: nomination.to_string(),
                options,
            }
        })
    }

    /// A structurally valid fallback for `action_type`.
    ///
    /// Targets are drawn at random from the currently legal ones, never the
    /// actor and, for a night kill, never a mafia member. Falls back to
    /// "skip" when nothing is legal.
    pub fn default_output<R: Rng + ?Sized>(
        &self,
        action_type: ActionType,
        scope: ActionScope<'_>,
        rng: &mut R,
    ) -> ActionOutput {
        let others: Vec<String> = scope
            .state
            .living_players
            .iter()
            .filter(|p| p.as_str() != scope.player)
            .cloned()
            .collect();
        let pick = |pool: &[String], rng: &mut R| {
            pool.choose(rng).cloned().unwrap_or_else(|| SKIP.to_string())
        };

        match action_type {
            ActionType::Speak => {
                let speech = "I need more time to think about this situation. \
                              Let's hear from everyone before making judgments."
                    .to_string();
                let nomination = if scope.night_zero {
                    String::new()
                } else if scope.state.is_first_day() && others.is_empty() {
                    SKIP.to_string()
                } else {
                    pick(&others, rng)
                };
                let raw = json!({
                    "current_goal": "survive",
                    "reasoning": "Unable to process situation clearly.",
                    "speech": speech,
                    "nomination": nomination,
                });
                ActionOutput::new(Action::Speak { speech, nomination }, raw)
            }
            ActionType::Vote => {
                let raw = json!({
                    "current_goal": "avoid mistakes",
                    "reasoning": "Not confident enough to vote.",
                    "vote": SKIP,
                });
                ActionOutput::new(Action::Vote { vote: SKIP.to_string() }, raw)
            }
            ActionType::NightKill => {
                let pool: Vec<String> = others
                    .into_iter()
                    .filter(|p| !scope.mafia_names.contains(p))
                    .collect();
                let target = pick(&pool, rng);
                let raw = json!({
                    "current_goal": "eliminate threats",
                    "reasoning": "Random selection due to uncertainty.",
                    "target": target,
                    "message": "",
                });
                ActionOutput::new(
                    Action::NightKill {
                        target,
                        message: String::new(),
                    },
                    raw,
                )
            }
            ActionType::Investigation => {
                let target = pick(&others, rng);
                let raw = json!({
                    "current_goal": "find Mafia",
                    "reasoning": "No strong lead, investigating randomly.",
                    "target": target,
                });
                ActionOutput::new(Action::Investigation { target }, raw)
            }
            ActionType::DoctorProtect => {
                let target = pick(&scope.state.living_players, rng);
                let raw = json!({
                    "reasoning": "No clear threat, protecting at random.",
                    "target": target,
                });
                ActionOutput::new(Action::DoctorProtect { target }, raw)
            }
            ActionType::Defense => {
                let text = "I am not Mafia. Please reconsider.".to_string();
                let raw = json!({ "text": text });
                ActionOutput::new(Action::Defense { text }, raw)
            }
            ActionType::LastWords => {
                let text = "Good luck to the remaining players.".to_string();
                let raw = json!({ "text": text });
                ActionOutput::new(Action::LastWords { text }, raw)
            }
        }
    }
}

fn required(
    fields: &serde_json::Map<String, Value>,
    key: &'static str,
) -> Result<String, ValidationError> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ValidationError::MissingField(key))
}

/// Case-insensitive match of `input` against `options`, returning the
/// option's own spelling.
fn canonical(input: &str, options: &[String]) -> Option<String> {
    let needle = input.trim().to_lowercase();
    options.iter().find(|o| o.to_lowercase() == needle).cloned()
}
