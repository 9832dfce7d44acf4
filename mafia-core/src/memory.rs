//! Per-seat memory.
//!
//! Memory is a plain value: the engine hands a seat its current memory,
//! gets a changed copy back and stores that. Nothing mutates a memory that
//! someone else still holds.

use crate::state::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What a seat has observed and what it currently believes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMemory {
    pub facts: Facts,
    pub beliefs: Beliefs,
}

/// Things the engine told this seat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facts {
    /// Mafia only: every partner's night-zero plan, in seat order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub night_zero_strategies: Vec<Strategy>,
    /// Mafia only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kills: Vec<KillRecord>,
    /// Doctor only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protections: Vec<ProtectionRecord>,
    /// Detective only. Never shared with anyone else.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub investigations: Vec<InvestigationRecord>,
    #[serde(default)]
    pub last_actions: LastActions,
}

/// What this seat has concluded on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beliefs {
    /// Player name to a free-form note.
    #[serde(default)]
    pub suspicions: BTreeMap<String, String>,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestigationResult {
    Mafia,
    #[serde(rename = "Not Mafia")]
    NotMafia,
}

impl InvestigationResult {
    pub fn for_role(role: Role) -> Self {
        if role.is_mafia() {
            InvestigationResult::Mafia
        } else {
            InvestigationResult::NotMafia
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationResult::Mafia => "Mafia",
            InvestigationResult::NotMafia => "Not Mafia",
        }
    }
}

impl fmt::Display for InvestigationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationRecord {
    pub target: String,
    pub result: InvestigationResult,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillOutcome {
    Killed,
    /// The doctor protected the target.
    Blocked,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRecord {
    /// `None` when the mafia skipped.
    pub target: Option<String>,
    pub outcome: KillOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRecord {
    pub target: String,
    pub reasoning: String,
}

/// The most recent action of each kind this seat took.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastActions {
    pub speak: Option<SpokenTurn>,
    pub vote: Option<String>,
    pub night_kill: Option<String>,
    pub investigation: Option<String>,
    pub doctor_protect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpokenTurn {
    pub speech: String,
    pub nomination: String,
}

/// One action to record in [`LastActions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastAction {
    Speak { speech: String, nomination: String },
    Vote(String),
    NightKill(String),
    Investigation(String),
    DoctorProtect(String),
}

impl PlayerMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategies(&self, strategies: Vec<Strategy>) -> Self {
        let mut next = self.clone();
        next.facts.night_zero_strategies = strategies;
        next
    }

    pub fn with_kill(&self, record: KillRecord) -> Self {
        let mut next = self.clone();
        next.facts.kills.push(record);
        next
    }

    pub fn with_protection(&self, record: ProtectionRecord) -> Self {
        let mut next = self.clone();
        next.facts.protections.push(record);
        next
    }

    pub fn with_investigation(&self, record: InvestigationRecord) -> Self {
        let mut next = self.clone();
        next.facts.investigations.push(record);
        next
    }

    pub fn with_last_action(&self, action: LastAction) -> Self {
        let mut next = self.clone();
        let last = &mut next.facts.last_actions;
        match action {
            LastAction::Speak { speech, nomination } => {
                last.speak = Some(SpokenTurn { speech, nomination })
            }
            LastAction::Vote(target) => last.vote = Some(target),
            LastAction::NightKill(target) => last.night_kill = Some(target),
            LastAction::Investigation(target) => last.investigation = Some(target),
            LastAction::DoctorProtect(target) => last.doctor_protect = Some(target),
        }
        next
    }

    /// Replace the suspicion map.
    pub fn with_suspicions(&self, suspicions: BTreeMap<String, String>) -> Self {
        let mut next = self.clone();
        next.beliefs.suspicions = suspicions;
        next
    }

    pub fn with_strategy(&self, strategy: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.beliefs.strategy = Some(strategy.into());
        next
    }

    pub fn last_kill(&self) -> Option<&KillRecord> {
        self.facts.kills.last()
    }

    pub fn last_protection(&self) -> Option<&ProtectionRecord> {
        self.facts.protections.last()
    }

    pub fn last_investigation(&self) -> Option<&InvestigationRecord> {
        self.facts.investigations.last()
    }

    /// `(target, result)` for every investigation so far.
    pub fn investigation_results(&self) -> Vec<(String, InvestigationResult)> {
        self.facts
            .investigations
            .iter()
            .map(|r| (r.target.clone(), r.result))
            .collect()
    }
}
