use super::Table;
use crate::actions::{ActionOutput, ActionType};
use crate::events::Scene;
use crate::game::GameError;
use crate::memory::{
    InvestigationRecord, InvestigationResult, KillOutcome, KillRecord, ProtectionRecord,
};
use crate::prompt::ActionContext;
use crate::state::{GameState, Role, SKIP};
use crate::transcript::TranscriptEntry;
use serde_json::{json, Value};
use tracing::{debug, info};

/// What the mafia settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillDecision {
    /// `None` when the mafia skipped or nobody was left to decide.
    pub target: Option<String>,
    /// 1 when round one reached a majority, otherwise 2.
    pub coordination_rounds: u8,
    /// Set when the lowest seat broke a round-two deadlock.
    pub decided_by: Option<String>,
    /// The proposals of the deciding round, in seat order.
    pub proposals: Vec<(String, String)>,
}

/// How a night ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightOutcome {
    pub intended: Option<String>,
    pub protected: Option<String>,
    pub killed: Option<String>,
    pub investigation: Option<InvestigationRecord>,
}

impl NightOutcome {
    pub fn blocked(&self) -> bool {
        self.intended.is_some() && self.intended == self.protected
    }
}

/// Night: kill coordination, protection, investigation, then resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NightPhase;

impl NightPhase {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, table: &mut Table) -> Result<NightOutcome, GameError> {
        let round = table.state.round_number();
        let before = table.state.public_state();
        table.events.phase_start(Scene::new(&before, "phase_start"));
        let transcript = table.transcript.transcript_for_player(round, false);

        let decision = self.coordinate_kill(table, &before, &transcript).await?;
        let protected = self.protect(table, &before, &transcript).await?;
        let investigation = self.investigate(table, &before, &transcript).await?;

        let intended = decision.target;
        let blocked = intended.is_some() && protected == intended;
        let killed = if blocked { None } else { intended.clone() };

        let after = table.state.snapshot_after_kill(killed.as_deref());
        table.events.night_resolution(
            Scene::new(&before, "resolution"),
            intended.as_deref(),
            blocked,
            killed.as_deref(),
            &after,
        );
        if let Some(victim) = &killed {
            table.state.kill_player(victim)?;
        }

        let outcome = match (&intended, blocked) {
            (None, _) => KillOutcome::Skipped,
            (Some(_), true) => KillOutcome::Blocked,
            (Some(_), false) => KillOutcome::Killed,
        };
        for name in table.living_with_role(Role::Mafia) {
            let record = KillRecord {
                target: intended.clone(),
                outcome,
            };
            table.remember(&name, |memory| memory.with_kill(record));
        }

        info!(
            round,
            intended = intended.as_deref().unwrap_or("none"),
            killed = killed.as_deref().unwrap_or("none"),
            blocked,
            "Night resolved"
        );

        Ok(NightOutcome {
            intended,
            protected,
            killed,
            investigation,
        })
    }

    /// The two-round mafia protocol.
    ///
    /// Round one is sequential and each seat sees the proposals before it.
    /// A strict majority ends it. Otherwise every seat proposes again having
    /// seen all of round one; a strict majority wins, else the lowest seat's
    /// round-two proposal stands.
    pub async fn coordinate_kill(
        &self,
        table: &mut Table,
        state: &GameState,
        transcript: &[TranscriptEntry],
    ) -> Result<KillDecision, GameError> {
        let mafia = table.living_with_role(Role::Mafia);
        if mafia.is_empty() {
            return Ok(KillDecision {
                target: None,
                coordination_rounds: 0,
                decided_by: None,
                proposals: Vec::new(),
            });
        }

        let mut first: Vec<(String, String)> = Vec::with_capacity(mafia.len());
        let mut first_messages: Vec<Value> = Vec::new();
        for name in &mafia {
            let mut context = ActionContext::new().with("round", 1);
            if !first.is_empty() {
                context.insert("prior_proposals", proposal_map(&first));
                context.insert("prior_messages", &first_messages);
            }
            let output = table
                .consult(name, state, transcript, ActionType::NightKill, context)
                .await?;
            let target = propose(table, state, 1, name, &output);
            first_messages.push(json!({ "speaker": name, "message": output.text() }));
            first.push((name.clone(), target));
        }

        if let Some(target) = majority(&first) {
            debug!(target = %target, "Mafia agreed in round one");
            let scene = Scene::new(state, "mafia_vote");
            table.events.mafia_vote(scene, 1, &first, Some(target.as_str()), None);
            return Ok(KillDecision {
                target: kill_target(target),
                coordination_rounds: 1,
                decided_by: None,
                proposals: first,
            });
        }

        let mut second: Vec<(String, String)> = Vec::with_capacity(mafia.len());
        for name in &mafia {
            let context = ActionContext::new()
                .with("round", 2)
                .with("r1_proposals", proposal_map(&first))
                .with("r1_messages", &first_messages);
            let output = table
                .consult(name, state, transcript, ActionType::NightKill, context)
                .await?;
            let target = propose(table, state, 2, name, &output);
            second.push((name.clone(), target));
        }

        let (target, decided_by) = match majority(&second) {
            Some(target) => (target, None),
            None => {
                // `mafia` is in seat order, so the first proposal is the senior one.
                let (senior, target) = second[0].clone();
                debug!(senior = %senior, target = %target, "Mafia deadlocked; lowest seat decides");
                (target, Some(senior))
            }
        };
        table.events.mafia_vote(
            Scene::new(state, "mafia_vote"),
            2,
            &second,
            Some(target.as_str()),
            decided_by.as_deref(),
        );

        Ok(KillDecision {
            target: kill_target(target),
            coordination_rounds: 2,
            decided_by,
            proposals: second,
        })
    }

    /// The doctor's pick, if the doctor lives and named a living player.
    async fn protect(
        &self,
        table: &mut Table,
        state: &GameState,
        transcript: &[TranscriptEntry],
    ) -> Result<Option<String>, GameError> {
        let Some(doctor) = table.living_with_role(Role::Doctor).into_iter().next() else {
            return Ok(None);
        };

        let output = table
            .consult(&doctor, state, transcript, ActionType::DoctorProtect, ActionContext::new())
            .await?;
        let target = output.target().unwrap_or(SKIP).to_string();
        if !state.is_living(&target) {
            debug!(
                doctor = %doctor,
                target = %target,
                "Protection target is not a living player; nobody protected"
            );
            return Ok(None);
        }

        let scene = Scene::new(state, "doctor_protection");
        table.events.doctor_protection(scene, &doctor, &target, &output.raw);
        let record = ProtectionRecord {
            target: target.clone(),
            reasoning: reasoning(&output),
        };
        table.remember(&doctor, |memory| memory.with_protection(record));
        Ok(Some(target))
    }

    /// The detective's check. The result reaches only the detective's memory
    /// and a sealed event.
    async fn investigate(
        &self,
        table: &mut Table,
        state: &GameState,
        transcript: &[TranscriptEntry],
    ) -> Result<Option<InvestigationRecord>, GameError> {
        let Some(detective) = table.living_with_role(Role::Detective).into_iter().next() else {
            return Ok(None);
        };

        let output = table
            .consult(&detective, state, transcript, ActionType::Investigation, ActionContext::new())
            .await?;
        let target = output.target().unwrap_or(SKIP).to_string();
        let Some(role) = table.state.role_of(&target).filter(|_| target != detective) else {
            debug!(detective = %detective, target = %target, "No investigation this night");
            return Ok(None);
        };

        let result = InvestigationResult::for_role(role);
        table.events.investigation(
            Scene::new(state, "investigation"),
            &detective,
            &target,
            result.as_str(),
            &output.raw,
        );
        let record = InvestigationRecord {
            target,
            result,
            reasoning: reasoning(&output),
        };
        table.remember(&detective, |memory| memory.with_investigation(record.clone()));
        Ok(Some(record))
    }
}

/// Record one proposal as a sealed event and return its target.
fn propose(
    table: &mut Table,
    state: &GameState,
    round: u8,
    name: &str,
    output: &ActionOutput,
) -> String {
    let target = output.target().unwrap_or(SKIP).to_string();
    table.events.mafia_discussion(
        Scene::new(state, "mafia_discussion"),
        round,
        name,
        &target,
        output.text(),
        &output.raw,
    );
    target
}

/// The target more than half the proposals agree on.
fn majority(proposals: &[(String, String)]) -> Option<String> {
    proposals.iter().find_map(|(_, candidate)| {
        let count = proposals.iter().filter(|(_, t)| t == candidate).count();
        (count * 2 > proposals.len()).then(|| candidate.clone())
    })
}

fn kill_target(target: String) -> Option<String> {
    (target != SKIP).then_some(target)
}

fn proposal_map(proposals: &[(String, String)]) -> serde_json::Map<String, Value> {
    proposals
        .iter()
        .map(|(name, target)| (name.clone(), json!(target)))
        .collect()
}

fn reasoning(output: &ActionOutput) -> String {
    output
        .field("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposals(targets: &[&str]) -> Vec<(String, String)> {
        targets
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("M{i}"), t.to_string()))
            .collect()
    }

    #[test]
    fn test_majority() {
        assert_eq!(majority(&proposals(&["Bob", "Bob", "Eve"])), Some("Bob".to_string()));
        assert_eq!(majority(&proposals(&["Bob", "Eve", "Ivan"])), None);
        assert_eq!(majority(&proposals(&["Bob", "Eve"])), None);
        assert_eq!(majority(&proposals(&["Bob"])), Some("Bob".to_string()));
        assert_eq!(majority(&proposals(&["skip", "skip", "Bob"])), Some("skip".to_string()));
        assert_eq!(majority(&[]), None);
    }

    #[test]
    fn test_skip_is_no_kill() {
        assert_eq!(kill_target("skip".to_string()), None);
        assert_eq!(kill_target("Bob".to_string()), Some("Bob".to_string()));
    }

    #[test]
    fn test_blocked() {
        let outcome = NightOutcome {
            intended: Some("Bob".into()),
            protected: Some("Bob".into()),
            killed: None,
            investigation: None,
        };
        assert!(outcome.blocked());

        let skipped = NightOutcome {
            intended: None,
            protected: None,
            killed: None,
            investigation: None,
        };
        assert!(!skipped.blocked());
    }
}
