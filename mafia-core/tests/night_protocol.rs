//! Tests for the night: kill coordination, protection and investigation.
//!
//! Mafia sit at seats 0 (Alice), 3 (Diana) and 7 (Heidi); Frank is the
//! doctor and Charlie the detective.

use mafia_core::actions::ActionType;
use mafia_core::events::EventType;
use mafia_core::game::{GameConfig, GameRunner};
use mafia_core::memory::{InvestigationResult, KillOutcome};
use mafia_core::phases::{NightPhase, NightZeroPhase};
use mafia_core::state::Phase;
use mafia_core::testing::{
    assert_alive, assert_dead, assert_public_view_clean, sensible_answer, standard_seating,
    target, PromptTags, ScriptedProvider, TaggedPromptBuilder,
};
use serde_json::Value;
use std::sync::Arc;

/// The coordination round a night-kill prompt belongs to.
fn coordination_round(tags: &PromptTags) -> u64 {
    tags.context.get("round").and_then(Value::as_u64).unwrap_or(0)
}

/// Kill proposals per mafia seat for rounds one and two; everything else
/// answers sensibly.
fn proposals(
    first: [&'static str; 3],
    second: [&'static str; 3],
    protect: &'static str,
) -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::tagged(move |action, tags| {
        let seat = match tags.player.as_str() {
            "Alice" => 0,
            "Diana" => 1,
            _ => 2,
        };
        Ok(match action {
            ActionType::NightKill if coordination_round(tags) == 1 => target(first[seat]),
            ActionType::NightKill => target(second[seat]),
            ActionType::DoctorProtect => target(protect),
            _ => sensible_answer(action, tags),
        })
    }))
}

fn night_one(provider: Arc<ScriptedProvider>) -> GameRunner {
    let mut runner = GameRunner::new(
        GameConfig::from_seating(standard_seating()),
        provider,
        Arc::new(TaggedPromptBuilder),
    )
    .unwrap();
    let state = &mut runner.table_mut().state;
    state.advance_phase();
    state.advance_phase();
    assert_eq!(state.advance_phase(), Phase::Night(1));
    runner
}

// =============================================================================
// KILL COORDINATION
// =============================================================================

#[tokio::test]
async fn test_unanimous_round_one_skips_round_two() {
    let provider = proposals(["Bob", "Bob", "Bob"], ["Eve", "Eve", "Eve"], "Frank");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    assert_eq!(provider.calls_of(ActionType::NightKill).len(), 3);
    assert_eq!(outcome.killed.as_deref(), Some("Bob"));
    assert_dead(&runner.table().state, "Bob");

    let votes = runner.table().events.events_of_type(EventType::MafiaVote);
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].get("coordination_round"), Some(&Value::from(1)));
}

#[tokio::test]
async fn test_round_one_shows_earlier_proposals() {
    let provider = proposals(["Bob", "Bob", "Eve"], ["Bob", "Bob", "Bob"], "Frank");
    let mut runner = night_one(provider.clone());

    NightPhase::new().run(runner.table_mut()).await.unwrap();

    let calls: Vec<PromptTags> = provider
        .calls_of(ActionType::NightKill)
        .iter()
        .map(|c| c.tags())
        .collect();
    // Two of three agree in round one, which is a majority.
    assert_eq!(calls.len(), 3);
    assert!(calls[0].context.get("prior_proposals").is_none());
    assert_eq!(calls[1].context["prior_proposals"]["Alice"], "Bob");
    assert_eq!(calls[2].context["prior_proposals"].as_object().map(|m| m.len()), Some(2));
    assert_eq!(calls[2].context_names("partners"), vec!["Alice", "Diana"]);
}

#[tokio::test]
async fn test_disagreement_runs_exactly_one_more_round() {
    let provider = proposals(["Bob", "Eve", "Ivan"], ["Eve", "Eve", "Ivan"], "Frank");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    let calls: Vec<PromptTags> = provider
        .calls_of(ActionType::NightKill)
        .iter()
        .map(|c| c.tags())
        .collect();
    assert_eq!(calls.len(), 6);
    let rounds: Vec<u64> = calls.iter().map(coordination_round).collect();
    assert_eq!(rounds, vec![1, 1, 1, 2, 2, 2]);
    let r1 = &calls[3].context["r1_proposals"];
    assert_eq!(r1["Alice"], "Bob");
    assert_eq!(r1["Heidi"], "Ivan");

    assert_eq!(outcome.intended.as_deref(), Some("Eve"));
    assert_eq!(outcome.killed.as_deref(), Some("Eve"));

    let votes = runner.table().events.events_of_type(EventType::MafiaVote);
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].get_str("final_target"), Some("Eve"));
    assert_eq!(votes[0].get("decided_by"), Some(&Value::Null));
}

#[tokio::test]
async fn test_deadlock_goes_to_lowest_seat() {
    let provider = proposals(["Bob", "Eve", "Ivan"], ["Judy", "Eve", "Ivan"], "Frank");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    assert_eq!(provider.calls_of(ActionType::NightKill).len(), 6);
    assert_eq!(outcome.killed.as_deref(), Some("Judy"));

    let votes = runner.table().events.events_of_type(EventType::MafiaVote);
    assert_eq!(votes[0].get_str("decided_by"), Some("Alice"));
    assert_eq!(votes[0].get("coordination_round"), Some(&Value::from(2)));
}

#[tokio::test]
async fn test_mafia_may_skip_the_kill() {
    let provider = proposals(["skip", "skip", "Bob"], ["Bob", "Bob", "Bob"], "Frank");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    assert_eq!(outcome.intended, None);
    assert_eq!(outcome.killed, None);
    assert_eq!(runner.table().state.living_players().len(), 10);

    let alice = runner.table().memory("Alice").unwrap();
    assert_eq!(alice.last_kill().map(|k| k.outcome), Some(KillOutcome::Skipped));
}

#[tokio::test]
async fn test_illegal_kill_target_falls_back_to_a_town_player() {
    // Proposing a partner is rejected every time, so the default applies.
    let provider = proposals(["Diana", "Alice", "Alice"], ["Diana", "Alice", "Alice"], "Frank");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    let killed = outcome.intended.unwrap();
    assert!(!["Alice", "Diana", "Heidi"].contains(&killed.as_str()));
    // Three attempts per proposal, across both rounds.
    assert!(provider.calls_of(ActionType::NightKill).len() >= 9);
    let retry = &provider.calls_of(ActionType::NightKill)[1].prompt;
    assert!(retry.contains("[ERROR] Your previous response was invalid"));
}

// =============================================================================
// PROTECTION
// =============================================================================

#[tokio::test]
async fn test_doctor_blocks_the_kill() {
    let provider = proposals(["Eve", "Eve", "Eve"], ["Eve", "Eve", "Eve"], "Eve");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    assert!(outcome.blocked());
    assert_eq!(outcome.killed, None);
    assert_alive(&runner.table().state, "Eve");

    let heidi = runner.table().memory("Heidi").unwrap();
    let kill = heidi.last_kill().unwrap();
    assert_eq!(kill.target.as_deref(), Some("Eve"));
    assert_eq!(kill.outcome, KillOutcome::Blocked);

    let frank = runner.table().memory("Frank").unwrap();
    assert_eq!(frank.last_protection().map(|p| p.target.as_str()), Some("Eve"));

    // The public resolution only says nobody died.
    let public = runner.table().events.public_view(0);
    let resolution = public
        .iter()
        .find(|e| e.event_type == EventType::NightResolution)
        .unwrap();
    assert_eq!(resolution.get("actual_kill"), Some(&Value::Null));
    assert!(resolution.get("intended_kill").is_none());
    assert!(resolution.get("protected").is_none());
}

#[tokio::test]
async fn test_lowercase_protection_still_blocks() {
    let provider = proposals(["eve", "eve", "eve"], ["eve", "eve", "eve"], "eve");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    assert_eq!(outcome.intended.as_deref(), Some("Eve"));
    assert_eq!(outcome.protected.as_deref(), Some("Eve"));
    assert!(outcome.blocked());
    assert_eq!(outcome.killed, None);
    assert_alive(&runner.table().state, "Eve");

    let protection = runner.table().events.events_of_type(EventType::DoctorProtection);
    assert_eq!(protection[0].get_str("protected"), Some("Eve"));
}

#[tokio::test]
async fn test_illegal_protection_is_silently_ignored() {
    let provider = proposals(["Eve", "Eve", "Eve"], ["Eve", "Eve", "Eve"], "Nobody");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    assert_eq!(outcome.protected, None);
    assert_eq!(outcome.killed.as_deref(), Some("Eve"));
    assert_eq!(provider.calls_of(ActionType::DoctorProtect).len(), 1);
    assert!(runner
        .table()
        .events
        .events_of_type(EventType::DoctorProtection)
        .is_empty());
    assert!(runner.table().memory("Frank").unwrap().last_protection().is_none());
}

#[tokio::test]
async fn test_self_protection_is_allowed() {
    let provider = proposals(["Frank", "Frank", "Frank"], ["Eve", "Eve", "Eve"], "Frank");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    assert_eq!(outcome.protected.as_deref(), Some("Frank"));
    assert_alive(&runner.table().state, "Frank");
}

// =============================================================================
// INVESTIGATION
// =============================================================================

#[tokio::test]
async fn test_investigation_reaches_only_the_detective() {
    // Charlie investigates the first living name other than himself: Alice.
    let provider = proposals(["Bob", "Bob", "Bob"], ["Bob", "Bob", "Bob"], "Frank");
    let mut runner = night_one(provider.clone());

    let outcome = NightPhase::new().run(runner.table_mut()).await.unwrap();

    let record = outcome.investigation.unwrap();
    assert_eq!(record.target, "Alice");
    assert_eq!(record.result, InvestigationResult::Mafia);

    let charlie = runner.table().memory("Charlie").unwrap();
    assert_eq!(
        charlie.investigation_results(),
        vec![("Alice".to_string(), InvestigationResult::Mafia)]
    );
    for (name, memory) in runner.table().memories() {
        if name != "Charlie" {
            assert!(memory.facts.investigations.is_empty(), "{name} learned a result");
        }
    }

    let events = &runner.table().events;
    assert_eq!(events.events_of_type(EventType::Investigation).len(), 1);
    assert!(events
        .public_view(0)
        .iter()
        .all(|e| e.event_type != EventType::Investigation));
    assert_public_view_clean(events);
}

#[tokio::test]
async fn test_detective_sees_past_results_next_night() {
    let provider = proposals(["skip", "skip", "skip"], ["skip", "skip", "skip"], "Frank");
    let mut runner = night_one(provider.clone());
    NightPhase::new().run(runner.table_mut()).await.unwrap();

    let state = &mut runner.table_mut().state;
    state.advance_phase();
    assert_eq!(state.advance_phase(), Phase::Night(2));
    NightPhase::new().run(runner.table_mut()).await.unwrap();

    let calls = provider.calls_of(ActionType::Investigation);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].tags().context["investigation_results"], serde_json::json!([]));
    let known = &calls[1].tags().context["investigation_results"];
    assert_eq!(known[0]["target"], "Alice");
    assert_eq!(known[0]["result"], "Mafia");
}

// =============================================================================
// NIGHT ZERO
// =============================================================================

#[tokio::test]
async fn test_night_zero_kills_nobody_and_stays_private() {
    let provider = Arc::new(ScriptedProvider::sensible());
    let mut runner = GameRunner::new(
        GameConfig::from_seating(standard_seating()),
        provider.clone(),
        Arc::new(TaggedPromptBuilder),
    )
    .unwrap();
    runner.table_mut().state.advance_phase();

    NightZeroPhase::new().run(runner.table_mut()).await.unwrap();

    assert_eq!(runner.table().state.living_players().len(), 10);
    let speakers: Vec<String> = provider.calls().iter().map(|c| c.tags().player).collect();
    assert_eq!(speakers, vec!["Alice", "Diana", "Heidi"]);
    assert!(provider.calls().iter().all(|c| c.tags().is_night_zero()));

    let public = runner.table().events.public_view(0);
    assert!(public
        .iter()
        .all(|e| e.event_type != EventType::NightZeroStrategy));
}
