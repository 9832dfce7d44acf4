use super::{speaking_position, Table};
use crate::actions::ActionType;
use crate::events::Scene;
use crate::game::GameError;
use crate::prompt::ActionContext;
use crate::state::{GameState, SKIP};
use crate::transcript::{DefenseSpeech, RoundClose, RoundOutcome, TranscriptEntry};
use crate::voting::{Ballot, VoteOutcome, VoteResolver, VoteResult};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

/// How a day ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayOutcome {
    pub eliminated: Option<String>,
    pub vote: VoteResult,
    pub revote: Option<VoteResult>,
}

/// Day: discussion, vote, optional defense and revote, last words.
///
/// Only a player voted out gets last words; the night's victim never speaks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DayPhase {
    resolver: VoteResolver,
}

impl DayPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(
        &self,
        table: &mut Table,
        night_kill: Option<String>,
    ) -> Result<DayOutcome, GameError> {
        let round = table.state.round_number();
        let snapshot = table.state.public_state();
        table.events.phase_start(Scene::new(&snapshot, "phase_start"));
        table.transcript.start_round(round, night_kill.clone());
        info!(round, night_kill = night_kill.as_deref().unwrap_or("none"), "Day begins");

        let order = table.state.speaking_order();
        self.discuss(table, &order, round).await?;

        let state = table.state.public_state();
        let transcript = table.transcript.transcript_for_player(round, true);
        let (votes, details) = collect_votes(table, &order, &state, &transcript).await?;
        for ballot in &votes {
            table.state.record_vote(&ballot.voter, &ballot.target)?;
        }
        let result = self.resolver.resolve(&votes, order.len());

        let (eliminated, revote, close) = match &result.outcome {
            VoteOutcome::Eliminated { player } => {
                let eliminated = Some(player.as_str());
                log_vote(table, &state, 1, &votes, "eliminated", eliminated, &result, &details);
                let last_words = eliminate(table, player).await?;
                let close = RoundClose::new(votes, RoundOutcome::Eliminated(player.clone()))
                    .with_last_words(last_words);
                (Some(player.clone()), None, close)
            }
            VoteOutcome::Revote { tied } => {
                log_vote(table, &state, 1, &votes, "tie", None, &result, &details);
                let defenses = self.defend(table, tied, &votes, &result, round).await?;

                let mut revote_state = table.state.public_state();
                revote_state.nominated_players = tied.clone();
                let transcript = table.transcript.transcript_for_player(round, true);
                let (revotes, revote_details) =
                    collect_votes(table, &order, &revote_state, &transcript).await?;
                for ballot in &revotes {
                    table.state.record_vote(&ballot.voter, &ballot.target)?;
                }
                let second = self.resolver.resolve_revote(&revotes, order.len(), tied);

                let eliminated = second.eliminated().map(str::to_string);
                log_vote(
                    table,
                    &revote_state,
                    2,
                    &revotes,
                    second.tag(),
                    eliminated.as_deref(),
                    &second,
                    &revote_details,
                );

                let outcome = RoundOutcome::from(&second);
                let mut close = RoundClose::new(votes, RoundOutcome::Revote)
                    .with_defenses(defenses)
                    .with_revote(revotes, outcome);
                if let Some(player) = &eliminated {
                    close = close.with_last_words(eliminate(table, player).await?);
                }
                (eliminated, Some(second), close)
            }
            VoteOutcome::NoElimination => {
                log_vote(table, &state, 1, &votes, "no_elimination", None, &result, &details);
                (None, None, RoundClose::new(votes, RoundOutcome::NoElimination))
            }
        };

        table.transcript.finalize_round(round, close);
        info!(round, eliminated = eliminated.as_deref().unwrap_or("none"), "Day ends");

        Ok(DayOutcome {
            eliminated,
            vote: result,
            revote,
        })
    }

    /// Every living seat speaks once in rotated order and may nominate.
    async fn discuss(
        &self,
        table: &mut Table,
        order: &[String],
        round: u32,
    ) -> Result<(), GameError> {
        for (index, speaker) in order.iter().enumerate() {
            let state = table.state.public_state();
            let transcript = table.transcript.transcript_for_player(round, false);
            let context =
                ActionContext::new().with("speaking_order", speaking_position(order, index));

            let output = table
                .consult(speaker, &state, &transcript, ActionType::Speak, context)
                .await?;
            let nomination = output.target().unwrap_or(SKIP).to_string();

            let accepted = nomination != SKIP
                && table.state.is_alive(&nomination)
                && !table.state.nominations().contains(&nomination);
            if accepted {
                table.state.add_nomination(&nomination)?;
            }

            table.transcript.add_speech(speaker.as_str(), output.text(), nomination.as_str());
            let state = table.state.public_state();
            table.events.speech(
                Scene::new(&state, "discussion"),
                speaker,
                output.text(),
                &nomination,
                &output.raw,
            );
        }
        Ok(())
    }

    /// Tied candidates defend themselves in tie order.
    async fn defend(
        &self,
        table: &mut Table,
        tied: &[String],
        votes: &[Ballot],
        result: &VoteResult,
        round: u32,
    ) -> Result<Vec<DefenseSpeech>, GameError> {
        let defense_context = json!({
            "tied_players": tied,
            "votes": ballot_map(votes),
            "vote_counts": result.vote_counts,
        });

        let mut defenses = Vec::with_capacity(tied.len());
        for (index, speaker) in tied.iter().enumerate() {
            let state = table.state.public_state();
            let transcript = table.transcript.transcript_for_player(round, false);
            let context = ActionContext::new()
                .with("defense_context", &defense_context)
                .with("speaking_order", speaking_position(tied, index));

            let output = table
                .consult(speaker, &state, &transcript, ActionType::Defense, context)
                .await?;
            table
                .events
                .defense(Scene::new(&state, "defense"), speaker, output.text(), &output.raw);
            defenses.push(DefenseSpeech {
                speaker: speaker.clone(),
                text: output.text().to_string(),
            });
        }
        Ok(defenses)
    }
}

/// Every living seat votes against the same snapshot; nobody sees another
/// seat's ballot first.
async fn collect_votes(
    table: &mut Table,
    order: &[String],
    state: &GameState,
    transcript: &[TranscriptEntry],
) -> Result<(Vec<Ballot>, BTreeMap<String, Value>), GameError> {
    let mut votes = Vec::with_capacity(order.len());
    let mut details = BTreeMap::new();

    for voter in order {
        let output = table
            .consult(voter, state, transcript, ActionType::Vote, ActionContext::new())
            .await?;
        votes.push(Ballot::new(voter.as_str(), output.target().unwrap_or(SKIP)));
        details.insert(voter.clone(), output.raw);
    }
    Ok((votes, details))
}

/// Collect last words, then kill the player.
///
/// Returns the last words. The "game over" hint only shapes the prompt.
async fn eliminate(table: &mut Table, player: &str) -> Result<String, GameError> {
    let game_over = table.state.elimination_ends_game(player);
    let before = table.state.public_state();
    let transcript = table.transcript.transcript_for_player(before.round_number, true);
    let context = ActionContext::new().with("game_over", game_over);

    let output = table
        .consult(player, &before, &transcript, ActionType::LastWords, context)
        .await?;
    let text = output.text().to_string();
    table
        .events
        .last_words(Scene::new(&before, "last_words"), player, &text, &output.raw);

    table.state.kill_player(player)?;
    let after = table.state.public_state();
    table
        .events
        .elimination(Scene::new(&after, "elimination"), player, &before);
    info!(player, game_over, "Player voted out");
    Ok(text)
}

#[allow(clippy::too_many_arguments)]
fn log_vote(
    table: &mut Table,
    state: &GameState,
    vote_round: u8,
    votes: &[Ballot],
    outcome: &str,
    eliminated: Option<&str>,
    result: &VoteResult,
    details: &BTreeMap<String, Value>,
) {
    table.events.vote_round(
        Scene::new(state, "vote"),
        vote_round,
        votes,
        outcome,
        eliminated,
        &result.vote_counts,
        details,
    );
}

fn ballot_map(votes: &[Ballot]) -> BTreeMap<&str, &str> {
    votes
        .iter()
        .map(|b| (b.voter.as_str(), b.target.as_str()))
        .collect()
}
