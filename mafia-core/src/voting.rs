//! Vote resolution.
//!
//! Plurality with a skip tie-break:
//! - "skip" counts as an option in the tally
//! - a single option holding the maximum wins (a skip win eliminates nobody)
//! - a tie at the maximum goes to a revote among the tied players
//! - a revote is resolved once and never recurses

use crate::state::SKIP;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One cast vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: String,
    pub target: String,
}

impl Ballot {
    pub fn new(voter: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            voter: voter.into(),
            target: target.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        self.target == SKIP
    }
}

/// What a tally decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VoteOutcome {
    Eliminated { player: String },
    NoElimination,
    /// `tied` is in order of first appearance in the ballots; defenses
    /// follow it.
    Revote { tied: Vec<String> },
}

/// Result of one tally. Recomputed each time, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResult {
    #[serde(flatten)]
    pub outcome: VoteOutcome,
    pub vote_counts: BTreeMap<String, usize>,
}

impl VoteResult {
    pub fn eliminated(&self) -> Option<&str> {
        match &self.outcome {
            VoteOutcome::Eliminated { player } => Some(player),
            _ => None,
        }
    }

    pub fn tied_players(&self) -> &[String] {
        match &self.outcome {
            VoteOutcome::Revote { tied } => tied,
            _ => &[],
        }
    }

    /// Short outcome tag: `eliminated`, `no_elimination` or `revote`.
    pub fn tag(&self) -> &'static str {
        match self.outcome {
            VoteOutcome::Eliminated { .. } => "eliminated",
            VoteOutcome::NoElimination => "no_elimination",
            VoteOutcome::Revote { .. } => "revote",
        }
    }
}

/// Stateless vote tally.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoteResolver;

impl VoteResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a first-round vote.
    pub fn resolve(&self, votes: &[Ballot], living_count: usize) -> VoteResult {
        let counts = tally(votes);
        let vote_counts = count_map(&counts);

        let outcome = if counts.iter().all(|(target, _)| *target == SKIP) {
            VoteOutcome::NoElimination
        } else {
            match leaders(&counts).as_slice() {
                [only] if *only == SKIP => VoteOutcome::NoElimination,
                [only] => VoteOutcome::Eliminated {
                    player: only.to_string(),
                },
                tied => VoteOutcome::Revote {
                    tied: tied
                        .iter()
                        .filter(|t| **t != SKIP)
                        .map(|t| t.to_string())
                        .collect(),
                },
            }
        };

        debug!(living_count, ?vote_counts, ?outcome, "resolved vote");
        VoteResult {
            outcome,
            vote_counts,
        }
    }

    /// Resolve the one-shot revote among `tied_players`.
    ///
    /// Ballots for anyone outside the tie are ignored. Any tie or a skip win
    /// is `NoElimination`; this never yields another revote.
    pub fn resolve_revote(
        &self,
        votes: &[Ballot],
        living_count: usize,
        tied_players: &[String],
    ) -> VoteResult {
        let counts = tally(
            votes
                .iter()
                .filter(|b| b.is_skip() || tied_players.contains(&b.target)),
        );
        let vote_counts = count_map(&counts);

        let outcome = match leaders(&counts).as_slice() {
            [only] if *only != SKIP => VoteOutcome::Eliminated {
                player: only.to_string(),
            },
            _ => VoteOutcome::NoElimination,
        };

        debug!(living_count, ?vote_counts, ?outcome, "resolved revote");
        VoteResult {
            outcome,
            vote_counts,
        }
    }
}

/// Per-option counts in order of first appearance.
fn tally<'a>(ballots: impl IntoIterator<Item = &'a Ballot>) -> Vec<(&'a str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for ballot in ballots {
        match counts.iter_mut().find(|(target, _)| *target == ballot.target) {
            Some((_, count)) => *count += 1,
            None => counts.push((ballot.target.as_str(), 1)),
        }
    }
    counts
}

/// Options holding the maximum count.
fn leaders<'a>(counts: &[(&'a str, usize)]) -> Vec<&'a str> {
    let max = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    counts
        .iter()
        .filter(|(_, c)| *c == max)
        .map(|(target, _)| *target)
        .collect()
}

fn count_map(counts: &[(&str, usize)]) -> BTreeMap<String, usize> {
    counts
        .iter()
        .map(|(target, count)| (target.to_string(), *count))
        .collect()
}
