//! Day-round history with a two-round window.
//!
//! The current and previous rounds are handed to agents in full; anything
//! older is compressed into deaths, accusations and role claims.

use crate::voting::{Ballot, VoteResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Words that mark a speech as an accusation.
const ACCUSATION_KEYWORDS: [&str; 5] = ["mafia", "suspect", "suspicious", "vote out", "eliminate"];

/// Words that mark a speech as a possible role claim.
const CLAIM_KEYWORDS: [&str; 5] = ["i am", "i'm the", "detective", "investigated", "town"];

/// Recorded outcome of a round's vote.
///
/// Serialized as `eliminated:<name>`, `no_elimination`, `revote` or
/// `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RoundOutcome {
    Eliminated(String),
    NoElimination,
    Revote,
    /// The round is still being played.
    Pending,
}

impl RoundOutcome {
    pub fn eliminated(&self) -> Option<&str> {
        match self {
            RoundOutcome::Eliminated(name) => Some(name),
            _ => None,
        }
    }
}

impl From<&VoteResult> for RoundOutcome {
    fn from(result: &VoteResult) -> Self {
        match result.eliminated() {
            Some(name) => RoundOutcome::Eliminated(name.to_string()),
            None if result.tied_players().is_empty() => RoundOutcome::NoElimination,
            None => RoundOutcome::Revote,
        }
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Eliminated(name) => write!(f, "eliminated:{name}"),
            RoundOutcome::NoElimination => f.write_str("no_elimination"),
            RoundOutcome::Revote => f.write_str("revote"),
            RoundOutcome::Pending => f.write_str("pending"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid round outcome: {0}")]
pub struct ParseOutcomeError(String);

impl FromStr for RoundOutcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_elimination" => Ok(RoundOutcome::NoElimination),
            "revote" => Ok(RoundOutcome::Revote),
            "pending" => Ok(RoundOutcome::Pending),
            _ => match s.strip_prefix("eliminated:") {
                Some(name) if !name.is_empty() => Ok(RoundOutcome::Eliminated(name.to_string())),
                _ => Err(ParseOutcomeError(s.to_string())),
            },
        }
    }
}

impl From<RoundOutcome> for String {
    fn from(outcome: RoundOutcome) -> Self {
        outcome.to_string()
    }
}

impl TryFrom<String> for RoundOutcome {
    type Error = ParseOutcomeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One discussion speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speech {
    pub speaker: String,
    pub text: String,
    pub nomination: String,
}

/// A tied candidate's defense before the revote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefenseSpeech {
    pub speaker: String,
    pub text: String,
}

/// Full record of one day round, including the preceding night's death.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRound {
    pub round_number: u32,
    pub night_kill: Option<String>,
    /// Only ever set for a day elimination.
    pub last_words: Option<String>,
    pub speeches: Vec<Speech>,
    pub votes: Vec<Ballot>,
    pub vote_outcome: RoundOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defense_speeches: Vec<DefenseSpeech>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revote: Option<Vec<Ballot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revote_outcome: Option<RoundOutcome>,
}

impl DayRound {
    /// The outcome that decided the round: the revote's if there was one.
    pub fn final_outcome(&self) -> &RoundOutcome {
        self.revote_outcome.as_ref().unwrap_or(&self.vote_outcome)
    }
}

/// Summary of a round older than the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedRound {
    pub round_number: u32,
    pub night_death: Option<String>,
    pub vote_death: Option<String>,
    pub accusations: Vec<String>,
    pub claims: Vec<String>,
    pub vote_result: RoundOutcome,
}

/// One entry of a transcript handed to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Full(DayRound),
    Compressed(CompressedRound),
}

impl TranscriptEntry {
    pub fn round_number(&self) -> u32 {
        match self {
            TranscriptEntry::Full(round) => round.round_number,
            TranscriptEntry::Compressed(summary) => summary.round_number,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, TranscriptEntry::Full(_))
    }
}

/// Everything known about a round once voting is over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundClose {
    pub votes: Vec<Ballot>,
    pub vote_outcome: Option<RoundOutcome>,
    pub last_words: Option<String>,
    pub defense_speeches: Vec<DefenseSpeech>,
    pub revote: Option<Vec<Ballot>>,
    pub revote_outcome: Option<RoundOutcome>,
}

impl RoundClose {
    pub fn new(votes: Vec<Ballot>, vote_outcome: RoundOutcome) -> Self {
        Self {
            votes,
            vote_outcome: Some(vote_outcome),
            ..Self::default()
        }
    }

    pub fn with_last_words(mut self, text: impl Into<String>) -> Self {
        self.last_words = Some(text.into());
        self
    }

    pub fn with_defenses(mut self, defenses: Vec<DefenseSpeech>) -> Self {
        self.defense_speeches = defenses;
        self
    }

    pub fn with_revote(mut self, votes: Vec<Ballot>, outcome: RoundOutcome) -> Self {
        self.revote = Some(votes);
        self.revote_outcome = Some(outcome);
        self
    }
}

/// Finalized rounds plus the speeches of the round being played.
#[derive(Debug, Clone, Default)]
pub struct TranscriptManager {
    rounds: Vec<DayRound>,
    live: Option<LiveRound>,
}

#[derive(Debug, Clone)]
struct LiveRound {
    round_number: u32,
    night_kill: Option<String>,
    speeches: Vec<Speech>,
}

impl TranscriptManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a round. `night_kill` is whoever died the night before.
    pub fn start_round(&mut self, round_number: u32, night_kill: Option<String>) {
        self.live = Some(LiveRound {
            round_number,
            night_kill,
            speeches: Vec::new(),
        });
    }

    /// Append a speech to the live round, opening one if needed.
    pub fn add_speech(
        &mut self,
        speaker: impl Into<String>,
        text: impl Into<String>,
        nomination: impl Into<String>,
    ) {
        let next_round = self.rounds.last().map_or(1, |r| r.round_number + 1);
        let live = self.live.get_or_insert_with(|| LiveRound {
            round_number: next_round,
            night_kill: None,
            speeches: Vec::new(),
        });
        live.speeches.push(Speech {
            speaker: speaker.into(),
            text: text.into(),
            nomination: nomination.into(),
        });
    }

    pub fn current_speeches(&self) -> &[Speech] {
        match &self.live {
            Some(live) => &live.speeches,
            None => &[],
        }
    }

    pub fn rounds(&self) -> &[DayRound] {
        &self.rounds
    }

    /// The transcript as seen from `current_round`.
    ///
    /// Rounds at or after `current_round - 1` are full, older ones
    /// compressed unless `full` is set. A round still in progress is
    /// appended last with a pending outcome.
    pub fn transcript_for_player(&self, current_round: u32, full: bool) -> Vec<TranscriptEntry> {
        let mut entries: Vec<TranscriptEntry> = self
            .rounds
            .iter()
            .map(|round| {
                if full || round.round_number + 1 >= current_round {
                    TranscriptEntry::Full(round.clone())
                } else {
                    TranscriptEntry::Compressed(compress(round))
                }
            })
            .collect();

        if let Some(live) = &self.live {
            entries.push(TranscriptEntry::Full(DayRound {
                round_number: live.round_number,
                night_kill: live.night_kill.clone(),
                last_words: None,
                speeches: live.speeches.clone(),
                votes: Vec::new(),
                vote_outcome: RoundOutcome::Pending,
                defense_speeches: Vec::new(),
                revote: None,
                revote_outcome: None,
            }));
        }

        entries
    }

    /// Close the live round and archive it.
    pub fn finalize_round(&mut self, round_number: u32, close: RoundClose) -> DayRound {
        let live = self.live.take();
        let (night_kill, speeches) = match live {
            Some(live) => (live.night_kill, live.speeches),
            None => (None, Vec::new()),
        };

        let round = DayRound {
            round_number,
            night_kill,
            last_words: close.last_words,
            speeches,
            votes: close.votes,
            vote_outcome: close.vote_outcome.unwrap_or(RoundOutcome::NoElimination),
            defense_speeches: close.defense_speeches,
            revote: close.revote,
            revote_outcome: close.revote_outcome,
        };
        self.rounds.push(round.clone());
        round
    }

    /// Every finalized round, uncompressed.
    pub fn full_transcript(&self) -> Vec<DayRound> {
        self.rounds.clone()
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
        self.live = None;
    }
}

fn compress(round: &DayRound) -> CompressedRound {
    let mut accusations = Vec::new();
    let mut claims = Vec::new();

    for speech in &round.speeches {
        let text = speech.text.to_lowercase();

        if ACCUSATION_KEYWORDS.iter().any(|kw| text.contains(kw)) {
            accusations.push(format!("{} accused {}", speech.speaker, speech.nomination));
        }

        if CLAIM_KEYWORDS.iter().any(|kw| text.contains(kw)) {
            if text.contains("detective") || text.contains("investigated") {
                claims.push(format!("{} claimed Detective", speech.speaker));
            } else if text.contains("town") && (text.contains("i am") || text.contains("i'm")) {
                claims.push(format!("{} claimed Town", speech.speaker));
            }
        }
    }

    let vote_death = round
        .vote_outcome
        .eliminated()
        .or_else(|| round.revote_outcome.as_ref().and_then(RoundOutcome::eliminated))
        .map(str::to_string);

    CompressedRound {
        round_number: round.round_number,
        night_death: round.night_kill.clone(),
        vote_death,
        accusations,
        claims,
        vote_result: round.final_outcome().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play_round(manager: &mut TranscriptManager, round: u32, night_kill: Option<&str>) {
        manager.start_round(round, night_kill.map(str::to_string));
        manager.add_speech("Alice", "I suspect Bob is mafia.", "Bob");
        manager.add_speech("Bob", "I am the detective, I investigated Eve.", "Eve");
        manager.add_speech("Carol", "I'm town, nothing to add.", "skip");
        manager.add_speech("Dave", "Good morning.", "skip");
        manager.finalize_round(
            round,
            RoundClose::new(
                vec![Ballot::new("Alice", "Bob"), Ballot::new("Bob", "Bob")],
                RoundOutcome::Eliminated("Bob".to_string()),
            )
            .with_last_words("I was town."),
        );
    }

    #[test]
    fn test_round_outcome_strings() {
        for outcome in [
            RoundOutcome::Eliminated("Alice".to_string()),
            RoundOutcome::NoElimination,
            RoundOutcome::Revote,
            RoundOutcome::Pending,
        ] {
            assert_eq!(outcome.to_string().parse::<RoundOutcome>().unwrap(), outcome);
        }
        assert!("eliminated:".parse::<RoundOutcome>().is_err());
        assert!("won".parse::<RoundOutcome>().is_err());
    }

    #[test]
    fn test_window_keeps_current_and_previous_full() {
        let mut manager = TranscriptManager::new();
        for round in 1..=4 {
            play_round(&mut manager, round, None);
        }

        let entries = manager.transcript_for_player(4, false);
        let full: Vec<bool> = entries.iter().map(TranscriptEntry::is_full).collect();
        assert_eq!(full, vec![false, false, true, true]);

        let entries = manager.transcript_for_player(4, true);
        assert!(entries.iter().all(TranscriptEntry::is_full));
    }

    #[test]
    fn test_window_boundary_for_every_round() {
        let mut manager = TranscriptManager::new();
        for round in 1..=6 {
            play_round(&mut manager, round, None);
        }

        for current in 1..=7u32 {
            for entry in manager.transcript_for_player(current, false) {
                let round = entry.round_number();
                let expect_full = round + 1 >= current;
                assert_eq!(entry.is_full(), expect_full, "round {round} at {current}");
            }
        }
    }

    #[test]
    fn test_compression_extracts_accusations_and_claims() {
        let mut manager = TranscriptManager::new();
        play_round(&mut manager, 1, None);
        play_round(&mut manager, 2, Some("Eve"));

        let entries = manager.transcript_for_player(5, false);
        let TranscriptEntry::Compressed(summary) = &entries[1] else {
            panic!("expected compressed round");
        };

        assert_eq!(summary.round_number, 2);
        assert_eq!(summary.night_death.as_deref(), Some("Eve"));
        assert_eq!(summary.vote_death.as_deref(), Some("Bob"));
        assert_eq!(summary.accusations, vec!["Alice accused Bob"]);
        assert_eq!(
            summary.claims,
            vec!["Bob claimed Detective", "Carol claimed Town"]
        );
        assert_eq!(summary.vote_result, RoundOutcome::Eliminated("Bob".to_string()));
    }

    #[test]
    fn test_compression_uses_revote_outcome() {
        let mut manager = TranscriptManager::new();
        manager.start_round(1, None);
        manager.finalize_round(
            1,
            RoundClose::new(Vec::new(), RoundOutcome::Revote)
                .with_revote(Vec::new(), RoundOutcome::Eliminated("Dave".to_string())),
        );

        let entries = manager.transcript_for_player(3, false);
        let TranscriptEntry::Compressed(summary) = &entries[0] else {
            panic!("expected compressed round");
        };
        assert_eq!(summary.vote_death.as_deref(), Some("Dave"));
        assert_eq!(summary.vote_result, RoundOutcome::Eliminated("Dave".to_string()));
    }

    #[test]
    fn test_live_round_is_pending() {
        let mut manager = TranscriptManager::new();
        play_round(&mut manager, 1, None);
        manager.start_round(2, Some("Frank".to_string()));
        manager.add_speech("Alice", "Frank is gone.", "Carol");

        let entries = manager.transcript_for_player(2, false);
        assert_eq!(entries.len(), 2);
        let TranscriptEntry::Full(live) = &entries[1] else {
            panic!("expected live round");
        };
        assert_eq!(live.vote_outcome, RoundOutcome::Pending);
        assert_eq!(live.night_kill.as_deref(), Some("Frank"));
        assert_eq!(live.speeches.len(), 1);
        assert_eq!(manager.current_speeches().len(), 1);
    }

    #[test]
    fn test_finalize_clears_buffer() {
        let mut manager = TranscriptManager::new();
        play_round(&mut manager, 1, None);

        assert!(manager.current_speeches().is_empty());
        assert_eq!(manager.full_transcript().len(), 1);
        assert_eq!(manager.rounds()[0].speeches.len(), 4);
        assert_eq!(manager.rounds()[0].last_words.as_deref(), Some("I was town."));

        manager.clear();
        assert!(manager.full_transcript().is_empty());
    }

    #[test]
    fn test_entry_serializes_with_detail_tag() {
        let mut manager = TranscriptManager::new();
        play_round(&mut manager, 1, None);
        let json = serde_json::to_value(&manager.transcript_for_player(1, false)[0]).unwrap();
        assert_eq!(json["detail"], "full");
        assert_eq!(json["vote_outcome"], "eliminated:Bob");
    }
}
