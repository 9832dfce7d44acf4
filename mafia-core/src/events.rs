//! Append-only game event log with public and private views.
//!
//! Every event carries a set of private keys. The public view strips those
//! keys and drops any event whose keys are all private. Investigation events
//! are additionally withheld from the public view by type, whatever their
//! private set says.
//!
//! Observers registered with [`EventLog::add_observer`] run synchronously
//! after every append. A failing or panicking observer is logged and
//! skipped; it never affects the log or the caller.

use crate::state::{GameState, Role, Team};
use crate::voting::Ballot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;
use uuid::Uuid;

/// Free-form payload of an event.
pub type EventData = Map<String, Value>;

/// Error an observer may report. Logged, never propagated.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with each appended event.
pub type Observer = Box<dyn Fn(&Event) -> Result<(), ObserverError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PhaseStart,
    Speech,
    VoteRound,
    Defense,
    LastWords,
    Elimination,
    NightZeroStrategy,
    MafiaDiscussion,
    MafiaVote,
    DoctorProtection,
    Investigation,
    NightResolution,
    GameEnd,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PhaseStart => "phase_start",
            EventType::Speech => "speech",
            EventType::VoteRound => "vote_round",
            EventType::Defense => "defense",
            EventType::LastWords => "last_words",
            EventType::Elimination => "elimination",
            EventType::NightZeroStrategy => "night_zero_strategy",
            EventType::MafiaDiscussion => "mafia_discussion",
            EventType::MafiaVote => "mafia_vote",
            EventType::DoctorProtection => "doctor_protection",
            EventType::Investigation => "investigation",
            EventType::NightResolution => "night_resolution",
            EventType::GameEnd => "game_end",
        }
    }

    /// Types that never appear in the public view.
    pub fn always_private(&self) -> bool {
        matches!(self, EventType::Investigation)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logged event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
    #[serde(default)]
    pub private_fields: BTreeSet<String>,
}

impl Event {
    /// Whether every key of the payload is private.
    pub fn fully_private(&self) -> bool {
        !self.private_fields.is_empty() && self.data.keys().all(|k| self.private_fields.contains(k))
    }

    /// The payload with private keys removed, or `None` when nothing would
    /// remain public.
    pub fn public(&self) -> Option<Event> {
        if self.event_type.always_private() || self.fully_private() {
            return None;
        }

        let data = self
            .data
            .iter()
            .filter(|(key, _)| !self.private_fields.contains(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Event {
            event_type: self.event_type,
            timestamp: self.timestamp,
            data,
            private_fields: BTreeSet::new(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Where in the game an event happened.
///
/// Every typed constructor stamps `phase`, `round_number`, `stage` and
/// `state_public` from this onto the payload.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub state: &'a GameState,
    pub stage: &'a str,
}

impl<'a> Scene<'a> {
    pub fn new(state: &'a GameState, stage: &'a str) -> Self {
        Self { state, stage }
    }

    fn stamp(&self, data: &mut EventData) {
        data.insert("phase".into(), json!(self.state.phase));
        data.insert("round_number".into(), json!(self.state.round_number));
        data.insert("stage".into(), json!(self.stage));
        data.insert("state_public".into(), json!(self.state));
    }
}

/// The game's event history.
pub struct EventLog {
    game_id: Uuid,
    events: Vec<Event>,
    observers: Vec<Observer>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("game_id", &self.game_id)
            .field("events", &self.events.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_game_id(Uuid::new_v4())
    }

    pub fn with_game_id(game_id: Uuid) -> Self {
        Self {
            game_id,
            events: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn game_id(&self) -> Uuid {
        self.game_id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Register a callback run after every append, in registration order.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&Event) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Append an event stamped with the current time.
    ///
    /// Private field names that are not keys of `data` are discarded.
    pub fn add(
        &mut self,
        event_type: EventType,
        data: EventData,
        private_fields: &[&str],
    ) -> &Event {
        let private_fields = private_fields
            .iter()
            .filter(|field| data.contains_key(**field))
            .map(|field| field.to_string())
            .collect();

        self.events.push(Event {
            event_type,
            timestamp: Utc::now(),
            data,
            private_fields,
        });

        let index = self.events.len() - 1;
        self.notify(index);
        &self.events[index]
    }

    /// Append an event whose every key is private.
    fn add_sealed(&mut self, event_type: EventType, data: EventData) -> &Event {
        let keys: Vec<String> = data.keys().cloned().collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.add(event_type, data, &keys)
    }

    fn notify(&self, index: usize) {
        let event = &self.events[index];
        for (position, observer) in self.observers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        observer = position,
                        event = %event.event_type,
                        error = %e,
                        "Event observer failed"
                    );
                }
                Err(_) => {
                    warn!(
                        observer = position,
                        event = %event.event_type,
                        "Event observer panicked"
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Views and queries
    // ------------------------------------------------------------------

    /// Events from `since` onward with private data removed.
    pub fn public_view(&self, since: usize) -> Vec<Event> {
        self.events
            .iter()
            .skip(since)
            .filter_map(Event::public)
            .collect()
    }

    pub fn full_view(&self) -> &[Event] {
        &self.events
    }

    pub fn full_view_since(&self, since: usize) -> &[Event] {
        self.events.get(since..).unwrap_or(&[])
    }

    pub fn events_of_type(&self, event_type: EventType) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Events strictly after `since`.
    pub fn since_timestamp(&self, since: DateTime<Utc>) -> Vec<&Event> {
        self.events.iter().filter(|e| e.timestamp > since).collect()
    }

    // ------------------------------------------------------------------
    // Typed constructors
    // ------------------------------------------------------------------

    pub fn phase_start(&mut self, scene: Scene<'_>) -> &Event {
        let mut data = EventData::new();
        scene.stamp(&mut data);
        self.add(EventType::PhaseStart, data, &[])
    }

    pub fn speech(
        &mut self,
        scene: Scene<'_>,
        speaker: &str,
        text: &str,
        nomination: &str,
        reasoning: &Value,
    ) -> &Event {
        let mut data = object(json!({
            "speaker": speaker,
            "text": text,
            "nomination": nomination,
            "reasoning": reasoning,
        }));
        scene.stamp(&mut data);
        self.add(EventType::Speech, data, &["reasoning"])
    }

    /// A vote or revote. Per-voter outputs stay private.
    #[allow(clippy::too_many_arguments)]
    pub fn vote_round(
        &mut self,
        scene: Scene<'_>,
        vote_round: u8,
        votes: &[Ballot],
        outcome: &str,
        eliminated: Option<&str>,
        vote_counts: &BTreeMap<String, usize>,
        vote_details: &BTreeMap<String, Value>,
    ) -> &Event {
        let ballots: Map<String, Value> = votes
            .iter()
            .map(|b| (b.voter.clone(), json!(b.target)))
            .collect();

        let mut data = object(json!({
            "round": vote_round,
            "votes": ballots,
            "outcome": outcome,
            "eliminated": eliminated,
            "vote_counts": vote_counts,
            "vote_details": vote_details,
        }));
        scene.stamp(&mut data);
        self.add(EventType::VoteRound, data, &["vote_details"])
    }

    pub fn defense(
        &mut self,
        scene: Scene<'_>,
        speaker: &str,
        text: &str,
        reasoning: &Value,
    ) -> &Event {
        let mut data = object(json!({
            "speaker": speaker,
            "text": text,
            "reasoning": reasoning,
        }));
        scene.stamp(&mut data);
        self.add(EventType::Defense, data, &["reasoning"])
    }

    pub fn last_words(
        &mut self,
        scene: Scene<'_>,
        speaker: &str,
        text: &str,
        output: &Value,
    ) -> &Event {
        let mut data = object(json!({
            "speaker": speaker,
            "text": text,
            "output": output,
        }));
        scene.stamp(&mut data);
        self.add(EventType::LastWords, data, &["output"])
    }

    /// A day elimination. `scene` carries the state after the death.
    pub fn elimination(&mut self, scene: Scene<'_>, player: &str, before: &GameState) -> &Event {
        let mut data = object(json!({
            "player": player,
            "state_before": before,
            "state_after": scene.state,
        }));
        scene.stamp(&mut data);
        self.add(EventType::Elimination, data, &[])
    }

    pub fn night_zero_strategy(
        &mut self,
        scene: Scene<'_>,
        speaker: &str,
        text: &str,
        reasoning: &Value,
    ) -> &Event {
        let mut data = object(json!({
            "speaker": speaker,
            "text": text,
            "reasoning": reasoning,
        }));
        scene.stamp(&mut data);
        self.add_sealed(EventType::NightZeroStrategy, data)
    }

    pub fn mafia_discussion(
        &mut self,
        scene: Scene<'_>,
        coordination_round: u8,
        speaker: &str,
        target: &str,
        message: &str,
        reasoning: &Value,
    ) -> &Event {
        let mut data = object(json!({
            "coordination_round": coordination_round,
            "speaker": speaker,
            "target": target,
            "message": message,
            "reasoning": reasoning,
        }));
        scene.stamp(&mut data);
        self.add_sealed(EventType::MafiaDiscussion, data)
    }

    pub fn mafia_vote(
        &mut self,
        scene: Scene<'_>,
        coordination_round: u8,
        proposals: &[(String, String)],
        final_target: Option<&str>,
        decided_by: Option<&str>,
    ) -> &Event {
        let votes: Map<String, Value> = proposals
            .iter()
            .map(|(name, target)| (name.clone(), json!(target)))
            .collect();

        let mut data = object(json!({
            "coordination_round": coordination_round,
            "votes": votes,
            "final_target": final_target,
            "decided_by": decided_by,
        }));
        scene.stamp(&mut data);
        self.add_sealed(EventType::MafiaVote, data)
    }

    pub fn doctor_protection(
        &mut self,
        scene: Scene<'_>,
        protector: &str,
        protected: &str,
        reasoning: &Value,
    ) -> &Event {
        let mut data = object(json!({
            "protector": protector,
            "protected": protected,
            "reasoning": reasoning,
        }));
        scene.stamp(&mut data);
        self.add_sealed(EventType::DoctorProtection, data)
    }

    pub fn investigation(
        &mut self,
        scene: Scene<'_>,
        detective: &str,
        target: &str,
        result: &str,
        reasoning: &Value,
    ) -> &Event {
        let mut data = object(json!({
            "detective": detective,
            "target": target,
            "result": result,
            "reasoning": reasoning,
        }));
        scene.stamp(&mut data);
        self.add_sealed(EventType::Investigation, data)
    }

    /// Night outcome. Only the realized kill is public.
    pub fn night_resolution(
        &mut self,
        scene: Scene<'_>,
        intended_kill: Option<&str>,
        protected: bool,
        actual_kill: Option<&str>,
        after: &GameState,
    ) -> &Event {
        let mut data = object(json!({
            "intended_kill": intended_kill,
            "protected": protected,
            "actual_kill": actual_kill,
            "state_before": scene.state,
            "state_after": after,
        }));
        scene.stamp(&mut data);
        self.add(EventType::NightResolution, data, &["intended_kill", "protected"])
    }

    pub fn game_end(
        &mut self,
        scene: Scene<'_>,
        winner: Team,
        final_roles: &BTreeMap<String, Role>,
    ) -> &Event {
        let mut data = object(json!({
            "winner": winner,
            "final_roles": final_roles,
        }));
        scene.stamp(&mut data);
        self.add(EventType::GameEnd, data, &[])
    }
}

fn object(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => EventData::new(),
    }
}
