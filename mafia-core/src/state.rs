//! Authoritative game state.
//!
//! The `GameStateManager` owns the roster, the hidden role assignment,
//! seats, the phase machine, nominations and votes. Everything handed to
//! agents is a `GameState` snapshot derived from it on demand.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of seats at the table.
pub const PLAYER_COUNT: usize = 10;

/// The ballot/nomination value meaning "nobody".
pub const SKIP: &str = "skip";

/// Role counts for a full table.
const ROLE_TEMPLATE: [(Role, usize); 4] = [
    (Role::Mafia, 3),
    (Role::Doctor, 1),
    (Role::Detective, 1),
    (Role::Town, 5),
];

/// State-invariant violations. These are caller bugs and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Game requires exactly {expected} players, got {found}")]
    RosterSize { expected: usize, found: usize },

    #[error("Seating does not match the role template ({role}: expected {expected}, found {found})")]
    RoleTemplate {
        role: Role,
        expected: usize,
        found: usize,
    },

    #[error("Duplicate player name: {0}")]
    DuplicateName(String),

    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    #[error("Player already dead: {0}")]
    AlreadyDead(String),

    #[error("Cannot nominate dead player: {0}")]
    DeadNominee(String),

    #[error("Player already nominated: {0}")]
    AlreadyNominated(String),

    #[error("Cannot record vote from dead voter: {0}")]
    DeadVoter(String),

    #[error("Illegal vote from {voter}: {target} is not a living nominee")]
    IllegalVote { voter: String, target: String },
}

/// A hidden role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Mafia,
    Detective,
    Doctor,
    Town,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Mafia => "mafia",
            Role::Detective => "detective",
            Role::Doctor => "doctor",
            Role::Town => "town",
        }
    }

    pub fn is_mafia(&self) -> bool {
        matches!(self, Role::Mafia)
    }

    /// The win-condition camp this role belongs to.
    pub fn team(&self) -> Team {
        if self.is_mafia() {
            Team::Mafia
        } else {
            Team::Town
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The two win-condition camps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Town,
    Mafia,
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Town => f.write_str("town"),
            Team::Mafia => f.write_str("mafia"),
        }
    }
}

/// Error for unparseable phase identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid phase: {0}")]
pub struct ParsePhaseError(String);

/// Game phase. Serialized as `setup`, `night_zero`, `day_N` or `night_N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Phase {
    Setup,
    NightZero,
    Day(u32),
    Night(u32),
}

impl Phase {
    /// The deterministic successor of this phase.
    pub fn next(self) -> Phase {
        match self {
            Phase::Setup => Phase::NightZero,
            Phase::NightZero => Phase::Day(1),
            Phase::Day(n) => Phase::Night(n),
            Phase::Night(n) => Phase::Day(n + 1),
        }
    }

    pub fn is_day(&self) -> bool {
        matches!(self, Phase::Day(_))
    }

    pub fn is_night(&self) -> bool {
        matches!(self, Phase::Night(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::NightZero => f.write_str("night_zero"),
            Phase::Day(n) => write!(f, "day_{n}"),
            Phase::Night(n) => write!(f, "night_{n}"),
        }
    }
}

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParsePhaseError(s.to_string());
        match s {
            "setup" => Ok(Phase::Setup),
            "night_zero" => Ok(Phase::NightZero),
            _ => {
                let (kind, number) = s.split_once('_').ok_or_else(invalid)?;
                let number: u32 = number.parse().map_err(|_| invalid())?;
                match kind {
                    "day" => Ok(Phase::Day(number)),
                    "night" => Ok(Phase::Night(number)),
                    _ => Err(invalid()),
                }
            }
        }
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.to_string()
    }
}

impl TryFrom<String> for Phase {
    type Error = ParsePhaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One seat at the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub seat: usize,
    pub role: Role,
    pub alive: bool,
}

/// Public, read-only view of the game handed to agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub phase: Phase,
    pub round_number: u32,
    pub living_players: Vec<String>,
    pub dead_players: Vec<String>,
    pub nominated_players: Vec<String>,
}

impl GameState {
    pub fn is_living(&self, name: &str) -> bool {
        self.living_players.iter().any(|p| p == name)
    }

    pub fn is_nominated(&self, name: &str) -> bool {
        self.nominated_players.iter().any(|p| p == name)
    }

    /// Day 1 is the only day on which "skip" is a legal nomination.
    pub fn is_first_day(&self) -> bool {
        self.phase.is_day() && self.round_number == 1
    }
}

/// Owns and mutates the authoritative game state.
#[derive(Debug, Clone)]
pub struct GameStateManager {
    /// Indexed by seat.
    players: Vec<Player>,
    phase: Phase,
    round_number: u32,
    nominations: Vec<String>,
    votes: BTreeMap<String, String>,
}

impl GameStateManager {
    /// Seat the roster and deal roles.
    ///
    /// Seats come from one seeded shuffle of the names, roles from a second
    /// shuffle of the role template on the same generator, so a fixed seed
    /// always reproduces the same table.
    pub fn new<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        seed: Option<u64>,
    ) -> Result<Self, StateError> {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        check_roster(&names)?;

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        names.shuffle(&mut rng);
        let mut roles: Vec<Role> = ROLE_TEMPLATE
            .iter()
            .flat_map(|&(role, count)| std::iter::repeat(role).take(count))
            .collect();
        roles.shuffle(&mut rng);

        Ok(Self::seated(names.into_iter().zip(roles).collect()))
    }

    /// Build a table with a fixed seating (seat = position in `seating`).
    ///
    /// Used for replays and scripted scenarios; the seating must still match
    /// the role template.
    pub fn from_seating<S: Into<String>>(
        seating: impl IntoIterator<Item = (S, Role)>,
    ) -> Result<Self, StateError> {
        let seating: Vec<(String, Role)> = seating
            .into_iter()
            .map(|(name, role)| (name.into(), role))
            .collect();
        let names: Vec<String> = seating.iter().map(|(name, _)| name.clone()).collect();
        check_roster(&names)?;

        for &(role, expected) in &ROLE_TEMPLATE {
            let found = seating.iter().filter(|(_, r)| *r == role).count();
            if found != expected {
                return Err(StateError::RoleTemplate {
                    role,
                    expected,
                    found,
                });
            }
        }

        Ok(Self::seated(seating))
    }

    fn seated(seating: Vec<(String, Role)>) -> Self {
        let players = seating
            .into_iter()
            .enumerate()
            .map(|(seat, (name, role))| Player {
                name,
                seat,
                role,
                alive: true,
            })
            .collect();

        Self {
            players,
            phase: Phase::Setup,
            round_number: 0,
            nominations: Vec::new(),
            votes: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    /// All players in seat order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn role_of(&self, name: &str) -> Option<Role> {
        self.player(name).map(|p| p.role)
    }

    pub fn seat_of(&self, name: &str) -> Option<usize> {
        self.player(name).map(|p| p.seat)
    }

    pub fn is_alive(&self, name: &str) -> bool {
        self.player(name).is_some_and(|p| p.alive)
    }

    /// Living player names in seat order.
    pub fn living_players(&self) -> Vec<String> {
        self.names_where(|p| p.alive)
    }

    /// Dead player names in seat order.
    pub fn dead_players(&self) -> Vec<String> {
        self.names_where(|p| !p.alive)
    }

    /// Every player holding `role`, dead or alive, in seat order.
    pub fn players_with_role(&self, role: Role) -> Vec<String> {
        self.names_where(|p| p.role == role)
    }

    /// Living players holding `role`, in seat order.
    pub fn living_with_role(&self, role: Role) -> Vec<String> {
        self.names_where(|p| p.alive && p.role == role)
    }

    /// The other mafia members of `name`, in seat order. Empty for non-mafia.
    pub fn mafia_partners(&self, name: &str) -> Vec<String> {
        match self.role_of(name) {
            Some(Role::Mafia) => self.names_where(|p| p.role.is_mafia() && p.name != name),
            _ => Vec::new(),
        }
    }

    pub fn nominations(&self) -> &[String] {
        &self.nominations
    }

    pub fn votes(&self) -> &BTreeMap<String, String> {
        &self.votes
    }

    /// Final role reveal, keyed by player name.
    pub fn all_roles(&self) -> BTreeMap<String, Role> {
        self.players
            .iter()
            .map(|p| (p.name.clone(), p.role))
            .collect()
    }

    fn names_where(&self, predicate: impl Fn(&Player) -> bool) -> Vec<String> {
        self.players
            .iter()
            .filter(|p| predicate(p))
            .map(|p| p.name.clone())
            .collect()
    }

    /// The public snapshot handed to agents.
    pub fn public_state(&self) -> GameState {
        GameState {
            phase: self.phase,
            round_number: self.round_number,
            living_players: self.living_players(),
            dead_players: self.dead_players(),
            nominated_players: self.nominations.clone(),
        }
    }

    /// The public snapshot as it would look after `target` died.
    ///
    /// Does not mutate anything.
    pub fn snapshot_after_kill(&self, target: Option<&str>) -> GameState {
        let mut snapshot = self.public_state();
        if let Some(target) = target.filter(|t| self.is_alive(t)) {
            snapshot.living_players.retain(|p| p != target);
            snapshot.dead_players = self.names_where(|p| !p.alive || p.name == target);
        }
        snapshot
    }

    /// Living players in today's speaking order.
    ///
    /// The walk starts at seat `(round - 1) mod seats`, wraps around the
    /// table and skips the dead.
    pub fn speaking_order(&self) -> Vec<String> {
        let seat_count = self.players.len();
        if seat_count == 0 {
            return Vec::new();
        }

        let day = self.round_number.max(1) as usize;
        let start = (day - 1) % seat_count;

        (0..seat_count)
            .map(|offset| &self.players[(start + offset) % seat_count])
            .filter(|p| p.alive)
            .map(|p| p.name.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Win checks
    // ------------------------------------------------------------------

    /// Town wins when no mafia remain; mafia wins at parity.
    pub fn winner(&self) -> Option<Team> {
        let (mafia, town) = alignment(self.players.iter().filter(|p| p.alive));
        if mafia == 0 {
            Some(Team::Town)
        } else if mafia >= town {
            Some(Team::Mafia)
        } else {
            None
        }
    }

    /// Would eliminating `name` settle the game?
    ///
    /// Same thresholds as [`winner`](Self::winner), plus: with the doctor
    /// dead, mafia one short of parity is treated as sealed because the next
    /// kill cannot be stopped. Only feeds narration hints; mutates nothing.
    pub fn elimination_ends_game(&self, name: &str) -> bool {
        let remaining: Vec<&Player> = self
            .players
            .iter()
            .filter(|p| p.alive && p.name != name)
            .collect();
        let (mafia, town) = alignment(remaining.iter().copied());

        if mafia == 0 || mafia >= town {
            return true;
        }

        let doctor_alive = remaining.iter().any(|p| p.role == Role::Doctor);
        !doctor_alive && mafia + 1 >= town
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// Move to the next phase. Entering a day or night clears nominations
    /// and votes.
    pub fn advance_phase(&mut self) -> Phase {
        self.phase = self.phase.next();

        match self.phase {
            Phase::Day(n) => {
                self.round_number = n;
                self.clear_nominations();
            }
            Phase::Night(_) => self.clear_nominations(),
            Phase::Setup | Phase::NightZero => {}
        }

        self.phase
    }

    /// Mark a player dead. Alive only ever goes true → false.
    pub fn kill_player(&mut self, name: &str) -> Result<(), StateError> {
        let player = self
            .players
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| StateError::UnknownPlayer(name.to_string()))?;

        if !player.alive {
            return Err(StateError::AlreadyDead(name.to_string()));
        }

        player.alive = false;
        Ok(())
    }

    pub fn add_nomination(&mut self, nominee: &str) -> Result<(), StateError> {
        if self.player(nominee).is_none() {
            return Err(StateError::UnknownPlayer(nominee.to_string()));
        }
        if !self.is_alive(nominee) {
            return Err(StateError::DeadNominee(nominee.to_string()));
        }
        if self.nominations.iter().any(|n| n == nominee) {
            return Err(StateError::AlreadyNominated(nominee.to_string()));
        }

        self.nominations.push(nominee.to_string());
        Ok(())
    }

    pub fn clear_nominations(&mut self) {
        self.nominations.clear();
        self.votes.clear();
    }

    /// Record a ballot. The target must be [`SKIP`] or a living nominee.
    pub fn record_vote(&mut self, voter: &str, target: &str) -> Result<(), StateError> {
        if self.player(voter).is_none() {
            return Err(StateError::UnknownPlayer(voter.to_string()));
        }
        if !self.is_alive(voter) {
            return Err(StateError::DeadVoter(voter.to_string()));
        }

        if target != SKIP {
            let legal = self.is_alive(target) && self.nominations.iter().any(|n| n == target);
            if !legal {
                return Err(StateError::IllegalVote {
                    voter: voter.to_string(),
                    target: target.to_string(),
                });
            }
        }

        self.votes.insert(voter.to_string(), target.to_string());
        Ok(())
    }
}

fn check_roster(names: &[String]) -> Result<(), StateError> {
    if names.len() != PLAYER_COUNT {
        return Err(StateError::RosterSize {
            expected: PLAYER_COUNT,
            found: names.len(),
        });
    }

    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(StateError::DuplicateName(name.clone()));
        }
    }
    Ok(())
}

/// (mafia, town-aligned) head counts.
fn alignment<'a>(players: impl Iterator<Item = &'a Player>) -> (usize, usize) {
    players.fold((0, 0), |(mafia, town), p| {
        if p.role.is_mafia() {
            (mafia + 1, town)
        } else {
            (mafia, town + 1)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        (0..PLAYER_COUNT).map(|i| format!("P{i}")).collect()
    }

    /// Seat order: M T D M T Doc T M T T
    fn seating() -> Vec<(String, Role)> {
        use Role::*;
        let roles = [
            Mafia, Town, Detective, Mafia, Town, Doctor, Town, Mafia, Town, Town,
        ];
        names().into_iter().zip(roles).collect()
    }

    fn fixed() -> GameStateManager {
        GameStateManager::from_seating(seating()).unwrap()
    }

    #[test]
    fn test_seeded_assignment_is_reproducible() {
        let a = GameStateManager::new(names(), Some(42)).unwrap();
        let b = GameStateManager::new(names(), Some(42)).unwrap();
        assert_eq!(a.players(), b.players());
    }

    #[test]
    fn test_role_template_counts() {
        let state = GameStateManager::new(names(), Some(7)).unwrap();
        assert_eq!(state.players_with_role(Role::Mafia).len(), 3);
        assert_eq!(state.players_with_role(Role::Doctor).len(), 1);
        assert_eq!(state.players_with_role(Role::Detective).len(), 1);
        assert_eq!(state.players_with_role(Role::Town).len(), 5);
        for (seat, player) in state.players().iter().enumerate() {
            assert_eq!(player.seat, seat);
            assert!(player.alive);
        }
    }

    #[test]
    fn test_wrong_roster_size() {
        let err = GameStateManager::new(vec!["A", "B"], None).unwrap_err();
        assert_eq!(
            err,
            StateError::RosterSize {
                expected: 10,
                found: 2
            }
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut roster = names();
        roster[9] = "P0".to_string();
        let err = GameStateManager::new(roster, Some(1)).unwrap_err();
        assert_eq!(err, StateError::DuplicateName("P0".to_string()));
    }

    #[test]
    fn test_seating_must_match_template() {
        let mut bad = seating();
        bad[1].1 = Role::Mafia;
        assert!(matches!(
            GameStateManager::from_seating(bad),
            Err(StateError::RoleTemplate { role: Role::Mafia, .. })
        ));
    }

    #[test]
    fn test_phase_transitions() {
        let mut state = fixed();
        assert_eq!(state.phase(), Phase::Setup);
        assert_eq!(state.advance_phase(), Phase::NightZero);
        assert_eq!(state.advance_phase(), Phase::Day(1));
        assert_eq!(state.round_number(), 1);
        assert_eq!(state.advance_phase(), Phase::Night(1));
        assert_eq!(state.advance_phase(), Phase::Day(2));
        assert_eq!(state.round_number(), 2);
    }

    #[test]
    fn test_entering_phase_resets_nominations() {
        let mut state = fixed();
        state.advance_phase();
        state.advance_phase();
        state.add_nomination("P1").unwrap();
        state.record_vote("P2", "P1").unwrap();

        state.advance_phase();
        assert!(state.nominations().is_empty());
        assert!(state.votes().is_empty());
    }

    #[test]
    fn test_phase_round_trip_strings() {
        for phase in [Phase::Setup, Phase::NightZero, Phase::Day(3), Phase::Night(12)] {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert!("dusk_1".parse::<Phase>().is_err());
        assert!("day_x".parse::<Phase>().is_err());
    }

    #[test]
    fn test_speaking_order_rotates_and_skips_dead() {
        let mut state = fixed();
        state.advance_phase();
        state.advance_phase();
        let order = state.speaking_order();
        assert_eq!(order.first().map(String::as_str), Some("P0"));
        assert_eq!(order.len(), 10);

        state.kill_player("P1").unwrap();
        state.advance_phase();
        state.advance_phase();
        // Day 2 starts at seat 1, which is dead, so seat 2 leads.
        let order = state.speaking_order();
        assert_eq!(order.len(), 9);
        assert_eq!(order[0], "P2");
        assert_eq!(order.last().map(String::as_str), Some("P0"));
        assert!(!order.contains(&"P1".to_string()));
    }

    #[test]
    fn test_speaking_order_wraps_past_seat_count() {
        let mut state = fixed();
        state.advance_phase();
        for _ in 0..23 {
            state.advance_phase();
        }
        // Day 12 starts at seat (12 - 1) mod 10 = 1.
        assert_eq!(state.phase(), Phase::Day(12));
        assert_eq!(state.speaking_order()[0], "P1");
    }

    #[test]
    fn test_kill_player_errors() {
        let mut state = fixed();
        state.kill_player("P4").unwrap();
        assert!(!state.is_alive("P4"));
        assert_eq!(
            state.kill_player("P4"),
            Err(StateError::AlreadyDead("P4".to_string()))
        );
        assert_eq!(
            state.kill_player("Nobody"),
            Err(StateError::UnknownPlayer("Nobody".to_string()))
        );
    }

    #[test]
    fn test_nomination_rules() {
        let mut state = fixed();
        state.kill_player("P4").unwrap();
        assert_eq!(
            state.add_nomination("P4"),
            Err(StateError::DeadNominee("P4".to_string()))
        );
        state.add_nomination("P1").unwrap();
        assert_eq!(
            state.add_nomination("P1"),
            Err(StateError::AlreadyNominated("P1".to_string()))
        );
        assert_eq!(state.nominations(), ["P1".to_string()]);
    }

    #[test]
    fn test_vote_rules() {
        let mut state = fixed();
        state.add_nomination("P1").unwrap();
        state.record_vote("P0", "P1").unwrap();
        state.record_vote("P2", SKIP).unwrap();
        assert!(matches!(
            state.record_vote("P3", "P5"),
            Err(StateError::IllegalVote { .. })
        ));

        state.kill_player("P6").unwrap();
        assert_eq!(
            state.record_vote("P6", SKIP),
            Err(StateError::DeadVoter("P6".to_string()))
        );
        assert_eq!(state.votes().len(), 2);
    }

    #[test]
    fn test_win_conditions() {
        let mut state = fixed();
        assert_eq!(state.winner(), None);

        for mafia in state.players_with_role(Role::Mafia) {
            state.kill_player(&mafia).unwrap();
        }
        assert_eq!(state.winner(), Some(Team::Town));

        let mut state = fixed();
        // 3 mafia vs 7 town: kill four town-aligned to reach parity.
        for name in ["P1", "P2", "P4", "P5"] {
            assert_eq!(state.winner(), None);
            state.kill_player(name).unwrap();
        }
        assert_eq!(state.winner(), Some(Team::Mafia));
    }

    #[test]
    fn test_elimination_lookahead() {
        let mut state = fixed();
        assert!(!state.elimination_ends_game("P1"));

        // Two mafia dead: removing the last one ends it for town.
        state.kill_player("P0").unwrap();
        state.kill_player("P3").unwrap();
        assert!(state.elimination_ends_game("P7"));

        let mut state = fixed();
        // Doctor dead, 3 mafia vs 5 town: one more town loss leaves 3 vs 4,
        // which is one short of parity with no doctor.
        state.kill_player("P5").unwrap();
        state.kill_player("P1").unwrap();
        assert!(state.elimination_ends_game("P2"));
        assert!(state.is_alive("P2"), "look-ahead must not mutate");
    }

    #[test]
    fn test_snapshot_after_kill_does_not_mutate() {
        let state = fixed();
        let after = state.snapshot_after_kill(Some("P2"));
        assert!(!after.living_players.contains(&"P2".to_string()));
        assert_eq!(after.dead_players, vec!["P2".to_string()]);
        assert!(state.is_alive("P2"));
        assert_eq!(state.snapshot_after_kill(None), state.public_state());
    }

    #[test]
    fn test_mafia_partners() {
        let state = fixed();
        assert_eq!(state.mafia_partners("P3"), vec!["P0", "P7"]);
        assert!(state.mafia_partners("P1").is_empty());
    }
}
