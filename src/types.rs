use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::metrics::SkillMetric;

/// Stable external identifier (e.g. a platform account id)
pub type ParticipantId = u64;

/// Which of the two groups a participant plays on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
    #[default]
    Unassigned,
}

impl Side {
    /// The opposing group. `Unassigned` has no opponent.
    pub fn other(&self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
            Side::Unassigned => Side::Unassigned,
        }
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self, Side::Unassigned)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
            Side::Unassigned => f.write_str("unassigned"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown side: {0}")]
pub struct UnknownSide(pub String);

impl FromStr for Side {
    type Err = UnknownSide;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "group_a" => Ok(Side::A),
            "b" | "group_b" => Ok(Side::B),
            "unassigned" | "none" | "spectator" => Ok(Side::Unassigned),
            _ => Err(UnknownSide(s.to_string())),
        }
    }
}

/// Raw per-participant counters for the current session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage: u32,
    pub score: i32,
    pub rounds_played: u32,
    pub rounds_won: u32,
}

impl Counters {
    pub fn reset(&mut self) {
        *self = Counters::default();
    }
}

/// One tracked participant
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub side: Side,
    pub alive: bool,
    pub connected: bool,
    /// Never moved by the engine, in any mode
    pub exempt: bool,
    pub counters: Counters,
    /// Round starts survived on the current side
    pub rounds_on_side: u32,
    /// Rounds left before the participant may be moved again
    pub immunity_remaining: i32,
    /// Host clock (ms) of the last side change
    pub last_switch_ms: u64,
}

impl Participant {
    pub fn new(id: ParticipantId, name: &str, side: Side) -> Self {
        Self {
            id,
            name: name.to_string(),
            side,
            alive: false,
            connected: true,
            exempt: false,
            counters: Counters::default(),
            rounds_on_side: 0,
            immunity_remaining: 0,
            last_switch_ms: 0,
        }
    }

    /// Skill value under `metric`. Recomputed on every call.
    pub fn value(&self, metric: SkillMetric) -> f64 {
        metric.value(&self.counters)
    }

    /// Record a side change: tenure restarts and immunity is applied.
    pub fn move_to(&mut self, side: Side, immunity_rounds: i32, now_ms: u64) {
        self.side = side;
        self.rounds_on_side = 0;
        self.immunity_remaining = immunity_rounds;
        self.last_switch_ms = now_ms;
    }
}

/// What the host reports when a participant joins or is re-synced
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default)]
    pub side: Side,
    #[serde(default)]
    pub alive: bool,
    /// Host-side privilege that may exempt the participant from moves
    #[serde(default)]
    pub exempt: bool,
    /// Counters to adopt; `None` keeps whatever the registry already has
    #[serde(default)]
    pub counters: Option<Counters>,
}

/// One side's members during a balancing pass, with a cached aggregate value.
///
/// The aggregate is recomputed from scratch on every membership change so
/// repeated moves cannot accumulate floating point drift.
#[derive(Clone, Debug)]
pub struct Group {
    pub side: Side,
    metric: SkillMetric,
    members: Vec<Participant>,
    total: f64,
}

impl Group {
    pub fn new(side: Side, metric: SkillMetric) -> Self {
        Self {
            side,
            metric,
            members: Vec::new(),
            total: 0.0,
        }
    }

    pub fn from_members(side: Side, metric: SkillMetric, members: Vec<Participant>) -> Self {
        let mut group = Self {
            side,
            metric,
            members,
            total: 0.0,
        };
        group.recompute();
        group
    }

    fn recompute(&mut self) {
        let metric = self.metric;
        self.total = self.members.iter().map(|p| p.value(metric)).sum();
    }

    pub fn add(&mut self, participant: Participant) {
        self.members.push(participant);
        self.recompute();
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let idx = self.members.iter().position(|p| p.id == id)?;
        let removed = self.members.swap_remove(idx);
        self.recompute();
        Some(removed)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.members.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.iter().any(|p| p.id == id)
    }

    pub fn members(&self) -> &[Participant] {
        &self.members
    }

    pub fn into_members(self) -> Vec<Participant> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn metric(&self) -> SkillMetric {
        self.metric
    }

    /// Sum of member values
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Average member value, 0 for an empty group
    pub fn mean(&self) -> f64 {
        if self.members.is_empty() {
            0.0
        } else {
            self.total / self.members.len() as f64
        }
    }
}

/// Why a scramble ran
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrambleReason {
    WinStreak,
    Periodic,
    Halftime,
    Always,
    Manual,
}

/// Losing-streak boost in effect for one side
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Boost {
    pub side: Side,
    /// Integer percent, 20 means the boosted side is held to 1.2x
    pub percentage: u32,
    pub lose_streak: u32,
}

impl Boost {
    pub fn factor(&self) -> f64 {
        1.0 + self.percentage as f64 / 100.0
    }
}

/// A single move the host has to execute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reassignment {
    pub id: ParticipantId,
    pub name: String,
    pub from: Side,
    pub to: Side,
    /// Made by the forced size pass, ignoring liveness, immunity and tenure
    pub forced: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceAction {
    #[default]
    None,
    Balanced,
    Scrambled,
}

/// Announcements the host may relay to players
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BalanceEvent {
    SizeCorrected { moved: usize },
    ForcedMoves { moved: usize },
    SkillSwapped { swaps: usize },
    Scrambled { reason: ScrambleReason, moved: usize },
    BoostApplied { side: Side, percentage: u32, lose_streak: u32 },
    LoseStreak { side: Side, lose_streak: u32 },
}

/// Result of one balancing pass
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BalanceOutcome {
    pub action: BalanceAction,
    /// In the order the engine decided them
    pub reassignments: Vec<Reassignment>,
    pub moved_for_size: usize,
    pub forced_moves: usize,
    pub swaps: usize,
    /// Absolute difference of group means after the pass
    pub final_difference: f64,
    pub events: Vec<BalanceEvent>,
}

impl BalanceOutcome {
    pub fn none(final_difference: f64) -> Self {
        Self {
            final_difference,
            ..Self::default()
        }
    }

    pub fn changed(&self) -> bool {
        !self.reassignments.is_empty()
    }
}

/// Answer to a participant asking to join a side
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum JoinDecision {
    Allow,
    /// Put on `side` instead. `delayed` when the participant is alive and
    /// the host should switch them once they die or the round restarts.
    Redirect { side: Side, delayed: bool },
    /// Already on the side balance requires; the request is refused.
    Deny,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: ParticipantId, side: Side, score: i32) -> Participant {
        let mut p = Participant::new(id, &format!("p{}", id), side);
        p.counters.score = score;
        p
    }

    #[test]
    fn test_group_aggregate_tracks_membership() {
        let mut group = Group::new(Side::A, SkillMetric::Score);
        group.add(scored(1, Side::A, 10));
        group.add(scored(2, Side::A, 30));
        assert_eq!(group.total(), 40.0);
        assert_eq!(group.mean(), 20.0);

        let removed = group.remove(1).unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(group.total(), 30.0);
        assert!(group.remove(99).is_none());
    }

    #[test]
    fn test_group_aggregate_does_not_drift() {
        let mut group = Group::from_members(
            Side::B,
            SkillMetric::Score,
            (0..10).map(|i| scored(i, Side::B, 7)).collect(),
        );
        for round in 0..1000u64 {
            let p = group.remove(round % 10).unwrap();
            group.add(p);
        }
        assert_eq!(group.total(), 70.0);
    }

    #[test]
    fn test_empty_group_mean_is_zero() {
        let group = Group::new(Side::A, SkillMetric::Kda);
        assert_eq!(group.mean(), 0.0);
        assert!(group.is_empty());
    }

    #[test]
    fn test_move_to_resets_tenure_and_sets_immunity() {
        let mut p = scored(1, Side::A, 0);
        p.rounds_on_side = 5;
        p.move_to(Side::B, 3, 1234);
        assert_eq!(p.side, Side::B);
        assert_eq!(p.rounds_on_side, 0);
        assert_eq!(p.immunity_remaining, 3);
        assert_eq!(p.last_switch_ms, 1234);
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("A".parse::<Side>(), Ok(Side::A));
        assert_eq!("group_b".parse::<Side>(), Ok(Side::B));
        assert_eq!("red".parse::<Side>(), Err(UnknownSide("red".to_string())));
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::Unassigned.other(), Side::Unassigned);
    }
}
